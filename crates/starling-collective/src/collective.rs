//! The collective: membership plus the task submission path.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use starling_agent::{Agent, Task, TaskResult, TaskStatus};
use starling_coordination::{
    ConsensusEngine, Gossip, GossipConfig, Message, MessageKind, ReputationRegistry, TaskMarket,
};

use crate::event_log::EventLog;
use crate::{CollectiveError, Result};

/// Cadence of the maintenance loop (decay sweep, stalled-task re-queue).
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Collective configuration.
#[derive(Debug, Clone)]
pub struct CollectiveConfig {
    /// Advisory lower bound; never enforced.
    pub min_agents: usize,
    /// Hard membership cap.
    pub max_agents: usize,
    /// Accept threshold for consensus rounds, in (0, 1].
    pub consensus_threshold: f64,
    /// Daily reputation decay fraction.
    pub reputation_decay: f64,
}

impl Default for CollectiveConfig {
    fn default() -> Self {
        Self {
            min_agents: 2,
            max_agents: 100,
            consensus_threshold: 0.67,
            reputation_decay: 0.01,
        }
    }
}

/// Point-in-time view of a collective.
#[derive(Debug, Clone)]
pub struct CollectiveStats {
    pub name: String,
    pub agent_count: usize,
    pub pending_tasks: usize,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub avg_reputation: f64,
}

#[derive(Default)]
struct TaskBoard {
    pending: Vec<Task>,
    active: HashMap<String, Task>,
    completed: Vec<TaskResult>,
}

/// A group of agents coordinating through gossip, a task market, threshold
/// consensus, and a shared reputation registry.
///
/// Agents hold no pointer back to the collective; results are discovered
/// by awaiting each agent's result sequence. Cross-component calls are
/// made with no collective lock held.
pub struct Collective {
    name: String,
    id: String,
    config: CollectiveConfig,

    gossip: Arc<Gossip>,
    market: Arc<TaskMarket>,
    consensus: Arc<ConsensusEngine>,
    reputation: Arc<ReputationRegistry>,
    events: Arc<EventLog>,

    members: RwLock<HashMap<String, Arc<Agent>>>,
    tasks: RwLock<TaskBoard>,

    shutdown_tx: watch::Sender<bool>,
}

impl Collective {
    pub fn new(name: impl Into<String>, config: CollectiveConfig) -> Self {
        let gossip = Arc::new(Gossip::new(GossipConfig::default()));
        let events = Arc::new(EventLog::new());
        wire_observers(&gossip, &events);

        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            id: Uuid::new_v4().to_string(),
            gossip,
            market: Arc::new(TaskMarket::new()),
            consensus: Arc::new(ConsensusEngine::new(config.consensus_threshold)),
            reputation: Arc::new(ReputationRegistry::new(config.reputation_decay)),
            events,
            members: RwLock::new(HashMap::new()),
            tasks: RwLock::new(TaskBoard::default()),
            shutdown_tx,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &CollectiveConfig {
        &self.config
    }

    /// Add an agent to the collective. Registers its reputation, gossip
    /// peer entry, and consensus voting key, then announces the join.
    pub fn join(&self, agent: Arc<Agent>) -> Result<()> {
        let sid = agent.sid().to_string();
        let card = agent.identity().card();
        let key = agent.identity().verifying_key();

        {
            let mut members = self.members.write().unwrap();
            if members.len() >= self.config.max_agents {
                return Err(CollectiveError::Full);
            }
            members.insert(sid.clone(), agent);
        }

        self.reputation.register(&sid);
        self.gossip.add_peer(&sid);
        self.consensus.register_voter(&sid, key);

        self.gossip.broadcast(Message::new(
            MessageKind::AgentJoined,
            &sid,
            serde_json::to_value(&card).unwrap_or_default(),
        ));
        Ok(())
    }

    /// Remove an agent and announce the departure.
    pub fn leave(&self, sid: &str) -> Result<()> {
        {
            let mut members = self.members.write().unwrap();
            if members.remove(sid).is_none() {
                return Err(CollectiveError::AgentNotFound(sid.to_string()));
            }
        }

        self.gossip.remove_peer(sid);
        self.reputation.unregister(sid);
        self.consensus.remove_voter(sid);

        self.gossip.broadcast(Message::new(
            MessageKind::AgentLeft,
            sid,
            serde_json::Value::Null,
        ));
        Ok(())
    }

    pub fn agent(&self, sid: &str) -> Option<Arc<Agent>> {
        self.members.read().unwrap().get(sid).cloned()
    }

    pub fn members(&self) -> Vec<Arc<Agent>> {
        self.members.read().unwrap().values().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.members.read().unwrap().len()
    }

    /// Start the coordination loops and every member agent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.gossip.start(self.shutdown_tx.subscribe());
        self.market.start(self.shutdown_tx.subscribe());

        let collective = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            // The first tick fires immediately; skip it so maintenance
            // runs on the cadence, not at startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => collective.maintain(),
                }
            }
        });

        for agent in self.members() {
            agent.start(self.shutdown_tx.subscribe())?;
        }
        Ok(())
    }

    /// Stop every agent and close the market. Permanent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        for agent in self.members() {
            agent.stop();
        }
        self.market.close();
    }

    /// Submit a task and wait for its result.
    ///
    /// The path: pending list → `task_available` broadcast → sealed
    /// auction → assignment → the winner's result sequence → reputation
    /// update → completed list → `task_completed` broadcast.
    pub async fn submit(&self, mut task: Task) -> Result<TaskResult> {
        self.tasks.write().unwrap().pending.push(task.clone());

        self.gossip.broadcast(Message::new(
            MessageKind::TaskAvailable,
            &self.id,
            serde_json::to_value(&task).unwrap_or_default(),
        ));

        let members = self.members.read().unwrap().clone();
        let assignment = self
            .market
            .assign(&task, &members, &self.reputation)
            .await?;

        task.status = TaskStatus::Assigned;
        task.assigned_to = Some(assignment.agent_sid.clone());
        {
            let mut board = self.tasks.write().unwrap();
            board.pending.retain(|pending| pending.id != task.id);
            board.active.insert(task.id.clone(), task.clone());
        }

        let agent = members
            .get(&assignment.agent_sid)
            .ok_or_else(|| CollectiveError::AgentNotFound(assignment.agent_sid.clone()))?;
        agent.submit_task(task.clone())?;

        let result = agent
            .recv_result()
            .await
            .ok_or_else(|| CollectiveError::AgentNotFound(assignment.agent_sid.clone()))?;

        if result.status == TaskStatus::Completed {
            self.reputation.record_success(&assignment.agent_sid, result.quality);
        } else {
            self.reputation.record_failure(&assignment.agent_sid);
        }

        {
            let mut board = self.tasks.write().unwrap();
            board.active.remove(&task.id);
            board.completed.push(result.clone());
        }

        self.gossip.broadcast(Message::new(
            MessageKind::TaskCompleted,
            &result.agent_sid,
            serde_json::to_value(&result).unwrap_or_default(),
        ));

        Ok(result)
    }

    /// Submit without waiting; returns the task id immediately.
    pub fn submit_async(self: &Arc<Self>, task: Task) -> String {
        let task_id = task.id.clone();
        let collective = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = collective.submit(task).await {
                tracing::warn!(error = %err, "async task submission failed");
            }
        });
        task_id
    }

    pub fn gossip(&self) -> &Arc<Gossip> {
        &self.gossip
    }

    pub fn market(&self) -> &Arc<TaskMarket> {
        &self.market
    }

    pub fn consensus(&self) -> &Arc<ConsensusEngine> {
        &self.consensus
    }

    pub fn reputation(&self) -> &Arc<ReputationRegistry> {
        &self.reputation
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn stats(&self) -> CollectiveStats {
        let board = self.tasks.read().unwrap();
        CollectiveStats {
            name: self.name.clone(),
            agent_count: self.size(),
            pending_tasks: board.pending.len(),
            active_tasks: board.active.len(),
            completed_tasks: board.completed.len(),
            avg_reputation: self.reputation.average(),
        }
    }

    fn maintain(&self) {
        self.reputation.apply_decay_all();
        self.requeue_stalled();
    }

    /// Return active tasks that have overrun twice their declared window
    /// to the pending list.
    fn requeue_stalled(&self) {
        let now = chrono::Utc::now();
        let mut board = self.tasks.write().unwrap();

        let stalled: Vec<String> = board
            .active
            .values()
            .filter(|task| {
                task.deadline
                    .map(|deadline| now - task.created_at > (deadline - task.created_at) * 2)
                    .unwrap_or(false)
            })
            .map(|task| task.id.clone())
            .collect();

        for id in stalled {
            if let Some(mut task) = board.active.remove(&id) {
                tracing::warn!(task = %id, "re-queueing stalled task");
                task.status = TaskStatus::Pending;
                task.assigned_to = None;
                board.pending.push(task);
            }
        }
    }
}

fn wire_observers(gossip: &Arc<Gossip>, events: &Arc<EventLog>) {
    let observed = [
        MessageKind::AgentJoined,
        MessageKind::AgentLeft,
        MessageKind::TaskCompleted,
        MessageKind::Consensus,
    ];
    for kind in observed {
        let log = Arc::clone(events);
        gossip.on_message(kind, move |message| {
            log.record(
                kind.as_str(),
                vec![message.from.clone()],
                format!("{} from {}", kind.as_str(), message.from),
                message.payload.clone(),
            );
        });
    }
}
