//! The single-flight agent executor.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use starling_identity::{Capability, CapabilitySet, Identity, IdentityCard};
use starling_llm::{CompletionProvider, CompletionRequest};

use crate::memory::AgentMemory;
use crate::reputation::Reputation;
use crate::task::{Task, TaskResult, TaskStatus};
use crate::{AgentError, Result};

/// Queue depth for the per-agent task and result channels.
const CHANNEL_DEPTH: usize = 10;

/// Placeholder quality for a provider-backed completion, pending a real
/// quality assessment pass.
const PROVIDER_QUALITY: f64 = 0.8;

/// Quality reported on the simulated (provider-less) path.
const SIMULATED_QUALITY: f64 = 0.75;

/// Lifecycle states of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Initializing,
    Idle,
    Working,
    Paused,
    Terminated,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Initializing => "initializing",
            AgentState::Idle => "idle",
            AgentState::Working => "working",
            AgentState::Paused => "paused",
            AgentState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Configuration for creating an agent.
#[derive(Clone, Default)]
pub struct AgentConfig {
    pub name: String,
    /// Declared skills. A bare capability kind converts in at the
    /// default proficiency.
    pub capabilities: Vec<Capability>,
    pub model: String,
    /// Parent identity for spawned children; establishes lineage.
    pub parent: Option<IdentityCard>,
    /// Completion back-end. Without one, the agent fabricates simulated
    /// results, which is the testable path.
    pub provider: Option<Arc<dyn CompletionProvider>>,
}

/// An autonomous worker agent.
///
/// One execution loop per agent, fed by a bounded task queue; results come
/// out in submission order through [`Agent::recv_result`]. All mutable
/// state sits behind the agent's own locks, independent of any collective.
pub struct Agent {
    identity: Identity,
    capabilities: CapabilitySet,
    provider: Option<Arc<dyn CompletionProvider>>,
    model: String,

    state: RwLock<AgentState>,
    current_task: RwLock<Option<Task>>,
    reputation: RwLock<Reputation>,
    memory: RwLock<AgentMemory>,

    task_tx: mpsc::Sender<Task>,
    // Taken exactly once when the run loop starts.
    task_rx: Mutex<Option<mpsc::Receiver<Task>>>,
    result_tx: mpsc::Sender<TaskResult>,
    result_rx: tokio::sync::Mutex<mpsc::Receiver<TaskResult>>,

    stop_tx: watch::Sender<bool>,
    started_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let identity = Identity::generate(config.name, config.parent.as_ref())?;

        let mut capabilities = CapabilitySet::new();
        for capability in config.capabilities {
            capabilities.add(capability);
        }

        let (task_tx, task_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (result_tx, result_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            identity,
            capabilities,
            provider: config.provider,
            model: config.model,
            state: RwLock::new(AgentState::Initializing),
            current_task: RwLock::new(None),
            reputation: RwLock::new(Reputation::new()),
            memory: RwLock::new(AgentMemory::new()),
            task_tx,
            task_rx: Mutex::new(Some(task_rx)),
            result_tx,
            result_rx: tokio::sync::Mutex::new(result_rx),
            stop_tx,
            started_at: Utc::now(),
        })
    }

    /// Begin autonomous operation. Spawns the execution loop; the agent
    /// transitions to idle and starts draining its task queue.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let task_rx = self
            .task_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(AgentError::InvalidState {
                op: "start",
                state: self.state(),
            })?;

        self.set_state(AgentState::Idle);

        let agent = Arc::clone(self);
        tokio::spawn(async move {
            agent.run(shutdown, task_rx).await;
        });
        Ok(())
    }

    /// Signal the agent to stop. The loop terminates between tasks.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Pause an idle agent. Queued tasks wait until resume.
    pub fn pause(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if *state != AgentState::Idle {
            return Err(AgentError::InvalidState {
                op: "pause",
                state: *state,
            });
        }
        *state = AgentState::Paused;
        Ok(())
    }

    /// Resume a paused agent.
    pub fn resume(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if *state != AgentState::Paused {
            return Err(AgentError::InvalidState {
                op: "resume",
                state: *state,
            });
        }
        *state = AgentState::Idle;
        Ok(())
    }

    /// Enqueue a task for execution. The queue is bounded; a full queue
    /// surfaces [`AgentError::QueueFull`] rather than blocking.
    pub fn submit_task(&self, task: Task) -> Result<()> {
        if self.state() == AgentState::Terminated {
            return Err(AgentError::Terminated);
        }
        self.task_tx.try_send(task).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => AgentError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => AgentError::Terminated,
        })
    }

    /// Await the next task result. Results arrive in submission order;
    /// the sequence is finite over the agent's lifetime.
    pub async fn recv_result(&self) -> Option<TaskResult> {
        self.result_rx.lock().await.recv().await
    }

    /// Non-blocking variant of [`Agent::recv_result`].
    pub async fn try_recv_result(&self) -> Option<TaskResult> {
        self.result_rx.lock().await.try_recv().ok()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn sid(&self) -> &str {
        self.identity.sid()
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn state(&self) -> AgentState {
        *self.state.read().unwrap()
    }

    pub fn current_task(&self) -> Option<Task> {
        self.current_task.read().unwrap().clone()
    }

    /// Snapshot of the agent's own reputation.
    pub fn reputation(&self) -> Reputation {
        self.reputation.read().unwrap().clone()
    }

    /// Snapshot of the agent's memory.
    pub fn memory(&self) -> AgentMemory {
        self.memory.read().unwrap().clone()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn set_state(&self, state: AgentState) {
        *self.state.write().unwrap() = state;
    }

    async fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut tasks: mpsc::Receiver<Task>,
    ) {
        let mut stop = self.stop_tx.subscribe();
        if *stop.borrow() {
            self.set_state(AgentState::Terminated);
            return;
        }
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = stop.changed() => break,
                task = tasks.recv() => match task {
                    Some(task) => self.execute(task).await,
                    None => break,
                },
            }
        }
        self.set_state(AgentState::Terminated);
        tracing::debug!(agent = self.identity.short_id(), "agent terminated");
    }

    async fn execute(&self, mut task: Task) {
        let started = Instant::now();
        task.status = TaskStatus::Running;

        self.set_state(AgentState::Working);
        *self.current_task.write().unwrap() = Some(task.clone());

        let (status, output, error, quality) = self.perform(&task).await;
        let result = TaskResult {
            task_id: task.id.clone(),
            agent_sid: self.identity.sid().to_string(),
            status,
            output,
            error,
            quality,
            duration: started.elapsed(),
            timestamp: Utc::now(),
        };

        self.set_state(AgentState::Idle);
        *self.current_task.write().unwrap() = None;

        {
            let mut reputation = self.reputation.write().unwrap();
            if status == TaskStatus::Completed {
                reputation.record_success(quality);
            } else {
                reputation.record_failure();
            }
        }

        self.memory.write().unwrap().add_episode(
            "task_completion",
            format!("completed task: {}", task.description),
            serde_json::json!({
                "task_id": task.id,
                "quality": quality,
                "status": status,
            }),
            quality,
        );

        if self.result_tx.try_send(result).is_err() {
            tracing::warn!(
                agent = self.identity.short_id(),
                task = %task.id,
                "result channel full, dropping result"
            );
        }
    }

    async fn perform(&self, task: &Task) -> (TaskStatus, String, Option<String>, f64) {
        let Some(provider) = &self.provider else {
            return (
                TaskStatus::Completed,
                format!("[simulated] completed: {}", task.description),
                None,
                SIMULATED_QUALITY,
            );
        };

        let request = CompletionRequest {
            model: self.model.clone(),
            prompt: self.build_prompt(task),
            ..Default::default()
        };

        match provider.complete(request).await {
            Ok(response) => (TaskStatus::Completed, response.content, None, PROVIDER_QUALITY),
            Err(err) => {
                tracing::warn!(
                    agent = self.identity.short_id(),
                    task = %task.id,
                    error = %err,
                    "completion provider failed"
                );
                (TaskStatus::Failed, String::new(), Some(err.to_string()), 0.0)
            }
        }
    }

    fn build_prompt(&self, task: &Task) -> String {
        let capabilities =
            serde_json::to_string(&self.capabilities).unwrap_or_else(|_| "{}".into());

        format!(
            "You are an autonomous agent with the following identity:\n\
             Name: {}\n\
             Id: {}\n\
             Capabilities: {}\n\n\
             Your task:\n{}\n\n\
             Requirements:\n{}\n\n\
             Perform this task to the best of your ability. Be thorough and precise.",
            self.identity.name(),
            self.identity.sid(),
            capabilities,
            task.description,
            task.requirements,
        )
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("sid", &self.identity.sid())
            .field("name", &self.identity.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
