//! Sealed-interval task auction.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use starling_agent::{Agent, AgentState, Task};

use crate::registry::ReputationRegistry;
use crate::{CoordinationError, Result};

/// Minimum capability match for an agent to enter the auction.
const MIN_CAPABILITY_SCORE: f64 = 0.5;

/// Fraction of overall reputation a bidder puts at stake.
const STAKE_FRACTION: f64 = 0.1;

/// Overall score assumed for bidders the registry does not know.
const DEFAULT_OVERALL: f64 = 50.0;

/// Guard against a zero capability score in the time estimate.
const SCORE_EPSILON: f64 = 1e-6;

/// An agent's bid on a listed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub agent_sid: String,
    pub task_id: String,
    /// Capability match against the task's requirements, in [0, 1].
    pub capability_score: f64,
    /// Reputation units the bidder offers, in [0, 100].
    pub reputation_stake: f64,
    pub estimated_time: Duration,
    pub timestamp: chrono::DateTime<Utc>,
}

/// The settled outcome of an auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: String,
    pub agent_sid: String,
    pub bid: Bid,
}

/// Market counters.
#[derive(Debug, Clone, Copy)]
pub struct MarketStats {
    pub active_listings: usize,
    pub total_bids: usize,
    pub avg_bids_per_task: f64,
}

struct MarketState {
    listings: HashMap<String, Task>,
    bids: HashMap<String, Vec<Bid>>,
    closed: bool,
}

/// Decentralised task allocation through a sealed-interval auction.
///
/// A listed task collects bids for the bid window, then the highest
/// composite scorer wins: 40% capability match, 40% registry reputation,
/// 20% offered stake. Ties settle on earlier bids, then lexicographic sid.
pub struct TaskMarket {
    state: RwLock<MarketState>,
    bid_window: RwLock<Duration>,
}

impl Default for TaskMarket {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskMarket {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MarketState {
                listings: HashMap::new(),
                bids: HashMap::new(),
                closed: false,
            }),
            bid_window: RwLock::new(Duration::from_secs(5)),
        }
    }

    /// Narrow or widen the sealed auction window.
    pub fn set_bid_window(&self, window: Duration) {
        *self.bid_window.write().unwrap() = window;
    }

    /// Add a task to the market and open its bid bucket.
    pub fn list_task(&self, task: &Task) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.closed {
            return Err(CoordinationError::MarketClosed);
        }
        state.listings.insert(task.id.clone(), task.clone());
        state.bids.insert(task.id.clone(), Vec::new());
        Ok(())
    }

    /// Remove a task and its bids.
    pub fn unlist_task(&self, task_id: &str) {
        let mut state = self.state.write().unwrap();
        state.listings.remove(task_id);
        state.bids.remove(task_id);
    }

    pub fn get_listing(&self, task_id: &str) -> Option<Task> {
        self.state.read().unwrap().listings.get(task_id).cloned()
    }

    pub fn listings(&self) -> Vec<Task> {
        self.state.read().unwrap().listings.values().cloned().collect()
    }

    /// Submit a bid on a listed task. The timestamp is server-stamped.
    pub fn submit_bid(&self, mut bid: Bid) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.closed {
            return Err(CoordinationError::MarketClosed);
        }
        if !state.listings.contains_key(&bid.task_id) {
            return Err(CoordinationError::TaskNotFound(bid.task_id));
        }
        bid.timestamp = Utc::now();
        state.bids.entry(bid.task_id.clone()).or_default().push(bid);
        Ok(())
    }

    pub fn bids(&self, task_id: &str) -> Vec<Bid> {
        self.state
            .read()
            .unwrap()
            .bids
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Run the full auction for `task`: list it, synthesise bids from
    /// qualifying idle agents, hold the sealed bid window, then settle on
    /// the best composite score.
    ///
    /// Qualifying means idle with a capability match strictly above 0.5;
    /// each bid stakes 10% of the bidder's registry reputation and
    /// estimates completion as the complexity baseline shrunk by the
    /// match score.
    pub async fn assign(
        &self,
        task: &Task,
        agents: &HashMap<String, Arc<Agent>>,
        registry: &ReputationRegistry,
    ) -> Result<TaskAssignment> {
        self.list_task(task)?;

        for (sid, agent) in agents {
            if agent.state() != AgentState::Idle {
                continue;
            }

            let score = agent.capabilities().match_score(&task.required);
            if score > MIN_CAPABILITY_SCORE {
                let overall = registry.get(sid).map(|rep| rep.overall).unwrap_or(DEFAULT_OVERALL);
                let bid = Bid {
                    agent_sid: sid.clone(),
                    task_id: task.id.clone(),
                    capability_score: score,
                    reputation_stake: overall * STAKE_FRACTION,
                    estimated_time: estimate_time(task, score),
                    timestamp: Utc::now(),
                };
                // A concurrently-closed market just means no bid lands.
                let _ = self.submit_bid(bid);
            }
        }

        // The sealed auction window. Copy the duration out so no lock
        // guard lives across the await.
        let window = *self.bid_window.read().unwrap();
        tokio::time::sleep(window).await;

        self.select_best_bid(&task.id, registry)
    }

    /// Start the periodic cleanup sweep.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let market = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => market.cleanup(),
                }
            }
        });
    }

    /// Close the market permanently. Callers must treat a closed market as
    /// draining.
    pub fn close(&self) {
        self.state.write().unwrap().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().unwrap().closed
    }

    pub fn stats(&self) -> MarketStats {
        let state = self.state.read().unwrap();
        let total_bids: usize = state.bids.values().map(Vec::len).sum();
        let avg = if state.listings.is_empty() {
            0.0
        } else {
            total_bids as f64 / state.listings.len() as f64
        };
        MarketStats {
            active_listings: state.listings.len(),
            total_bids,
            avg_bids_per_task: avg,
        }
    }

    fn select_best_bid(&self, task_id: &str, registry: &ReputationRegistry) -> Result<TaskAssignment> {
        let state = self.state.read().unwrap();
        let bids = state.bids.get(task_id).map(Vec::as_slice).unwrap_or(&[]);
        if bids.is_empty() {
            return Err(CoordinationError::NoBids);
        }

        let mut scored: Vec<(f64, &Bid)> = bids
            .iter()
            .map(|bid| {
                let overall = registry
                    .get(&bid.agent_sid)
                    .map(|rep| rep.overall)
                    .unwrap_or(DEFAULT_OVERALL);
                let score = bid.capability_score * 0.4
                    + (overall / 100.0) * 0.4
                    + (bid.reputation_stake / 100.0) * 0.2;
                (score, bid)
            })
            .collect();

        scored.sort_by(|(score_a, bid_a), (score_b, bid_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| bid_a.timestamp.cmp(&bid_b.timestamp))
                .then_with(|| bid_a.agent_sid.cmp(&bid_b.agent_sid))
        });

        let winner = scored[0].1.clone();
        Ok(TaskAssignment {
            task_id: task_id.to_string(),
            agent_sid: winner.agent_sid.clone(),
            bid: winner,
        })
    }

    fn cleanup(&self) {
        let mut state = self.state.write().unwrap();
        let now = Utc::now();
        let expired: Vec<String> = state
            .listings
            .iter()
            .filter(|(_, task)| {
                task.deadline.map(|deadline| now > deadline).unwrap_or(false)
                    || now - task.created_at > chrono::Duration::hours(1)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            tracing::debug!(task = %id, "sweeping expired listing");
            state.listings.remove(&id);
            state.bids.remove(&id);
        }
    }
}

fn estimate_time(task: &Task, capability_score: f64) -> Duration {
    let base = task.complexity.base_duration().as_secs_f64();
    Duration::from_secs_f64(base / capability_score.max(SCORE_EPSILON))
}

#[cfg(test)]
mod tests {
    use super::*;
    use starling_agent::{AgentConfig, Complexity};
    use starling_identity::{Capability, CapabilityKind};
    use std::time::Instant;

    fn listed_market(task: &Task) -> TaskMarket {
        let market = TaskMarket::new();
        market.list_task(task).unwrap();
        market
    }

    fn bid(task_id: &str, sid: &str, capability: f64, stake: f64) -> Bid {
        Bid {
            agent_sid: sid.to_string(),
            task_id: task_id.to_string(),
            capability_score: capability,
            reputation_stake: stake,
            estimated_time: Duration::from_secs(60),
            timestamp: Utc::now(),
        }
    }

    async fn idle_agent(
        name: &str,
        caps: &[(CapabilityKind, f64)],
    ) -> (Arc<Agent>, watch::Sender<bool>) {
        let agent = Arc::new(
            Agent::new(AgentConfig {
                name: name.into(),
                capabilities: caps
                    .iter()
                    .map(|&(kind, proficiency)| Capability::new(kind, proficiency))
                    .collect(),
                ..Default::default()
            })
            .unwrap(),
        );
        let (tx, rx) = watch::channel(false);
        agent.start(rx).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        (agent, tx)
    }

    #[test]
    fn listing_and_bidding() {
        let task = Task::new("work", vec![CapabilityKind::CodeWrite]);
        let market = listed_market(&task);

        market.submit_bid(bid(&task.id, "agent-1", 0.8, 5.0)).unwrap();
        assert_eq!(market.bids(&task.id).len(), 1);
        assert_eq!(market.stats().active_listings, 1);

        market.unlist_task(&task.id);
        assert!(market.get_listing(&task.id).is_none());
        assert!(market.bids(&task.id).is_empty());
    }

    #[test]
    fn bid_on_unknown_task_rejected() {
        let market = TaskMarket::new();
        let err = market.submit_bid(bid("missing", "agent-1", 0.8, 5.0)).unwrap_err();
        assert!(matches!(err, CoordinationError::TaskNotFound(_)));
    }

    #[test]
    fn closed_market_rejects_everything() {
        let task = Task::new("late", vec![]);
        let market = TaskMarket::new();
        market.close();

        assert!(matches!(
            market.list_task(&task),
            Err(CoordinationError::MarketClosed)
        ));
        assert!(matches!(
            market.submit_bid(bid(&task.id, "a", 0.9, 1.0)),
            Err(CoordinationError::MarketClosed)
        ));
        assert!(market.is_closed());
    }

    #[test]
    fn best_bid_by_composite_score() {
        let registry = ReputationRegistry::default();
        registry.register("weak");
        registry.register("strong");
        registry.record_success("strong", 1.0);

        let task = Task::new("pick me", vec![]);
        let market = listed_market(&task);

        market.submit_bid(bid(&task.id, "weak", 0.6, 5.0)).unwrap();
        market.submit_bid(bid(&task.id, "strong", 0.9, 5.2)).unwrap();

        let assignment = market.select_best_bid(&task.id, &registry).unwrap();
        assert_eq!(assignment.agent_sid, "strong");
        assert!(assignment.bid.capability_score > 0.5);
    }

    #[test]
    fn ties_break_on_time_then_sid() {
        let registry = ReputationRegistry::default();
        let task = Task::new("tied", vec![]);
        let market = listed_market(&task);

        // Identical scores; the earlier submission wins.
        market.submit_bid(bid(&task.id, "later", 0.8, 5.0)).unwrap();
        let first = market.select_best_bid(&task.id, &registry).unwrap();
        assert_eq!(first.agent_sid, "later");

        market.submit_bid(bid(&task.id, "earlier-sid", 0.8, 5.0)).unwrap();
        let assignment = market.select_best_bid(&task.id, &registry).unwrap();
        assert_eq!(assignment.agent_sid, "later");
    }

    #[test]
    fn no_bids_error() {
        let registry = ReputationRegistry::default();
        let task = Task::new("lonely", vec![]);
        let market = listed_market(&task);

        assert!(matches!(
            market.select_best_bid(&task.id, &registry),
            Err(CoordinationError::NoBids)
        ));
    }

    #[test]
    fn estimate_scales_with_complexity_and_score() {
        let low = Task::new("a", vec![]).with_complexity(Complexity::Low);
        let high = Task::new("b", vec![]).with_complexity(Complexity::High);

        assert_eq!(estimate_time(&low, 1.0), Duration::from_secs(60));
        assert_eq!(estimate_time(&high, 0.5), Duration::from_secs(3600));
        // A zero score does not blow up the estimate.
        assert!(estimate_time(&low, 0.0).as_secs_f64().is_finite());
    }

    #[tokio::test]
    async fn assign_selects_qualified_idle_agent() {
        let registry = ReputationRegistry::default();
        let market = TaskMarket::new();
        market.set_bid_window(Duration::from_millis(50));

        let (coder, _coder_shutdown) = idle_agent("coder", &[(CapabilityKind::CodeWrite, 0.8)]).await;
        let (auditor, _auditor_shutdown) =
            idle_agent("auditor", &[(CapabilityKind::Security, 0.9)]).await;
        registry.register(coder.sid());
        registry.register(auditor.sid());

        let mut agents = HashMap::new();
        agents.insert(coder.sid().to_string(), coder.clone());
        agents.insert(auditor.sid().to_string(), auditor.clone());

        // Only the coder qualifies: the auditor's match is 0.0.
        let task = Task::new("implement feature", vec![CapabilityKind::CodeWrite]);
        let started = Instant::now();
        let assignment = market.assign(&task, &agents, &registry).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(assignment.agent_sid, coder.sid());
        assert!(assignment.bid.capability_score > 0.5);
        assert!((assignment.bid.reputation_stake - 5.0).abs() < 1e-9);
        // The sealed window was honoured but not grossly exceeded.
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn assign_with_no_qualifying_agents_is_no_bids() {
        let registry = ReputationRegistry::default();
        let market = TaskMarket::new();
        market.set_bid_window(Duration::from_millis(20));

        let (researcher, _shutdown) =
            idle_agent("researcher", &[(CapabilityKind::Research, 0.9)]).await;
        registry.register(researcher.sid());

        let mut agents = HashMap::new();
        agents.insert(researcher.sid().to_string(), researcher);

        let task = Task::new("audit", vec![CapabilityKind::Security]);
        assert!(matches!(
            market.assign(&task, &agents, &registry).await,
            Err(CoordinationError::NoBids)
        ));
    }

    #[tokio::test]
    async fn busy_agents_do_not_bid() {
        let registry = ReputationRegistry::default();
        let market = TaskMarket::new();
        market.set_bid_window(Duration::from_millis(20));

        // Never started: the agent is still initializing, not idle.
        let idle_never = Arc::new(
            Agent::new(AgentConfig {
                name: "initializing".into(),
                capabilities: vec![Capability::new(CapabilityKind::CodeWrite, 0.9)],
                ..Default::default()
            })
            .unwrap(),
        );
        registry.register(idle_never.sid());

        let mut agents = HashMap::new();
        agents.insert(idle_never.sid().to_string(), idle_never);

        let task = Task::new("needs idle", vec![CapabilityKind::CodeWrite]);
        assert!(matches!(
            market.assign(&task, &agents, &registry).await,
            Err(CoordinationError::NoBids)
        ));
    }

    #[test]
    fn cleanup_sweeps_expired_listings() {
        let market = TaskMarket::new();

        let stale = Task {
            created_at: Utc::now() - chrono::Duration::hours(2),
            ..Task::new("stale", vec![])
        };
        let overdue = Task::new("overdue", vec![])
            .with_deadline(Utc::now() - chrono::Duration::minutes(1));
        let fresh = Task::new("fresh", vec![]);

        market.list_task(&stale).unwrap();
        market.list_task(&overdue).unwrap();
        market.list_task(&fresh).unwrap();

        market.cleanup();

        let remaining = market.listings();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, fresh.id);
    }
}
