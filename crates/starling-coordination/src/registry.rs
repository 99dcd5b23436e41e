//! Collective-wide reputation store and event history.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use starling_agent::Reputation;

/// A rater must hold at least this much overall reputation for its peer
/// ratings to be admitted.
const MIN_RATER_OVERALL: f64 = 30.0;

/// Events retained per agent.
const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationEventKind {
    TaskSuccess,
    TaskFailure,
    PeerRating,
    Decay,
}

/// A recorded reputation change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationEvent {
    pub agent_sid: String,
    pub kind: ReputationEventKind,
    /// Change to the overall score.
    pub delta: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

struct RegistryState {
    scores: HashMap<String, Reputation>,
    history: HashMap<String, VecDeque<ReputationEvent>>,
}

/// Serialisable store of every member's reputation.
///
/// All operations take the registry-wide lock; reputations here are
/// mutated only through the recorded events below.
pub struct ReputationRegistry {
    state: RwLock<RegistryState>,
    decay_rate: f64,
}

impl Default for ReputationRegistry {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl ReputationRegistry {
    pub fn new(decay_rate: f64) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                scores: HashMap::new(),
                history: HashMap::new(),
            }),
            decay_rate,
        }
    }

    /// Register an agent at the baseline reputation.
    pub fn register(&self, sid: impl Into<String>) {
        let sid = sid.into();
        let mut state = self.state.write().unwrap();
        state
            .scores
            .insert(sid.clone(), Reputation::new().with_decay_rate(self.decay_rate));
        state.history.insert(sid, VecDeque::new());
    }

    pub fn unregister(&self, sid: &str) {
        let mut state = self.state.write().unwrap();
        state.scores.remove(sid);
        state.history.remove(sid);
    }

    pub fn get(&self, sid: &str) -> Option<Reputation> {
        self.state.read().unwrap().scores.get(sid).cloned()
    }

    pub fn get_all(&self) -> HashMap<String, Reputation> {
        self.state.read().unwrap().scores.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().unwrap().scores.is_empty()
    }

    /// Record a successful task completion with output quality `q`.
    pub fn record_success(&self, sid: &str, quality: f64) {
        let mut state = self.state.write().unwrap();
        let Some(rep) = state.scores.get_mut(sid) else {
            return;
        };
        let before = rep.overall;
        rep.record_success(quality);
        let delta = rep.overall - before;
        Self::push_event(
            &mut state,
            sid,
            ReputationEventKind::TaskSuccess,
            delta,
            "task completed successfully".into(),
        );
    }

    /// Record a failed task.
    pub fn record_failure(&self, sid: &str) {
        let mut state = self.state.write().unwrap();
        let Some(rep) = state.scores.get_mut(sid) else {
            return;
        };
        let before = rep.overall;
        rep.record_failure();
        let delta = rep.overall - before;
        Self::push_event(
            &mut state,
            sid,
            ReputationEventKind::TaskFailure,
            delta,
            "task failed".into(),
        );
    }

    /// Record a peer rating of `sid` by `rater_sid`. Ratings from unknown
    /// raters, or raters below the minimum stake, are dropped.
    pub fn record_peer_rating(&self, sid: &str, rater_sid: &str, rating: f64) {
        let mut state = self.state.write().unwrap();

        let rater_overall = match state.scores.get(rater_sid) {
            Some(rater) if rater.overall >= MIN_RATER_OVERALL => rater.overall,
            _ => return,
        };

        let Some(rep) = state.scores.get_mut(sid) else {
            return;
        };
        let before = rep.overall;
        rep.record_peer_rating(rating, rater_overall);
        let delta = rep.overall - before;
        Self::push_event(
            &mut state,
            sid,
            ReputationEventKind::PeerRating,
            delta,
            format!("rated by peer {rater_sid}"),
        );
    }

    /// Apply time decay to every registered agent.
    pub fn apply_decay_all(&self) {
        let mut state = self.state.write().unwrap();
        let sids: Vec<String> = state.scores.keys().cloned().collect();
        for sid in sids {
            let Some(rep) = state.scores.get_mut(&sid) else {
                continue;
            };
            let before = rep.overall;
            rep.apply_decay();
            let delta = rep.overall - before;
            if delta != 0.0 {
                Self::push_event(
                    &mut state,
                    &sid,
                    ReputationEventKind::Decay,
                    delta,
                    "time-based decay".into(),
                );
            }
        }
    }

    pub fn history(&self, sid: &str) -> Vec<ReputationEvent> {
        self.state
            .read()
            .unwrap()
            .history
            .get(sid)
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The top `n` agents by overall score, best first.
    pub fn top_n(&self, n: usize) -> Vec<String> {
        let state = self.state.read().unwrap();
        let mut ranked: Vec<(&String, f64)> = state
            .scores
            .iter()
            .map(|(sid, rep)| (sid, rep.overall))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.into_iter().take(n).map(|(sid, _)| sid.clone()).collect()
    }

    /// Mean overall score across all registered agents; 0.0 when empty.
    pub fn average(&self) -> f64 {
        let state = self.state.read().unwrap();
        if state.scores.is_empty() {
            return 0.0;
        }
        let total: f64 = state.scores.values().map(|rep| rep.overall).sum();
        total / state.scores.len() as f64
    }

    /// Direct mutation escape hatch for maintenance paths (e.g. seeding a
    /// last-active timestamp in tests). Keeps the single-lock discipline.
    pub fn with_reputation_mut<F: FnOnce(&mut Reputation)>(&self, sid: &str, f: F) {
        let mut state = self.state.write().unwrap();
        if let Some(rep) = state.scores.get_mut(sid) {
            f(rep);
        }
    }

    fn push_event(
        state: &mut RegistryState,
        sid: &str,
        kind: ReputationEventKind,
        delta: f64,
        reason: String,
    ) {
        let events = state.history.entry(sid.to_string()).or_default();
        events.push_back(ReputationEvent {
            agent_sid: sid.to_string(),
            kind,
            delta,
            reason,
            timestamp: Utc::now(),
        });
        while events.len() > HISTORY_CAPACITY {
            events.pop_front();
        }
    }
}
