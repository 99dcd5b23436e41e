//! Threshold voting with early termination.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use starling_identity::{ConsensusProof, Identity};

use crate::{CoordinationError, Result};

/// How often `wait` re-evaluates a pending round.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a collective can be asked to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    TaskAssignment,
    AgentSpawn,
    AgentTerminate,
    ParameterChange,
}

/// A proposal put before the collective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub kind: ProposalKind,
    /// Sid of the proposing agent.
    pub proposer: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A signed vote on a proposal.
///
/// The signature covers the canonical vote bytes
/// (`voter:proposal:value`) and must verify under the voter's registered
/// public key before the vote is admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub voter_sid: String,
    pub proposal_id: String,
    /// true = accept, false = reject.
    pub value: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(with = "signature_bytes")]
    pub signature: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Vote {
    /// Create a vote signed by `voter`.
    pub fn signed(
        voter: &Identity,
        proposal_id: impl Into<String>,
        value: bool,
        reason: impl Into<String>,
    ) -> Self {
        let proposal_id = proposal_id.into();
        let message = vote_message(voter.sid(), &proposal_id, value);
        Self {
            voter_sid: voter.sid().to_string(),
            proposal_id,
            value,
            reason: reason.into(),
            signature: voter.sign(&message).to_vec(),
            timestamp: Utc::now(),
        }
    }
}

fn vote_message(voter_sid: &str, proposal_id: &str, value: bool) -> Vec<u8> {
    format!("{voter_sid}:{proposal_id}:{value}").into_bytes()
}

/// Terminal and non-terminal round states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundResult {
    Pending,
    Accepted,
    Rejected,
    Timeout,
}

impl RoundResult {
    pub fn is_terminal(&self) -> bool {
        *self != RoundResult::Pending
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoundResult::Pending => "pending",
            RoundResult::Accepted => "accepted",
            RoundResult::Rejected => "rejected",
            RoundResult::Timeout => "timeout",
        }
    }
}

/// A single round of consensus. Threshold and timeout are frozen at
/// round creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRound {
    pub proposal: Proposal,
    /// Votes keyed by voter sid; a later vote replaces an earlier one.
    pub votes: HashMap<String, Vote>,
    pub threshold: f64,
    pub timeout: Duration,
    pub started_at: DateTime<Utc>,
    pub result: RoundResult,
}

impl ConsensusRound {
    fn tally(&self) -> (usize, usize) {
        let accepts = self.votes.values().filter(|vote| vote.value).count();
        (accepts, self.votes.len() - accepts)
    }
}

/// Tally of rounds by state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusStats {
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub timeout: usize,
}

type ProposalCallback = Arc<dyn Fn(&Proposal) + Send + Sync>;

struct EngineState {
    rounds: HashMap<String, ConsensusRound>,
    voters: HashMap<String, VerifyingKey>,
    threshold: f64,
    timeout: Duration,
}

/// The threshold voting machine.
///
/// A round accepts once accept-votes reach `max(1, floor(total ×
/// threshold))`, rejects early once no reachable outcome could accept,
/// and times out on its frozen wall-clock budget. Accept/reject callbacks
/// fire exactly once per round, outside the engine lock.
pub struct ConsensusEngine {
    state: RwLock<EngineState>,
    on_accept: RwLock<Option<ProposalCallback>>,
    on_reject: RwLock<Option<ProposalCallback>>,
}

impl ConsensusEngine {
    pub fn new(threshold: f64) -> Self {
        Self {
            state: RwLock::new(EngineState {
                rounds: HashMap::new(),
                voters: HashMap::new(),
                threshold,
                timeout: Duration::from_secs(30),
            }),
            on_accept: RwLock::new(None),
            on_reject: RwLock::new(None),
        }
    }

    /// Change the threshold for future rounds. Open rounds keep theirs.
    pub fn set_threshold(&self, threshold: f64) {
        self.state.write().unwrap().threshold = threshold;
    }

    /// Change the timeout for future rounds.
    pub fn set_timeout(&self, timeout: Duration) {
        self.state.write().unwrap().timeout = timeout;
    }

    /// Register a voter's public key. Votes from unregistered voters are
    /// rejected.
    pub fn register_voter(&self, sid: impl Into<String>, key: VerifyingKey) {
        self.state.write().unwrap().voters.insert(sid.into(), key);
    }

    pub fn remove_voter(&self, sid: &str) {
        self.state.write().unwrap().voters.remove(sid);
    }

    pub fn on_accept<F: Fn(&Proposal) + Send + Sync + 'static>(&self, callback: F) {
        *self.on_accept.write().unwrap() = Some(Arc::new(callback));
    }

    pub fn on_reject<F: Fn(&Proposal) + Send + Sync + 'static>(&self, callback: F) {
        *self.on_reject.write().unwrap() = Some(Arc::new(callback));
    }

    /// Open a consensus round. The proposer's accept vote is recorded
    /// automatically (and signed like any other vote).
    pub fn propose(
        &self,
        proposer: &Identity,
        kind: ProposalKind,
        data: serde_json::Value,
    ) -> Result<ConsensusRound> {
        let proposal = Proposal {
            id: Uuid::new_v4().to_string(),
            kind,
            proposer: proposer.sid().to_string(),
            data,
            created_at: Utc::now(),
        };

        let round = {
            let mut state = self.state.write().unwrap();
            state
                .voters
                .insert(proposer.sid().to_string(), proposer.verifying_key());

            let round = ConsensusRound {
                proposal: proposal.clone(),
                votes: HashMap::new(),
                threshold: state.threshold,
                timeout: state.timeout,
                started_at: Utc::now(),
                result: RoundResult::Pending,
            };
            state.rounds.insert(proposal.id.clone(), round.clone());
            round
        };

        self.submit_vote(Vote::signed(proposer, &proposal.id, true, "proposer"))?;
        Ok(round)
    }

    /// Record a vote. Upserts by voter: a later vote from the same agent
    /// replaces the earlier one. Votes that fail signature verification
    /// never enter the round.
    pub fn submit_vote(&self, mut vote: Vote) -> Result<()> {
        let mut state = self.state.write().unwrap();

        let Some(key) = state.voters.get(&vote.voter_sid).copied() else {
            return Err(CoordinationError::InvalidState(format!(
                "unknown voter {}",
                vote.voter_sid
            )));
        };
        if !verify_vote(&vote, &key) {
            return Err(CoordinationError::InvalidState(format!(
                "vote signature from {} did not verify",
                vote.voter_sid
            )));
        }

        let round = state
            .rounds
            .get_mut(&vote.proposal_id)
            .ok_or_else(|| CoordinationError::ProposalNotFound(vote.proposal_id.clone()))?;

        if round.result.is_terminal() {
            return Err(CoordinationError::InvalidState(
                "consensus already reached".into(),
            ));
        }

        vote.timestamp = Utc::now();
        round.votes.insert(vote.voter_sid.clone(), vote);
        Ok(())
    }

    /// Evaluate a round against the current voter population.
    ///
    /// Returns `(reached, result)` where `reached` is true only for
    /// acceptance. Terminal results are cached; the transition callbacks
    /// fire exactly once.
    pub fn check(&self, proposal_id: &str, total_voters: usize) -> Result<(bool, RoundResult)> {
        let (outcome, callback_proposal) = {
            let mut state = self.state.write().unwrap();
            let round = state
                .rounds
                .get_mut(proposal_id)
                .ok_or_else(|| CoordinationError::ProposalNotFound(proposal_id.to_string()))?;

            if round.result.is_terminal() {
                return Ok((round.result == RoundResult::Accepted, round.result));
            }

            let elapsed = (Utc::now() - round.started_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed > round.timeout {
                round.result = RoundResult::Timeout;
                ((false, RoundResult::Timeout), Some((false, round.proposal.clone())))
            } else {
                let (accepts, _rejects) = round.tally();
                let required = ((total_voters as f64 * round.threshold) as usize).max(1);

                if accepts >= required {
                    round.result = RoundResult::Accepted;
                    ((true, RoundResult::Accepted), Some((true, round.proposal.clone())))
                } else if accepts + (total_voters.saturating_sub(round.votes.len())) < required {
                    // No reachable outcome can accept any more.
                    round.result = RoundResult::Rejected;
                    ((false, RoundResult::Rejected), Some((false, round.proposal.clone())))
                } else {
                    ((false, RoundResult::Pending), None)
                }
            }
        };

        if let Some((accepted, proposal)) = callback_proposal {
            let callback = if accepted {
                self.on_accept.read().unwrap().clone()
            } else {
                self.on_reject.read().unwrap().clone()
            };
            if let Some(callback) = callback {
                callback(&proposal);
            }
        }

        Ok(outcome)
    }

    /// Poll until the round settles or the shutdown token fires. A timed
    /// out round surfaces as [`CoordinationError::ConsensusTimeout`].
    pub async fn wait(
        &self,
        proposal_id: &str,
        total_voters: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<bool> {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Err(CoordinationError::Cancelled),
                _ = ticker.tick() => {
                    let (reached, result) = self.check(proposal_id, total_voters)?;
                    match result {
                        RoundResult::Pending => continue,
                        RoundResult::Timeout => return Err(CoordinationError::ConsensusTimeout),
                        _ => return Ok(reached),
                    }
                }
            }
        }
    }

    /// Like [`ConsensusEngine::wait`], but a settled rejection surfaces as
    /// [`CoordinationError::InsufficientVotes`].
    pub async fn wait_accepted(
        &self,
        proposal_id: &str,
        total_voters: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        if self.wait(proposal_id, total_voters, shutdown).await? {
            Ok(())
        } else {
            Err(CoordinationError::InsufficientVotes)
        }
    }

    pub fn round(&self, proposal_id: &str) -> Option<ConsensusRound> {
        self.state.read().unwrap().rounds.get(proposal_id).cloned()
    }

    pub fn rounds(&self) -> Vec<ConsensusRound> {
        self.state.read().unwrap().rounds.values().cloned().collect()
    }

    /// Audit summary of a settled round.
    pub fn proof(&self, proposal_id: &str) -> Result<ConsensusProof> {
        let state = self.state.read().unwrap();
        let round = state
            .rounds
            .get(proposal_id)
            .ok_or_else(|| CoordinationError::ProposalNotFound(proposal_id.to_string()))?;

        let (accepts, rejects) = round.tally();
        Ok(ConsensusProof {
            proposal_id: proposal_id.to_string(),
            accepts,
            rejects,
            threshold: round.threshold,
            result: round.result.as_str().to_string(),
            timestamp: Utc::now(),
        })
    }

    /// Drop settled rounds older than `max_age`.
    pub fn cleanup_rounds(&self, max_age: Duration) {
        let mut state = self.state.write().unwrap();
        let now = Utc::now();
        state.rounds.retain(|_, round| {
            !(round.result.is_terminal()
                && (now - round.started_at).to_std().unwrap_or(Duration::ZERO) > max_age)
        });
    }

    pub fn stats(&self) -> ConsensusStats {
        let state = self.state.read().unwrap();
        let mut stats = ConsensusStats::default();
        for round in state.rounds.values() {
            match round.result {
                RoundResult::Pending => stats.pending += 1,
                RoundResult::Accepted => stats.accepted += 1,
                RoundResult::Rejected => stats.rejected += 1,
                RoundResult::Timeout => stats.timeout += 1,
            }
        }
        stats
    }
}

fn verify_vote(vote: &Vote, key: &VerifyingKey) -> bool {
    let Ok(signature) = Signature::from_slice(&vote.signature) else {
        return false;
    };
    let message = vote_message(&vote.voter_sid, &vote.proposal_id, vote.value);
    key.verify(&message, &signature).is_ok()
}

mod signature_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn voter(name: &str) -> Identity {
        Identity::generate(name, None).unwrap()
    }

    fn engine_with(voters: &[&Identity], threshold: f64) -> ConsensusEngine {
        let engine = ConsensusEngine::new(threshold);
        for voter in voters {
            engine.register_voter(voter.sid(), voter.verifying_key());
        }
        engine
    }

    #[test]
    fn propose_records_proposer_vote() {
        let proposer = voter("p1");
        let engine = engine_with(&[&proposer], 0.67);

        let round = engine
            .propose(&proposer, ProposalKind::TaskAssignment, serde_json::json!({"task": "t"}))
            .unwrap();
        assert_eq!(round.proposal.proposer, proposer.sid());
        assert_eq!(round.result, RoundResult::Pending);

        let stored = engine.round(&round.proposal.id).unwrap();
        assert_eq!(stored.votes.len(), 1);
        assert!(stored.votes[proposer.sid()].value);
    }

    #[test]
    fn threshold_acceptance() {
        let p1 = voter("p1");
        let p2 = voter("p2");
        let engine = engine_with(&[&p1, &p2], 0.67);

        let round = engine
            .propose(&p1, ProposalKind::TaskAssignment, serde_json::Value::Null)
            .unwrap();

        // 3 voters at 0.67 requires 2 accepts; the proposer has 1.
        let (reached, result) = engine.check(&round.proposal.id, 3).unwrap();
        assert!(!reached);
        assert_eq!(result, RoundResult::Pending);

        engine
            .submit_vote(Vote::signed(&p2, &round.proposal.id, true, "approved"))
            .unwrap();
        let (reached, result) = engine.check(&round.proposal.id, 3).unwrap();
        assert!(reached);
        assert_eq!(result, RoundResult::Accepted);
    }

    #[test]
    fn early_rejection_when_outcome_unreachable() {
        let p1 = voter("p1");
        let p2 = voter("p2");
        let p3 = voter("p3");
        let engine = engine_with(&[&p1, &p2, &p3], 0.67);

        let round = engine
            .propose(&p1, ProposalKind::AgentSpawn, serde_json::Value::Null)
            .unwrap();

        engine
            .submit_vote(Vote::signed(&p2, &round.proposal.id, false, "no"))
            .unwrap();
        engine
            .submit_vote(Vote::signed(&p3, &round.proposal.id, false, "no"))
            .unwrap();

        // 1 accept, 2 rejects, 0 outstanding: 2 accepts are unreachable.
        let (reached, result) = engine.check(&round.proposal.id, 3).unwrap();
        assert!(!reached);
        assert_eq!(result, RoundResult::Rejected);

        // Terminal rounds refuse further votes.
        let err = engine
            .submit_vote(Vote::signed(&p2, &round.proposal.id, true, "flip"))
            .unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidState(_)));
    }

    #[test]
    fn sole_voter_accepts_immediately() {
        let p1 = voter("solo");
        let engine = engine_with(&[&p1], 1.0);

        let round = engine
            .propose(&p1, ProposalKind::ParameterChange, serde_json::Value::Null)
            .unwrap();
        let (reached, result) = engine.check(&round.proposal.id, 1).unwrap();
        assert!(reached);
        assert_eq!(result, RoundResult::Accepted);
    }

    #[test]
    fn double_vote_keeps_latest() {
        let p1 = voter("p1");
        let p2 = voter("p2");
        let engine = engine_with(&[&p1, &p2], 0.9);

        let round = engine
            .propose(&p1, ProposalKind::TaskAssignment, serde_json::Value::Null)
            .unwrap();

        engine
            .submit_vote(Vote::signed(&p2, &round.proposal.id, true, "first"))
            .unwrap();
        engine
            .submit_vote(Vote::signed(&p2, &round.proposal.id, false, "changed my mind"))
            .unwrap();

        let stored = engine.round(&round.proposal.id).unwrap();
        assert_eq!(stored.votes.len(), 2);
        assert!(!stored.votes[p2.sid()].value);
        assert_eq!(stored.votes[p2.sid()].reason, "changed my mind");
    }

    #[test]
    fn unsigned_or_foreign_votes_rejected() {
        let p1 = voter("p1");
        let p2 = voter("p2");
        let outsider = voter("outsider");
        let engine = engine_with(&[&p1, &p2], 0.67);

        let round = engine
            .propose(&p1, ProposalKind::TaskAssignment, serde_json::Value::Null)
            .unwrap();

        // Unregistered voter.
        let err = engine
            .submit_vote(Vote::signed(&outsider, &round.proposal.id, true, ""))
            .unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidState(_)));

        // Registered voter, forged signature.
        let mut forged = Vote::signed(&p2, &round.proposal.id, true, "");
        forged.signature[0] ^= 0x01;
        let err = engine.submit_vote(forged).unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidState(_)));

        // A vote whose value was flipped after signing fails too.
        let mut flipped = Vote::signed(&p2, &round.proposal.id, false, "");
        flipped.value = true;
        assert!(engine.submit_vote(flipped).is_err());

        let stored = engine.round(&round.proposal.id).unwrap();
        assert_eq!(stored.votes.len(), 1);
    }

    #[test]
    fn vote_on_unknown_proposal() {
        let p1 = voter("p1");
        let engine = engine_with(&[&p1], 0.5);
        let err = engine
            .submit_vote(Vote::signed(&p1, "missing", true, ""))
            .unwrap_err();
        assert!(matches!(err, CoordinationError::ProposalNotFound(_)));
    }

    #[test]
    fn callbacks_fire_once_per_transition() {
        let p1 = voter("p1");
        let p2 = voter("p2");
        let engine = engine_with(&[&p1, &p2], 0.67);

        let accepts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepts);
        engine.on_accept(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let round = engine
            .propose(&p1, ProposalKind::TaskAssignment, serde_json::Value::Null)
            .unwrap();
        engine
            .submit_vote(Vote::signed(&p2, &round.proposal.id, true, ""))
            .unwrap();

        engine.check(&round.proposal.id, 2).unwrap();
        engine.check(&round.proposal.id, 2).unwrap();
        engine.check(&round.proposal.id, 2).unwrap();

        assert_eq!(accepts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_surfaces_distinct_error() {
        let p1 = voter("p1");
        let p2 = voter("p2");
        let p3 = voter("p3");
        let engine = engine_with(&[&p1, &p2, &p3], 0.67);
        engine.set_timeout(Duration::from_millis(100));

        let round = engine
            .propose(&p1, ProposalKind::AgentTerminate, serde_json::Value::Null)
            .unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::time::sleep(Duration::from_millis(150)).await;
        let err = engine
            .wait(&round.proposal.id, 3, shutdown_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::ConsensusTimeout));
        assert_eq!(engine.stats().timeout, 1);
    }

    #[tokio::test]
    async fn wait_resolves_rejection_without_timeout() {
        let p1 = voter("p1");
        let p2 = voter("p2");
        let p3 = voter("p3");
        let engine = engine_with(&[&p1, &p2, &p3], 0.67);

        let round = engine
            .propose(&p1, ProposalKind::TaskAssignment, serde_json::Value::Null)
            .unwrap();
        engine
            .submit_vote(Vote::signed(&p2, &round.proposal.id, false, "no"))
            .unwrap();
        engine
            .submit_vote(Vote::signed(&p3, &round.proposal.id, false, "no"))
            .unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let reached = engine.wait(&round.proposal.id, 3, shutdown_rx).await.unwrap();
        assert!(!reached);

        let (_tx2, rx2) = watch::channel(false);
        let err = engine
            .wait_accepted(&round.proposal.id, 3, rx2)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::InsufficientVotes));
    }

    #[test]
    fn threshold_frozen_at_round_creation() {
        let p1 = voter("p1");
        let p2 = voter("p2");
        let p3 = voter("p3");
        let engine = engine_with(&[&p1, &p2, &p3], 0.9);

        let round = engine
            .propose(&p1, ProposalKind::ParameterChange, serde_json::Value::Null)
            .unwrap();
        // Lowering the engine threshold does not affect the open round:
        // 3 voters at 0.9 still require 2 accepts.
        engine.set_threshold(0.1);

        let (reached, result) = engine.check(&round.proposal.id, 3).unwrap();
        assert!(!reached);
        assert_eq!(result, RoundResult::Pending);

        engine
            .submit_vote(Vote::signed(&p2, &round.proposal.id, true, ""))
            .unwrap();
        let (reached, _) = engine.check(&round.proposal.id, 3).unwrap();
        assert!(reached);
    }

    #[test]
    fn cleanup_drops_settled_rounds() {
        let p1 = voter("p1");
        let engine = engine_with(&[&p1], 0.5);

        let settled = engine
            .propose(&p1, ProposalKind::TaskAssignment, serde_json::Value::Null)
            .unwrap();
        engine.check(&settled.proposal.id, 1).unwrap();
        let open = engine
            .propose(&p1, ProposalKind::AgentSpawn, serde_json::Value::Null)
            .unwrap();

        engine.cleanup_rounds(Duration::ZERO);

        assert!(engine.round(&settled.proposal.id).is_none());
        assert!(engine.round(&open.proposal.id).is_some());

        let proof = engine.proof(&open.proposal.id).unwrap();
        assert_eq!(proof.accepts, 1);
        assert!(!proof.is_accepted());
    }
}
