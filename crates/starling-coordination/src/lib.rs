//! The Starling coordination engine.
//!
//! Four cooperating components, each independently lockable:
//!
//! - [`Gossip`]: epidemic message bus with bounded fanout, TTL, and dedup.
//! - [`TaskMarket`]: sealed-interval auction that selects the winning
//!   bidder for a task.
//! - [`ConsensusEngine`]: threshold voting with signed votes and
//!   early-accept / early-reject / timeout termination.
//! - [`ReputationRegistry`]: collective-wide trust scores and their event
//!   history.
//!
//! None of these components knows about the collective that composes them;
//! cross-component calls are made with no outer lock held.

pub mod consensus;
pub mod gossip;
pub mod market;
pub mod registry;

pub use consensus::{
    ConsensusEngine, ConsensusRound, ConsensusStats, Proposal, ProposalKind, RoundResult, Vote,
};
pub use gossip::{Gossip, GossipConfig, GossipStats, LoopbackTransport, Message, MessageKind, Transport};
pub use market::{Bid, MarketStats, TaskAssignment, TaskMarket};
pub use registry::{ReputationEvent, ReputationEventKind, ReputationRegistry};

/// Error type for coordination operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The auction window closed with zero qualifying bidders.
    #[error("no bids received")]
    NoBids,

    /// The market has been closed and accepts no new work. Permanent.
    #[error("market closed")]
    MarketClosed,

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    /// The round expired without reaching its threshold.
    #[error("consensus timeout")]
    ConsensusTimeout,

    /// The round settled without enough accept votes.
    #[error("insufficient votes for consensus")]
    InsufficientVotes,

    /// The operation is invalid in the current state, including votes that
    /// fail signature verification.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CoordinationError>;
