//! Agent collectives: membership, task routing, and maintenance.
//!
//! A [`Collective`] composes one gossip bus, one task market, one
//! consensus engine, and one reputation registry, and routes submitted
//! tasks through them: broadcast, auction, assignment, execution,
//! reputation update. The [`EventLog`] observes the collective's gossip
//! traffic as an append-only record.

pub mod collective;
pub mod event_log;

pub use collective::{Collective, CollectiveConfig, CollectiveStats};
pub use event_log::{CollectiveEvent, EventLog};

use starling_agent::AgentError;
use starling_coordination::CoordinationError;

/// Error type for collective operations.
#[derive(Debug, thiserror::Error)]
pub enum CollectiveError {
    /// Membership is at the configured hard cap.
    #[error("collective at maximum capacity")]
    Full,

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}

pub type Result<T> = std::result::Result<T, CollectiveError>;
