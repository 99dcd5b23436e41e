//! Worker agents for Starling collectives.
//!
//! An [`Agent`] couples an identity, a capability set, a reputation, and a
//! single-flight execution loop fed by a bounded task queue. Task results
//! come back in submission order through the agent's result sequence; the
//! agent holds no pointer to any collective it belongs to.

pub mod agent;
pub mod memory;
pub mod reputation;
pub mod task;

pub use agent::{Agent, AgentConfig, AgentState};
pub use memory::{AgentMemory, Episode};
pub use reputation::Reputation;
pub use task::{Complexity, Task, TaskResult, TaskStatus};

/// Error type for agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The agent's bounded task queue is full. Not retried internally.
    #[error("task queue full")]
    QueueFull,

    /// The operation is not valid in the agent's current state.
    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: AgentState },

    /// The agent has terminated and accepts no further work.
    #[error("agent terminated")]
    Terminated,

    #[error(transparent)]
    Identity(#[from] starling_identity::IdentityError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
