//! Starling: a coordination substrate for collectives of autonomous
//! agents.
//!
//! Agents carry Ed25519 identities, declared capabilities, and multi-axis
//! reputations; collectives allocate work through a sealed-interval
//! auction, propagate events over an epidemic gossip bus, and ratify
//! decisions through threshold voting.
//!
//! This crate re-exports the public surface of the workspace members.
//!
//! ```no_run
//! use std::sync::Arc;
//! use starling::agent::{Agent, AgentConfig};
//! use starling::collective::{Collective, CollectiveConfig};
//! use starling::identity::CapabilityKind;
//! use starling::agent::Task;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let collective = Arc::new(Collective::new("builders", CollectiveConfig::default()));
//! collective.join(Arc::new(Agent::new(AgentConfig {
//!     name: "coder".into(),
//!     capabilities: vec![CapabilityKind::CodeWrite.into()],
//!     ..Default::default()
//! })?))?;
//! collective.start()?;
//!
//! let result = collective
//!     .submit(Task::new("write a parser", vec![CapabilityKind::CodeWrite]))
//!     .await?;
//! println!("{}", result.output);
//! # Ok(())
//! # }
//! ```

pub use starling_agent as agent;
pub use starling_collective as collective;
pub use starling_coordination as coordination;
pub use starling_identity as identity;
pub use starling_llm as llm;
