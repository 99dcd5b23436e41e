//! Cryptographic identities and capability declarations for Starling agents.
//!
//! Every agent in a collective carries an [`Identity`]: a stable identifier
//! backed by an Ed25519 keypair, with optional lineage to a parent agent.
//! Agents declare what they can do through a [`CapabilitySet`], which the
//! task market scores against a task's requirements, and they can produce
//! [`SignedAction`]s and [`DelegationProof`]s that other agents verify
//! against the public half of the keypair.
//!
//! The signing key never crosses the crate boundary: serialisable views of
//! an identity go through [`IdentityCard`], which carries only public
//! material.

pub mod capability;
pub mod identity;
pub mod proof;

pub use capability::{Capability, CapabilityKind, CapabilityProof, CapabilitySet, DEFAULT_PROFICIENCY};
pub use identity::{Identity, IdentityCard};
pub use proof::{Action, ConsensusProof, DelegationProof, SignedAction};

/// Error type for identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The system entropy source failed during key generation. Fatal to
    /// agent creation.
    #[error("entropy source failure during key generation")]
    Entropy,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IdentityError>;
