//! Ed25519-backed agent identities with hierarchical lineage.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{IdentityError, Result};

/// A unique, cryptographic identity for an agent.
///
/// Immutable after creation. The signing key is held privately and is never
/// serialised; share an identity with peers via [`Identity::card`].
#[derive(Debug, Clone)]
pub struct Identity {
    sid: String,
    name: String,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    created_at: DateTime<Utc>,
    parent_sid: Option<String>,
    generation: u32,
}

/// The public, serialisable view of an [`Identity`].
///
/// This is what travels in gossip payloads and join announcements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityCard {
    pub sid: String,
    pub name: String,
    /// Hex-encoded Ed25519 verifying key (32 bytes).
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_sid: Option<String>,
    pub generation: u32,
}

impl Identity {
    /// Generate a fresh identity with a new keypair.
    ///
    /// `parent` establishes lineage: the child records the parent's sid and
    /// sits one generation deeper. Root identities are generation 0.
    pub fn generate(name: impl Into<String>, parent: Option<&IdentityCard>) -> Result<Self> {
        let mut secret = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|_| IdentityError::Entropy)?;

        let signing_key = SigningKey::from_bytes(&secret);
        let verifying_key = signing_key.verifying_key();

        Ok(Self {
            sid: Uuid::new_v4().to_string(),
            name: name.into(),
            signing_key,
            verifying_key,
            created_at: Utc::now(),
            parent_sid: parent.map(|p| p.sid.clone()),
            generation: parent.map(|p| p.generation + 1).unwrap_or(0),
        })
    }

    /// Sign arbitrary bytes with the private key. Returns a 64-byte
    /// detached signature.
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.signing_key.sign(data).to_bytes()
    }

    /// Verify a signature against this identity's public key.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        self.verifying_key.verify(data, &sig).is_ok()
    }

    /// The stable identifier for this agent.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Shortened sid for display (first 8 characters).
    pub fn short_id(&self) -> &str {
        if self.sid.len() > 8 {
            &self.sid[..8]
        } else {
            &self.sid
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn parent_sid(&self) -> Option<&str> {
        self.parent_sid.as_deref()
    }

    /// Lineage depth: 0 for a root identity, parent.generation + 1 otherwise.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The public verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }

    /// The public key as a hex string.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }

    /// The shareable public view of this identity.
    pub fn card(&self) -> IdentityCard {
        IdentityCard {
            sid: self.sid.clone(),
            name: self.name.clone(),
            public_key: self.public_key_hex(),
            created_at: self.created_at,
            parent_sid: self.parent_sid.clone(),
            generation: self.generation,
        }
    }
}

impl IdentityCard {
    /// Decode the verifying key carried on the card, if well-formed.
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        let bytes: [u8; 32] = hex::decode(&self.public_key).ok()?.try_into().ok()?;
        VerifyingKey::from_bytes(&bytes).ok()
    }
}
