//! Signed actions and delegation proofs.
//!
//! Actions are signed over their canonical JSON encoding; signatures travel
//! base64-encoded on the wire.

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityKind;
use crate::identity::Identity;
use crate::Result;

/// An action an agent is willing to be held to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// An [`Action`] bound to its author by an Ed25519 signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedAction {
    pub action: Action,
    pub agent_sid: String,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// Supporting evidence (capability claim, delegation, consensus
    /// record). Not covered by the signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<serde_json::Value>,
}

impl SignedAction {
    /// Sign `action` with `identity`.
    pub fn new(identity: &Identity, action: Action) -> Result<Self> {
        let canonical = serde_json::to_vec(&action)?;
        let signature = identity.sign(&canonical).to_vec();

        Ok(Self {
            action,
            agent_sid: identity.sid().to_string(),
            signature,
            timestamp: Utc::now(),
            proof: None,
        })
    }

    pub fn with_proof(mut self, proof: serde_json::Value) -> Self {
        self.proof = Some(proof);
        self
    }

    /// Verify the signature against the claimed author's public key.
    pub fn verify(&self, public_key: &VerifyingKey) -> bool {
        let Ok(canonical) = serde_json::to_vec(&self.action) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&self.signature) else {
            return false;
        };
        public_key.verify(&canonical, &sig).is_ok()
    }
}

/// Proof that one agent has delegated a capability to another, with expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationProof {
    pub delegator_sid: String,
    pub delegate_sid: String,
    pub capability: CapabilityKind,
    pub expires_at: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct DelegationBody<'a> {
    delegate_sid: &'a str,
    capability: CapabilityKind,
    expires_at: DateTime<Utc>,
}

impl DelegationProof {
    pub fn new(
        delegator: &Identity,
        delegate_sid: impl Into<String>,
        capability: CapabilityKind,
        validity: Duration,
    ) -> Result<Self> {
        let delegate_sid = delegate_sid.into();
        let expires_at = Utc::now() + validity;

        let body = serde_json::to_vec(&DelegationBody {
            delegate_sid: &delegate_sid,
            capability,
            expires_at,
        })?;

        Ok(Self {
            delegator_sid: delegator.sid().to_string(),
            delegate_sid,
            capability,
            expires_at,
            signature: delegator.sign(&body).to_vec(),
        })
    }

    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }

    pub fn verify(&self, delegator_key: &VerifyingKey) -> bool {
        let Ok(body) = serde_json::to_vec(&DelegationBody {
            delegate_sid: &self.delegate_sid,
            capability: self.capability,
            expires_at: self.expires_at,
        }) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&self.signature) else {
            return false;
        };
        delegator_key.verify(&body, &sig).is_ok()
    }
}

/// Summary record of a settled consensus round, suitable for audit trails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusProof {
    pub proposal_id: String,
    pub accepts: usize,
    pub rejects: usize,
    pub threshold: f64,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

impl ConsensusProof {
    pub fn is_accepted(&self) -> bool {
        self.result == "accepted"
    }
}

mod base64_bytes {
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

    #[test]
    fn signed_action_verifies_under_author_key() {
        let id = Identity::generate("author", None).unwrap();
        let action = Action {
            kind: "task_claim".into(),
            target: Some("task-1".into()),
            payload: Some(serde_json::json!({"reason": "capable"})),
        };

        let signed = SignedAction::new(&id, action).unwrap();
        assert!(signed.verify(&id.verifying_key()));

        let other = Identity::generate("other", None).unwrap();
        assert!(!signed.verify(&other.verifying_key()));
    }

    #[test]
    fn signed_action_roundtrips_through_json() {
        let id = Identity::generate("author", None).unwrap();
        let signed = SignedAction::new(
            &id,
            Action {
                kind: "heartbeat".into(),
                target: None,
                payload: None,
            },
        )
        .unwrap();

        let json = serde_json::to_string(&signed).unwrap();
        let back: SignedAction = serde_json::from_str(&json).unwrap();
        assert!(back.verify(&id.verifying_key()));
        assert_eq!(back.agent_sid, id.sid());
    }

    #[test]
    fn delegation_proof_verifies_and_expires() {
        let delegator = Identity::generate("delegator", None).unwrap();
        let proof = DelegationProof::new(
            &delegator,
            "delegate-sid",
            CapabilityKind::CodeReview,
            Duration::hours(1),
        )
        .unwrap();

        assert!(proof.is_valid());
        assert!(proof.verify(&delegator.verifying_key()));

        let expired = DelegationProof {
            expires_at: Utc::now() - Duration::seconds(1),
            ..proof.clone()
        };
        assert!(!expired.is_valid());
        // Changing the expiry also invalidates the signature.
        assert!(!expired.verify(&delegator.verifying_key()));
    }
}
