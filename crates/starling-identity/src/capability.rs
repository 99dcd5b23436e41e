//! Typed capability declarations and proficiency-weighted matching.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of skills an agent can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
    #[serde(rename = "code.write")]
    CodeWrite,
    #[serde(rename = "code.review")]
    CodeReview,
    #[serde(rename = "code.refactor")]
    CodeRefactor,
    #[serde(rename = "research")]
    Research,
    #[serde(rename = "analysis")]
    Analysis,
    #[serde(rename = "security")]
    Security,
    #[serde(rename = "documentation")]
    Documentation,
    #[serde(rename = "testing")]
    Testing,
    #[serde(rename = "architecture")]
    Architecture,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::CodeWrite => "code.write",
            CapabilityKind::CodeReview => "code.review",
            CapabilityKind::CodeRefactor => "code.refactor",
            CapabilityKind::Research => "research",
            CapabilityKind::Analysis => "analysis",
            CapabilityKind::Security => "security",
            CapabilityKind::Documentation => "documentation",
            CapabilityKind::Testing => "testing",
            CapabilityKind::Architecture => "architecture",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Starting proficiency for a capability declared without one.
pub const DEFAULT_PROFICIENCY: f64 = 0.5;

/// A specific skill an agent possesses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub kind: CapabilityKind,

    /// Proficiency level from 0.0 (novice) to 1.0 (expert).
    pub proficiency: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<CapabilityProof>,
}

impl Capability {
    pub fn new(kind: CapabilityKind, proficiency: f64) -> Self {
        Self {
            kind,
            proficiency: proficiency.clamp(0.0, 1.0),
            metadata: None,
            proof: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_proof(mut self, proof: CapabilityProof) -> Self {
        self.proof = Some(proof);
        self
    }
}

impl From<CapabilityKind> for Capability {
    fn from(kind: CapabilityKind) -> Self {
        Capability::new(kind, DEFAULT_PROFICIENCY)
    }
}

/// Evidence backing a claimed capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum CapabilityProof {
    /// A benchmark score on a named suite.
    Benchmark { benchmark: String, score: f64 },
    /// Attestations from named peers.
    PeerAttestation { attesters: Vec<String> },
    /// Completed-task count in this skill.
    TaskHistory { task_count: u64 },
}

/// An agent's declared capabilities, keyed by kind.
///
/// Each kind appears at most once; [`CapabilitySet::add`] is
/// last-write-wins on duplicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    capabilities: HashMap<CapabilityKind, Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, capability: Capability) {
        self.capabilities.insert(capability.kind, capability);
    }

    pub fn has(&self, kind: CapabilityKind) -> bool {
        self.capabilities.contains_key(&kind)
    }

    pub fn get(&self, kind: CapabilityKind) -> Option<&Capability> {
        self.capabilities.get(&kind)
    }

    pub fn list(&self) -> Vec<CapabilityKind> {
        self.capabilities.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Score this set against a list of required capabilities.
    ///
    /// An empty requirement matches perfectly (1.0). Otherwise the score is
    /// coverage (fraction of required kinds present) times the mean
    /// proficiency over the kinds that matched; no intersection scores 0.0.
    pub fn match_score(&self, required: &[CapabilityKind]) -> f64 {
        if required.is_empty() {
            return 1.0;
        }

        let mut total = 0.0;
        let mut matched = 0usize;
        for kind in required {
            if let Some(cap) = self.capabilities.get(kind) {
                total += cap.proficiency;
                matched += 1;
            }
        }

        if matched == 0 {
            return 0.0;
        }

        let coverage = matched as f64 / required.len() as f64;
        let avg_proficiency = total / matched as f64;
        coverage * avg_proficiency
    }
}
