//! Per-agent memory: scratch stores plus a bounded episodic ring.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const EPISODE_CAPACITY: usize = 100;

/// A memorable event in an agent's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub kind: String,
    pub content: String,
    pub context: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Importance in [0, 1].
    pub salience: f64,
}

/// An agent's working memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMemory {
    short_term: HashMap<String, serde_json::Value>,
    long_term: HashMap<String, serde_json::Value>,
    episodic: VecDeque<Episode>,
}

impl AgentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value in short-term memory.
    pub fn store(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.short_term.insert(key.into(), value);
    }

    /// Recall a value, checking short-term memory before long-term.
    pub fn recall(&self, key: &str) -> Option<&serde_json::Value> {
        self.short_term.get(key).or_else(|| self.long_term.get(key))
    }

    /// Move everything in short-term memory into long-term.
    pub fn consolidate(&mut self) {
        for (key, value) in self.short_term.drain() {
            self.long_term.insert(key, value);
        }
    }

    /// Append an episode, evicting the oldest past capacity.
    pub fn add_episode(
        &mut self,
        kind: impl Into<String>,
        content: impl Into<String>,
        context: serde_json::Value,
        salience: f64,
    ) {
        self.episodic.push_back(Episode {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            content: content.into(),
            context,
            timestamp: Utc::now(),
            salience,
        });
        while self.episodic.len() > EPISODE_CAPACITY {
            self.episodic.pop_front();
        }
    }

    pub fn episodes(&self) -> impl Iterator<Item = &Episode> {
        self.episodic.iter()
    }

    pub fn episode_count(&self) -> usize {
        self.episodic.len()
    }
}
