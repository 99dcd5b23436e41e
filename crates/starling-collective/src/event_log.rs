//! Append-only record of collective episodes.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const LOG_CAPACITY: usize = 1000;

/// One memorable collective event: a join, a departure, a completed task,
/// a consensus outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectiveEvent {
    pub id: String,
    pub kind: String,
    /// Sids of the agents involved.
    pub participants: Vec<String>,
    pub content: String,
    pub context: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Bounded, append-only event log.
///
/// Fed by gossip observers; consumers only ever read. Past capacity the
/// oldest entries fall off.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<VecDeque<CollectiveEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        kind: impl Into<String>,
        participants: Vec<String>,
        content: impl Into<String>,
        context: serde_json::Value,
    ) {
        let mut events = self.events.write().unwrap();
        events.push_back(CollectiveEvent {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            participants,
            content: content.into(),
            context,
            timestamp: Utc::now(),
        });
        while events.len() > LOG_CAPACITY {
            events.pop_front();
        }
    }

    /// The most recent `n` events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<CollectiveEvent> {
        let events = self.events.read().unwrap();
        let skip = events.len().saturating_sub(n);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn by_kind(&self, kind: &str) -> Vec<CollectiveEvent> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().unwrap().is_empty()
    }
}
