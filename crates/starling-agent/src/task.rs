//! Units of work and their results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use starling_identity::CapabilityKind;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of a task.
///
/// `Pending → Assigned → Running → Completed | Failed`; the terminal
/// states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Declared difficulty of a task, used to seed time estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Baseline completion time for a perfectly-matched agent.
    pub fn base_duration(&self) -> Duration {
        match self {
            Complexity::Low => Duration::from_secs(60),
            Complexity::Medium => Duration::from_secs(5 * 60),
            Complexity::High => Duration::from_secs(30 * 60),
        }
    }
}

/// A unit of work submitted to a collective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    /// Free-text requirements handed to the executing agent.
    #[serde(default)]
    pub requirements: String,
    pub complexity: Complexity,
    pub required: Vec<CapabilityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// Reward in reputation units.
    #[serde(default)]
    pub reward: f64,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(description: impl Into<String>, required: Vec<CapabilityKind>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            requirements: String::new(),
            complexity: Complexity::Medium,
            required,
            deadline: None,
            reward: 0.0,
            status: TaskStatus::Pending,
            assigned_to: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_requirements(mut self, requirements: impl Into<String>) -> Self {
        self.requirements = requirements.into();
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_reward(mut self, reward: f64) -> Self {
        self.reward = reward;
        self
    }
}

/// The outcome of a task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_sid: String,
    pub status: TaskStatus,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Self-assessed output quality in [0, 1].
    pub quality: f64,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending_medium() {
        let task = Task::new("write a parser", vec![CapabilityKind::CodeWrite]);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.complexity, Complexity::Medium);
        assert!(task.assigned_to.is_none());
        assert!(!task.id.is_empty());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn base_durations_scale_with_complexity() {
        assert_eq!(Complexity::Low.base_duration(), Duration::from_secs(60));
        assert_eq!(Complexity::Medium.base_duration(), Duration::from_secs(300));
        assert_eq!(Complexity::High.base_duration(), Duration::from_secs(1800));
    }
}
