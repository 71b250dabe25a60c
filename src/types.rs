//! Core types for offthread

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for TaskId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl PartialEq<TaskId> for i64 {
    fn eq(&self, other: &TaskId) -> bool {
        *self == other.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Task scheduling priority
///
/// Lower numeric value drains from the queue first.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Runs before everything else (0)
    High = 0,
    /// Default priority (1)
    #[default]
    Normal = 1,
    /// Runs after everything else (2)
    Low = 2,
}

impl TaskPriority {
    /// Convert integer priority code to TaskPriority
    pub fn from_i32(priority: i32) -> Self {
        match priority {
            0 => TaskPriority::High,
            1 => TaskPriority::Normal,
            2 => TaskPriority::Low,
            _ => TaskPriority::Normal, // Default to Normal for unknown priority
        }
    }

    /// Convert TaskPriority to integer priority code
    pub fn to_i32(&self) -> i32 {
        *self as i32
    }
}

/// Task lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued and waiting for a worker
    Pending,
    /// Currently executing on a worker
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error (including panics)
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl TaskStatus {
    /// True for states a task can never leave
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Data-only result of a successful task
///
/// Kept as free-form JSON so snapshots never hold host references.
pub type TaskOutput = serde_json::Value;

/// Immutable snapshot of a task's state
///
/// Returned by status queries and passed to callbacks. Safe to clone and
/// send across threads; contains no live handles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identifier
    pub id: TaskId,

    /// Scheduling priority the task was submitted with
    pub priority: TaskPriority,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Progress fraction in 0.0..=1.0
    pub progress: f32,

    /// Latest human-readable progress message
    pub message: String,

    /// Free-form side data reported alongside progress
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub progress_data: serde_json::Map<String, serde_json::Value>,

    /// Result of a completed task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutput>,

    /// Error description of a failed task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,

    /// When a worker picked the task up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate counts over all retained tasks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Tasks waiting in the queue
    pub pending: usize,
    /// Tasks currently executing
    pub running: usize,
    /// Tasks that finished successfully
    pub completed: usize,
    /// Tasks that failed
    pub failed: usize,
    /// Tasks that were cancelled
    pub cancelled: usize,
}

impl TaskStats {
    /// Total number of retained tasks
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }
}
