//! Work-queue task and bulk-operation models.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOperation {
    Ocr,
    Segment,
    Reindex,
    Export,
    Import,
    Promote,
}

impl TaskOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ocr => "ocr",
            Self::Segment => "segment",
            Self::Reindex => "reindex",
            Self::Export => "export",
            Self::Import => "import",
            Self::Promote => "promote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ocr" => Some(Self::Ocr),
            "segment" => Some(Self::Segment),
            "reindex" => Some(Self::Reindex),
            "export" => Some(Self::Export),
            "import" => Some(Self::Import),
            "promote" => Some(Self::Promote),
            _ => None,
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Leased,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "leased" => Some(Self::Leased),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// A unit of work in the processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Page this task operates on; None for non-page tasks (reindex, export).
    pub page_id: Option<String>,
    pub operation: TaskOperation,
    pub parameters: HashMap<String, serde_json::Value>,
    /// Lower value schedules earlier.
    pub priority: i32,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub bulk_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(operation: TaskOperation) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            page_id: None,
            operation,
            parameters: HashMap::new(),
            priority: 10,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            lease_expires_at: None,
            next_eligible_at: None,
            bulk_id: None,
            enqueued_at: now,
            updated_at: now,
        }
    }

    pub fn for_page(operation: TaskOperation, page_id: impl Into<String>) -> Self {
        let mut task = Self::new(operation);
        task.page_id = Some(page_id.into());
        task
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_bulk(mut self, bulk_id: impl Into<String>) -> Self {
        self.bulk_id = Some(bulk_id.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Retry backoff schedule: `base * 2^(attempts-1)`, capped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(300),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the number of attempts made.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

/// Status of a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStatus {
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl BulkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A named group of related tasks, reported as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperation {
    pub id: String,
    pub description: String,
    pub operation: TaskOperation,
    pub status: BulkStatus,
    pub total: u32,
    pub pending: u32,
    pub in_progress: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BulkOperation {
    pub fn new(description: impl Into<String>, operation: TaskOperation) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            operation,
            status: BulkStatus::Running,
            total: 0,
            pending: 0,
            in_progress: 0,
            succeeded: 0,
            failed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fraction of child tasks in a terminal state, in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.succeeded + self.failed) / f64::from(self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(300));
        assert_eq!(policy.backoff(2), Duration::from_secs(600));
        assert_eq!(policy.backoff(3), Duration::from_secs(1200));
        // capped at one hour
        assert_eq!(policy.backoff(10), Duration::from_secs(3600));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Leased.is_terminal());
    }

    #[test]
    fn test_bulk_progress() {
        let mut bulk = BulkOperation::new("ocr april 1891", TaskOperation::Ocr);
        assert_eq!(bulk.progress(), 0.0);
        bulk.total = 10;
        bulk.succeeded = 4;
        bulk.failed = 1;
        assert!((bulk.progress() - 0.5).abs() < f64::EPSILON);
    }
}
