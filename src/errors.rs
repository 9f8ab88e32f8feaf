//! Error taxonomy shared across the acquisition pipeline.
//!
//! Errors are classified by kind rather than by origin: the queue retries
//! transient-upstream failures, the CLI maps kinds to exit codes, and
//! everything else surfaces to the caller unchanged.

use std::time::Duration;

use thiserror::Error;

/// Classification of an error, independent of where it was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    TransientUpstream,
    PermanentUpstream,
    ResourceExhausted,
    CorruptData,
    Internal,
}

/// Errors produced by the repository, archive client, queue, and connector.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Malformed input: bad date, unknown LCCN shape, bbox out of bounds.
    #[error("validation: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// Unique-key violation or duplicate promotion; carries the existing id.
    #[error("conflict: {message} (existing: {existing_id})")]
    Conflict {
        message: String,
        existing_id: String,
    },

    /// 429/5xx or network timeout; eligible for retry with backoff.
    #[error("transient upstream error: {message}")]
    TransientUpstream {
        message: String,
        /// Server-requested wait, from a Retry-After header.
        retry_after: Option<Duration>,
    },

    /// Upstream failure that survived all retries, or a non-retryable 4xx.
    #[error("upstream error: {0}")]
    PermanentUpstream(String),

    /// Disk full, lost lease, queue full.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Undecodable image bytes, malformed HOCR. Never retried.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// Logic error. Logged with context; the task is marked failed.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcquireError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(message: impl Into<String>, existing_id: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            existing_id: existing_id.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientUpstream {
            message: message.into(),
            retry_after: None,
        }
    }

    /// The kind of this error, independent of where it came from.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::TransientUpstream { .. } => ErrorKind::TransientUpstream,
            Self::PermanentUpstream(_) => ErrorKind::PermanentUpstream,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::CorruptData(_) => ErrorKind::CorruptData,
            Self::Internal(_) | Self::Database(_) => ErrorKind::Internal,
            Self::Io(e) if e.kind() == std::io::ErrorKind::StorageFull => {
                ErrorKind::ResourceExhausted
            }
            Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the queue should retry a task that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientUpstream | ErrorKind::ResourceExhausted
        )
    }

    /// Process exit code for the CLI: 0 success, 1 generic, 2 usage,
    /// 3 not-found, 4 conflict, 5 upstream unavailable.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Validation => 2,
            ErrorKind::NotFound => 3,
            ErrorKind::Conflict => 4,
            ErrorKind::TransientUpstream | ErrorKind::PermanentUpstream => 5,
            _ => 1,
        }
    }
}

/// Map a diesel unique-constraint violation to a Conflict, everything else
/// to Database.
pub fn map_unique_violation(
    err: diesel::result::Error,
    message: &str,
    existing_id: &str,
) -> AcquireError {
    use diesel::result::{DatabaseErrorKind, Error};
    match err {
        Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AcquireError::conflict(message, existing_id)
        }
        other => AcquireError::Database(other),
    }
}

pub type Result<T, E = AcquireError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(AcquireError::transient("503").is_retryable());
        assert!(AcquireError::ResourceExhausted("disk full".into()).is_retryable());
        assert!(!AcquireError::Validation("bad date".into()).is_retryable());
        assert!(!AcquireError::CorruptData("bad jp2".into()).is_retryable());
        assert!(!AcquireError::PermanentUpstream("404".into()).is_retryable());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AcquireError::Validation("x".into()).exit_code(), 2);
        assert_eq!(AcquireError::not_found("page", "p1").exit_code(), 3);
        assert_eq!(AcquireError::conflict("dup", "p1").exit_code(), 4);
        assert_eq!(AcquireError::transient("429").exit_code(), 5);
        assert_eq!(AcquireError::Internal("bug".into()).exit_code(), 1);
    }
}
