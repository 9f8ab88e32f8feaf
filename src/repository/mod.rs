//! Repository layer: SQLite persistence for pages, segments, articles,
//! the processing queue, and bulk operations.
//!
//! All database access uses Diesel with diesel-async's
//! `SyncConnectionWrapper` for SQLite. Referential invariants live in the
//! schema (foreign keys with cascade) and are re-checked at the store
//! boundary.

pub mod migrations;
pub mod pool;
pub mod queue;
pub mod records;
pub mod store;
pub mod util;

pub use pool::{AsyncSqlitePool, DieselError};
pub use queue::{HeartbeatState, QueueStats, WorkQueue};
pub use store::{NewPage, PageImage, PageQuery, RepositoryStats, RepositoryStore};

use chrono::{DateTime, NaiveDate, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Parse an ISO-8601 date string from the database.
pub fn parse_date_opt(s: Option<String>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}
