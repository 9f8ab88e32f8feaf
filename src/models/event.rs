//! Main-store event model and the segment/event link.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A historical record in the main events database.
///
/// Events are promoted from article segments; the source pointer keeps
/// enough provenance to reconcile orphans after a partial promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalEvent {
    pub id: String,
    pub title: String,
    /// Event date, taken from the page issue date at promotion time.
    pub date: Option<NaiveDate>,
    pub body: String,
    /// Provenance JSON: segment id, content hash, page metadata, clip path.
    pub source: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HistoricalEvent {
    /// Segment id recorded in the source pointer, if this event was promoted.
    pub fn source_segment_id(&self) -> Option<&str> {
        self.source.get("segment_id").and_then(|v| v.as_str())
    }

    /// Content hash recorded in the source pointer.
    pub fn source_content_hash(&self) -> Option<&str> {
        self.source.get("content_hash").and_then(|v| v.as_str())
    }
}

/// Link between an article segment and the event promoted from it.
///
/// Each segment links to at most one event; an event may be linked from
/// several segments. The link table is the authoritative promotion record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLink {
    pub segment_id: String,
    pub event_id: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}
