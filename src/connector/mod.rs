//! Cross-database connector: promotes article segments into the main
//! historical-events store.
//!
//! This is the only component holding handles to both databases. Promotion
//! is at-least-once: the event insert and the link write are separate
//! database writes, and `reconcile` converges the two using the
//! `(segment_id, content_hash)` pair carried in the event's source pointer.
//! The link table is authoritative.

use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::errors::{AcquireError, Result};
use crate::models::{EventLink, HistoricalEvent, SegmentStatus};
use crate::repository::pool::AsyncSqlitePool;
use crate::repository::records::{EventLinkRecord, NewEventLinkRecord};
use crate::repository::{parse_date_opt, parse_datetime, RepositoryStore};
use crate::schema::{event_links, events};

/// Default similarity threshold for duplicate detection.
pub const DUPLICATE_THRESHOLD: f64 = 0.8;

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct EventRecord {
    id: String,
    title: String,
    event_date: Option<String>,
    body: String,
    source: String,
    created_at: String,
    updated_at: String,
}

impl From<EventRecord> for HistoricalEvent {
    fn from(r: EventRecord) -> Self {
        HistoricalEvent {
            id: r.id,
            title: r.title,
            date: parse_date_opt(r.event_date),
            body: r.body,
            source: serde_json::from_str(&r.source).unwrap_or(serde_json::Value::Null),
            created_at: parse_datetime(&r.created_at),
            updated_at: parse_datetime(&r.updated_at),
        }
    }
}

/// Handle to the main events database.
#[derive(Clone)]
pub struct MainStore {
    pool: AsyncSqlitePool,
}

impl MainStore {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_event(&self, event: &HistoricalEvent) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(events::table)
            .values((
                events::id.eq(&event.id),
                events::title.eq(&event.title),
                events::event_date.eq(event.date.map(|d| d.to_string())),
                events::body.eq(&event.body),
                events::source.eq(event.source.to_string()),
                events::created_at.eq(event.created_at.to_rfc3339()),
                events::updated_at.eq(event.updated_at.to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Option<HistoricalEvent>> {
        let mut conn = self.pool.get().await?;
        let record: Option<EventRecord> = events::table
            .find(event_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(HistoricalEvent::from))
    }

    pub async fn update_event(&self, event: &HistoricalEvent) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(events::table.find(&event.id))
            .set((
                events::title.eq(&event.title),
                events::event_date.eq(event.date.map(|d| d.to_string())),
                events::body.eq(&event.body),
                events::source.eq(event.source.to_string()),
                events::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn delete_event(&self, event_id: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::delete(events::table.find(event_id))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn list_events(&self, limit: i64, offset: i64) -> Result<Vec<HistoricalEvent>> {
        let mut conn = self.pool.get().await?;
        let records: Vec<EventRecord> = events::table
            .order(events::created_at.asc())
            .limit(limit)
            .offset(offset)
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(HistoricalEvent::from).collect())
    }

    /// Events whose date lies in `[from, to]`, plus undated events.
    pub async fn events_around(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HistoricalEvent>> {
        let mut conn = self.pool.get().await?;
        let records: Vec<EventRecord> = events::table
            .filter(
                events::event_date
                    .ge(from.to_string())
                    .and(events::event_date.le(to.to_string()))
                    .or(events::event_date.is_null()),
            )
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(HistoricalEvent::from).collect())
    }
}

/// Optional overrides for a promotion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromoteOverrides {
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    /// Promote even when a similar event already exists.
    pub skip_duplicate_check: bool,
}

/// A near-duplicate candidate in the main store.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCandidate {
    pub event_id: String,
    pub title: String,
    pub similarity: f64,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Orphan events re-attached to their segment via a new link.
    pub attached: u64,
    /// Orphan events removed because their segment is gone or changed.
    pub removed: u64,
    /// Links dropped because the event no longer exists.
    pub dropped_links: u64,
}

/// The connector.
#[derive(Clone)]
pub struct MainDbConnector {
    repository: RepositoryStore,
    /// Pool of the repository index, which owns the link table.
    repo_pool: AsyncSqlitePool,
    main: MainStore,
}

impl MainDbConnector {
    pub fn new(repository: RepositoryStore, repo_pool: AsyncSqlitePool, main: MainStore) -> Self {
        Self {
            repository,
            repo_pool,
            main,
        }
    }

    pub fn main(&self) -> &MainStore {
        &self.main
    }

    /// Promote a segment into the main store, returning the event id.
    pub async fn promote(
        &self,
        segment_id: &str,
        overrides: &PromoteOverrides,
    ) -> Result<String> {
        let segment = self
            .repository
            .get_segment(segment_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("segment", segment_id))?;

        if let Some(link) = self.get_link(segment_id).await? {
            return Err(AcquireError::conflict(
                "segment already promoted",
                link.event_id,
            ));
        }

        let page = self
            .repository
            .get_page(&segment.page_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("page", segment.page_id.clone()))?;

        let title = overrides
            .title
            .clone()
            .unwrap_or_else(|| derive_title(&segment.text));
        let date = overrides.date.or(Some(page.issue_date));

        if !overrides.skip_duplicate_check {
            if let Some(date) = date {
                let duplicates = self
                    .find_duplicates(&segment.text, Some(&title), Some(date), DUPLICATE_THRESHOLD)
                    .await?;
                if let Some(existing) = duplicates.as_slice().first() {
                    return Err(AcquireError::conflict(
                        format!(
                            "a similar event exists ({}% match)",
                            (existing.similarity * 100.0).round()
                        ),
                        existing.event_id.clone(),
                    ));
                }
            }
        }

        let content_hash = hash_text(&segment.text);
        let source = serde_json::json!({
            "segment_id": segment.id,
            "content_hash": content_hash,
            "clip_path": segment.clip_path.as_ref().map(|p| p.display().to_string()),
            "page": {
                "lccn": page.lccn,
                "publication_title": page.publication_title,
                "issue_date": page.issue_date.to_string(),
                "sequence": page.sequence,
                "source_system": page.source_system,
            },
        });

        let now = Utc::now();
        let event = HistoricalEvent {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            date,
            body: segment.text.clone(),
            source,
            created_at: now,
            updated_at: now,
        };
        self.main.insert_event(&event).await?;

        // The link write is what makes the promotion durable; a crash
        // between the two writes leaves an orphan for reconcile().
        self.insert_link(&EventLink {
            segment_id: segment.id.clone(),
            event_id: event.id.clone(),
            content_hash,
            created_at: now,
        })
        .await?;

        self.repository
            .update_segment_status(segment_id, SegmentStatus::Promoted)
            .await?;

        info!(segment_id, event_id = %event.id, "segment promoted");
        Ok(event.id)
    }

    /// Events within one day of `date` whose body is at least `threshold`
    /// similar (token-set Jaccard) to `text`.
    pub async fn find_duplicates(
        &self,
        text: &str,
        title: Option<&str>,
        date: Option<NaiveDate>,
        threshold: f64,
    ) -> Result<Vec<DuplicateCandidate>> {
        let candidates = match date {
            Some(date) => {
                let from = date.pred_opt().unwrap_or(date);
                let to = date.succ_opt().unwrap_or(date);
                self.main.events_around(from, to).await?
            }
            None => self.main.list_events(i64::MAX, 0).await?,
        };

        let mut duplicates = Vec::new();
        for event in candidates {
            let mut similarity = token_set_jaccard(text, &event.body);
            if let Some(title) = title {
                similarity = similarity.max(token_set_jaccard(title, &event.title));
            }
            if similarity >= threshold {
                duplicates.push(DuplicateCandidate {
                    event_id: event.id,
                    title: event.title,
                    similarity,
                });
            }
        }
        duplicates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(duplicates)
    }

    /// Converge events and links after crashes.
    ///
    /// An event whose source pointer names a segment but has no link row is
    /// an orphan: re-attach it when the segment still exists with the same
    /// content hash, remove it otherwise. A link whose event is gone is
    /// dropped and the segment demoted to reviewed.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let mut offset = 0i64;
        loop {
            let events = self.main.list_events(500, offset).await?;
            if events.is_empty() {
                break;
            }
            offset += events.len() as i64;

            for event in events {
                let Some(segment_id) = event.source_segment_id().map(|s| s.to_string()) else {
                    continue;
                };
                if self.get_link(&segment_id).await?.is_some() {
                    continue;
                }

                let segment = self.repository.get_segment(&segment_id).await?;
                let matching = segment.filter(|s| {
                    event.source_content_hash() == Some(hash_text(&s.text).as_str())
                });

                if let Some(segment) = matching {
                    self.insert_link(&EventLink {
                        segment_id: segment_id.clone(),
                        event_id: event.id.clone(),
                        content_hash: hash_text(&segment.text),
                        created_at: Utc::now(),
                    })
                    .await?;
                    let _ = self
                        .repository
                        .update_segment_status(&segment_id, SegmentStatus::Promoted)
                        .await;
                    report.attached += 1;
                    info!(event_id = %event.id, segment_id, "orphan event re-attached");
                } else {
                    self.main.delete_event(&event.id).await?;
                    report.removed += 1;
                    warn!(event_id = %event.id, segment_id, "orphan event removed");
                }
            }
        }

        for link in self.list_links().await? {
            if self.main.get_event(&link.event_id).await?.is_none() {
                self.delete_link(&link.segment_id).await?;
                let _ = self
                    .repository
                    .update_segment_status(&link.segment_id, SegmentStatus::Reviewed)
                    .await;
                report.dropped_links += 1;
            }
        }

        Ok(report)
    }

    /// Push segment text changes into their linked events.
    pub async fn sync_to_main(&self) -> Result<u64> {
        let mut updated = 0u64;
        for link in self.list_links().await? {
            let Some(segment) = self.repository.get_segment(&link.segment_id).await? else {
                continue;
            };
            let Some(mut event) = self.main.get_event(&link.event_id).await? else {
                continue;
            };
            if event.body != segment.text {
                event.body = segment.text.clone();
                if let Some(obj) = event.source.as_object_mut() {
                    obj.insert(
                        "content_hash".to_string(),
                        serde_json::Value::String(hash_text(&segment.text)),
                    );
                }
                self.main.update_event(&event).await?;
                self.update_link_hash(&link.segment_id, &hash_text(&segment.text))
                    .await?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Pull event edits back into the linked segments' stored text.
    pub async fn sync_from_main(&self) -> Result<u64> {
        use crate::schema::article_segments;
        let mut updated = 0u64;
        for link in self.list_links().await? {
            let Some(event) = self.main.get_event(&link.event_id).await? else {
                continue;
            };
            let Some(segment) = self.repository.get_segment(&link.segment_id).await? else {
                continue;
            };
            if segment.text != event.body {
                let mut conn = self.repo_pool.get().await?;
                diesel::update(article_segments::table.find(&link.segment_id))
                    .set(article_segments::text.eq(&event.body))
                    .execute(&mut conn)
                    .await?;
                self.update_link_hash(&link.segment_id, &hash_text(&event.body))
                    .await?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Link table
    // ------------------------------------------------------------------

    pub async fn get_link(&self, segment_id: &str) -> Result<Option<EventLink>> {
        let mut conn = self.repo_pool.get().await?;
        let record: Option<EventLinkRecord> = event_links::table
            .find(segment_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(EventLink::from))
    }

    pub async fn list_links(&self) -> Result<Vec<EventLink>> {
        let mut conn = self.repo_pool.get().await?;
        let records: Vec<EventLinkRecord> = event_links::table.load(&mut conn).await?;
        Ok(records.into_iter().map(EventLink::from).collect())
    }

    async fn insert_link(&self, link: &EventLink) -> Result<()> {
        let mut conn = self.repo_pool.get().await?;
        let record = NewEventLinkRecord {
            segment_id: &link.segment_id,
            event_id: &link.event_id,
            content_hash: &link.content_hash,
            created_at: link.created_at.to_rfc3339(),
        };
        diesel::insert_into(event_links::table)
            .values(&record)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn update_link_hash(&self, segment_id: &str, content_hash: &str) -> Result<()> {
        let mut conn = self.repo_pool.get().await?;
        diesel::update(event_links::table.find(segment_id))
            .set(event_links::content_hash.eq(content_hash))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_link(&self, segment_id: &str) -> Result<()> {
        let mut conn = self.repo_pool.get().await?;
        diesel::delete(event_links::table.find(segment_id))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

/// First non-empty line of the segment text, clipped for a title.
fn derive_title(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Untitled");
    line.chars().take(120).collect()
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Jaccard similarity of the two texts' token sets.
pub fn token_set_jaccard(a: &str, b: &str) -> f64 {
    let set = |s: &str| {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect::<std::collections::HashSet<String>>()
    };
    let a = set(a);
    let b = set(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("\n  GREAT FIRE \nthe city burned"), "GREAT FIRE");
        assert_eq!(derive_title(""), "Untitled");
        let long = "x".repeat(300);
        assert_eq!(derive_title(&long).chars().count(), 120);
    }

    #[test]
    fn test_token_set_jaccard() {
        assert_eq!(token_set_jaccard("the great fire", "the great fire"), 1.0);
        assert_eq!(token_set_jaccard("", ""), 1.0);
        assert_eq!(token_set_jaccard("alpha beta", "gamma delta"), 0.0);
        let partial = token_set_jaccard("the great fire", "the great flood");
        assert!(partial > 0.4 && partial < 0.6, "{partial}");
        // order and case do not matter
        assert_eq!(token_set_jaccard("Fire Great", "great fire"), 1.0);
    }
}
