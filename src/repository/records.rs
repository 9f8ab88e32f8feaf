//! Diesel row structs for the repository index, with conversions to the
//! domain models.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use diesel::prelude::*;

use super::{parse_date_opt, parse_datetime, parse_datetime_opt};
use crate::models::{
    ArticleSegment, BoundingBox, BulkOperation, BulkStatus, EventLink, NewspaperArticle,
    NewspaperPage, PageStatus, Publication, SegmentKind, SegmentStatus, Task, TaskOperation,
    TaskStatus,
};
use crate::schema::{
    article_segments, bulk_processing_tasks, event_links, newspaper_articles, newspaper_pages,
    processing_queue, publications,
};

/// Parse a JSON object column into a metadata map.
pub fn parse_metadata(json: &str) -> HashMap<String, serde_json::Value> {
    serde_json::from_str(json).unwrap_or_default()
}

/// Serialize a metadata map for storage.
pub fn metadata_to_json(metadata: &HashMap<String, serde_json::Value>) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = publications)]
#[diesel(primary_key(lccn))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PublicationRecord {
    pub lccn: String,
    pub title: String,
    pub place: Option<String>,
    pub first_issue_date: Option<String>,
    pub last_issue_date: Option<String>,
    pub created_at: String,
}

impl From<PublicationRecord> for Publication {
    fn from(r: PublicationRecord) -> Self {
        Publication {
            lccn: r.lccn,
            title: r.title,
            place: r.place,
            first_issue_date: parse_date_opt(r.first_issue_date),
            last_issue_date: parse_date_opt(r.last_issue_date),
            created_at: parse_datetime(&r.created_at),
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = publications)]
pub struct NewPublicationRecord<'a> {
    pub lccn: &'a str,
    pub title: &'a str,
    pub place: Option<&'a str>,
    pub first_issue_date: Option<String>,
    pub last_issue_date: Option<String>,
    pub created_at: String,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = newspaper_pages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PageRecord {
    pub id: String,
    pub lccn: String,
    pub publication_title: String,
    pub issue_date: String,
    pub sequence: i32,
    pub source_system: String,
    pub image_path: String,
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,
    pub ocr_text_path: Option<String>,
    pub hocr_path: Option<String>,
    pub ocr_text: Option<String>,
    pub status: String,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<PageRecord> for NewspaperPage {
    fn from(r: PageRecord) -> Self {
        NewspaperPage {
            id: r.id,
            lccn: r.lccn,
            publication_title: r.publication_title,
            issue_date: NaiveDate::parse_from_str(&r.issue_date, "%Y-%m-%d")
                .unwrap_or(NaiveDate::MIN),
            sequence: r.sequence.max(0) as u32,
            source_system: r.source_system,
            image_path: PathBuf::from(r.image_path),
            image_width: r.image_width.map(|w| w.max(0) as u32),
            image_height: r.image_height.map(|h| h.max(0) as u32),
            ocr_text_path: r.ocr_text_path.map(PathBuf::from),
            hocr_path: r.hocr_path.map(PathBuf::from),
            ocr_text: r.ocr_text,
            status: PageStatus::parse(&r.status).unwrap_or(PageStatus::New),
            metadata: parse_metadata(&r.metadata),
            created_at: parse_datetime(&r.created_at),
            updated_at: parse_datetime(&r.updated_at),
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = newspaper_pages)]
pub struct NewPageRecord<'a> {
    pub id: &'a str,
    pub lccn: &'a str,
    pub publication_title: &'a str,
    pub issue_date: String,
    pub sequence: i32,
    pub source_system: &'a str,
    pub image_path: String,
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,
    pub status: &'a str,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = article_segments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SegmentRecord {
    pub id: String,
    pub page_id: String,
    pub kind: String,
    pub bbox_x: i32,
    pub bbox_y: i32,
    pub bbox_width: i32,
    pub bbox_height: i32,
    pub text: String,
    pub confidence: f64,
    pub clip_path: Option<String>,
    pub status: String,
    pub created_at: String,
}

impl From<SegmentRecord> for ArticleSegment {
    fn from(r: SegmentRecord) -> Self {
        ArticleSegment {
            id: r.id,
            page_id: r.page_id,
            kind: SegmentKind::parse(&r.kind).unwrap_or(SegmentKind::Article),
            bbox: BoundingBox::new(
                r.bbox_x.max(0) as u32,
                r.bbox_y.max(0) as u32,
                r.bbox_width.max(0) as u32,
                r.bbox_height.max(0) as u32,
            ),
            text: r.text,
            confidence: r.confidence,
            clip_path: r.clip_path.map(PathBuf::from),
            status: SegmentStatus::parse(&r.status).unwrap_or(SegmentStatus::Draft),
            created_at: parse_datetime(&r.created_at),
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = article_segments)]
pub struct NewSegmentRecord<'a> {
    pub id: &'a str,
    pub page_id: &'a str,
    pub kind: &'a str,
    pub bbox_x: i32,
    pub bbox_y: i32,
    pub bbox_width: i32,
    pub bbox_height: i32,
    pub text: &'a str,
    pub confidence: f64,
    pub clip_path: Option<String>,
    pub status: &'a str,
    pub created_at: String,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = newspaper_articles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ArticleRecord {
    pub id: String,
    pub page_id: String,
    pub segment_ids: String,
    pub title: String,
    pub text: String,
    pub metadata: String,
    pub created_at: String,
}

impl From<ArticleRecord> for NewspaperArticle {
    fn from(r: ArticleRecord) -> Self {
        NewspaperArticle {
            id: r.id,
            page_id: r.page_id,
            segment_ids: serde_json::from_str(&r.segment_ids).unwrap_or_default(),
            title: r.title,
            text: r.text,
            metadata: parse_metadata(&r.metadata),
            created_at: parse_datetime(&r.created_at),
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = newspaper_articles)]
pub struct NewArticleRecord<'a> {
    pub id: &'a str,
    pub page_id: &'a str,
    pub segment_ids: String,
    pub title: &'a str,
    pub text: &'a str,
    pub metadata: String,
    pub created_at: String,
}

#[derive(Queryable, QueryableByName, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = processing_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskRecord {
    pub id: String,
    pub page_id: Option<String>,
    pub operation: String,
    pub parameters: String,
    pub priority: i32,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
    pub leased_at: Option<String>,
    pub lease_expires_at: Option<String>,
    pub next_eligible_at: Option<String>,
    pub bulk_id: Option<String>,
    pub enqueued_at: String,
    pub updated_at: String,
}

impl From<TaskRecord> for Task {
    fn from(r: TaskRecord) -> Self {
        Task {
            id: r.id,
            page_id: r.page_id,
            operation: TaskOperation::parse(&r.operation).unwrap_or(TaskOperation::Ocr),
            parameters: parse_metadata(&r.parameters),
            priority: r.priority,
            status: TaskStatus::parse(&r.status).unwrap_or(TaskStatus::Pending),
            attempts: r.attempts.max(0) as u32,
            max_attempts: r.max_attempts.max(0) as u32,
            last_error: r.last_error,
            lease_expires_at: parse_datetime_opt(r.lease_expires_at),
            next_eligible_at: parse_datetime_opt(r.next_eligible_at),
            bulk_id: r.bulk_id,
            enqueued_at: parse_datetime(&r.enqueued_at),
            updated_at: parse_datetime(&r.updated_at),
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = processing_queue)]
pub struct NewTaskRecord<'a> {
    pub id: &'a str,
    pub page_id: Option<&'a str>,
    pub operation: &'a str,
    pub parameters: String,
    pub priority: i32,
    pub status: &'a str,
    pub attempts: i32,
    pub max_attempts: i32,
    pub bulk_id: Option<&'a str>,
    pub enqueued_at: String,
    pub updated_at: String,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = bulk_processing_tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BulkRecord {
    pub id: String,
    pub description: String,
    pub operation: String,
    pub status: String,
    pub total: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl BulkRecord {
    /// Assemble the domain model from the row plus per-status child counts.
    pub fn into_bulk(self, counts: &HashMap<TaskStatus, u32>) -> BulkOperation {
        BulkOperation {
            id: self.id,
            description: self.description,
            operation: TaskOperation::parse(&self.operation).unwrap_or(TaskOperation::Ocr),
            status: BulkStatus::parse(&self.status).unwrap_or(BulkStatus::Running),
            total: self.total.max(0) as u32,
            pending: counts.get(&TaskStatus::Pending).copied().unwrap_or(0),
            in_progress: counts.get(&TaskStatus::Leased).copied().unwrap_or(0),
            succeeded: counts.get(&TaskStatus::Succeeded).copied().unwrap_or(0),
            failed: counts.get(&TaskStatus::Failed).copied().unwrap_or(0),
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = bulk_processing_tasks)]
pub struct NewBulkRecord<'a> {
    pub id: &'a str,
    pub description: &'a str,
    pub operation: &'a str,
    pub status: &'a str,
    pub total: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = event_links)]
#[diesel(primary_key(segment_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventLinkRecord {
    pub segment_id: String,
    pub event_id: String,
    pub content_hash: String,
    pub created_at: String,
}

impl From<EventLinkRecord> for EventLink {
    fn from(r: EventLinkRecord) -> Self {
        EventLink {
            segment_id: r.segment_id,
            event_id: r.event_id,
            content_hash: r.content_hash,
            created_at: parse_datetime(&r.created_at),
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = event_links)]
pub struct NewEventLinkRecord<'a> {
    pub segment_id: &'a str,
    pub event_id: &'a str,
    pub content_hash: &'a str,
    pub created_at: String,
}

impl Task {
    /// Parse a task status count pair from a GROUP BY row.
    pub fn status_counts(rows: Vec<(String, i64)>) -> HashMap<TaskStatus, u32> {
        rows.into_iter()
            .filter_map(|(status, count)| {
                TaskStatus::parse(&status).map(|s| (s, count.max(0) as u32))
            })
            .collect()
    }
}
