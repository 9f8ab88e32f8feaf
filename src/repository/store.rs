//! Repository store: owns the on-disk page files and the relational index.
//!
//! The store is the only writer under the repository base directory. Every
//! multi-row write runs in a single transaction, and file writes are paired
//! with their index rows: if the row insert fails the file is removed, so
//! the two are created together or not at all.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::{debug, warn};

use super::pool::AsyncSqlitePool;
use super::records::{
    metadata_to_json, ArticleRecord, NewArticleRecord, NewPageRecord, NewPublicationRecord,
    NewSegmentRecord, PageRecord, PublicationRecord, SegmentRecord,
};
use crate::errors::{map_unique_violation, AcquireError, Result};
use crate::models::{
    ArticleSegment, NewspaperArticle, NewspaperPage, PageStatus, Publication, SegmentStatus,
};
use crate::schema::{article_segments, newspaper_articles, newspaper_pages, processing_queue, publications};
use crate::storage::RepositoryLayout;

/// Request to add a page to the repository.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub lccn: String,
    pub publication_title: String,
    pub issue_date: NaiveDate,
    /// 1-based page number within the issue.
    pub sequence: u32,
    pub source_system: String,
    /// File extension of the original image (`jp2`, `pdf`, `png`, ...).
    pub extension: String,
    /// Raw upstream metadata, stored in the index and the `.meta.json`
    /// sidecar.
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Source of the original image bytes for [`RepositoryStore::add_page`].
pub enum PageImage {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// Predicates for [`RepositoryStore::search_pages`].
#[derive(Debug, Clone, Default)]
pub struct PageQuery {
    pub lccn: Option<String>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub status: Option<PageStatus>,
    /// Substring match over the stored OCR text.
    pub text: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl PageQuery {
    pub fn new() -> Self {
        Self {
            limit: 50,
            ..Default::default()
        }
    }
}

/// Aggregate counts for status displays.
#[derive(Debug, Clone, Default)]
pub struct RepositoryStats {
    pub total_pages: u64,
    pub pages_by_status: HashMap<String, u64>,
    pub pages_by_publication: HashMap<String, u64>,
    pub total_segments: u64,
    pub total_articles: u64,
}

/// The repository store.
#[derive(Clone)]
pub struct RepositoryStore {
    pool: AsyncSqlitePool,
    layout: RepositoryLayout,
}

impl RepositoryStore {
    pub fn new(pool: AsyncSqlitePool, layout: RepositoryLayout) -> Self {
        Self { pool, layout }
    }

    pub fn layout(&self) -> &RepositoryLayout {
        &self.layout
    }

    // ------------------------------------------------------------------
    // Publications
    // ------------------------------------------------------------------

    /// Insert or update a publication row.
    pub async fn upsert_publication(&self, publication: &Publication) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let record = NewPublicationRecord {
            lccn: &publication.lccn,
            title: &publication.title,
            place: publication.place.as_deref(),
            first_issue_date: publication.first_issue_date.map(|d| d.to_string()),
            last_issue_date: publication.last_issue_date.map(|d| d.to_string()),
            created_at: publication.created_at.to_rfc3339(),
        };
        diesel::replace_into(publications::table)
            .values(&record)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get_publication(&self, lccn: &str) -> Result<Option<Publication>> {
        let mut conn = self.pool.get().await?;
        let record: Option<PublicationRecord> = publications::table
            .find(lccn)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(Publication::from))
    }

    pub async fn list_publications(&self) -> Result<Vec<Publication>> {
        let mut conn = self.pool.get().await?;
        let records: Vec<PublicationRecord> = publications::table
            .order(publications::title.asc())
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(Publication::from).collect())
    }

    // ------------------------------------------------------------------
    // Pages
    // ------------------------------------------------------------------

    /// Add a page: write the original image (plus `.meta.json` sidecar) and
    /// insert the index row. Fails with `Conflict` when
    /// `(lccn, issue_date, sequence, source_system)` already exists.
    pub async fn add_page(&self, request: NewPage, image: PageImage) -> Result<NewspaperPage> {
        validate_lccn(&request.lccn)?;
        if request.sequence == 0 {
            return Err(AcquireError::Validation(
                "page sequence is 1-based".to_string(),
            ));
        }

        if let Some(existing) = self.find_page_id(&request).await? {
            return Err(AcquireError::conflict("page already exists", existing));
        }

        let bytes = match image {
            PageImage::Bytes(bytes) => bytes,
            PageImage::File(path) => std::fs::read(&path)?,
        };
        let (width, height) = image_dimensions(&bytes, &request.extension)?;

        let image_path = self.layout.original_path(
            &request.source_system,
            &request.lccn,
            request.issue_date,
            request.sequence,
            &request.extension,
        );
        if let Some(parent) = image_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&image_path, &bytes)?;

        let sidecar = RepositoryLayout::sidecar_path(&image_path);
        std::fs::write(&sidecar, metadata_to_json(&request.metadata))?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let record = NewPageRecord {
            id: &id,
            lccn: &request.lccn,
            publication_title: &request.publication_title,
            issue_date: request.issue_date.to_string(),
            sequence: request.sequence as i32,
            source_system: &request.source_system,
            image_path: image_path.display().to_string(),
            image_width: width.map(|w| w as i32),
            image_height: height.map(|h| h as i32),
            status: PageStatus::New.as_str(),
            metadata: metadata_to_json(&request.metadata),
            created_at: now.clone(),
            updated_at: now,
        };

        let mut conn = self.pool.get().await?;
        let inserted = diesel::insert_into(newspaper_pages::table)
            .values(&record)
            .execute(&mut conn)
            .await;

        if let Err(err) = inserted {
            // Roll the file writes back so disk and index stay in step.
            let _ = std::fs::remove_file(&sidecar);
            let _ = std::fs::remove_file(&image_path);
            let existing = self.find_page_id(&request).await.ok().flatten();
            return Err(map_unique_violation(
                err,
                "page already exists",
                existing.as_deref().unwrap_or("unknown"),
            ));
        }

        debug!(page_id = %id, path = %image_path.display(), "added page");
        self.get_page(&id)
            .await?
            .ok_or_else(|| AcquireError::Internal("page missing after insert".to_string()))
    }

    async fn find_page_id(&self, request: &NewPage) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let existing: Option<String> = newspaper_pages::table
            .filter(newspaper_pages::lccn.eq(&request.lccn))
            .filter(newspaper_pages::issue_date.eq(request.issue_date.to_string()))
            .filter(newspaper_pages::sequence.eq(request.sequence as i32))
            .filter(newspaper_pages::source_system.eq(&request.source_system))
            .select(newspaper_pages::id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(existing)
    }

    pub async fn get_page(&self, page_id: &str) -> Result<Option<NewspaperPage>> {
        let mut conn = self.pool.get().await?;
        let record: Option<PageRecord> = newspaper_pages::table
            .find(page_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(NewspaperPage::from))
    }

    /// Search pages by publication, date range, status, and OCR free text.
    pub async fn search_pages(&self, query: &PageQuery) -> Result<Vec<NewspaperPage>> {
        let mut conn = self.pool.get().await?;

        let mut stmt = newspaper_pages::table
            .order((newspaper_pages::issue_date.asc(), newspaper_pages::sequence.asc()))
            .limit(query.limit.max(1))
            .offset(query.offset.max(0))
            .into_boxed();

        if let Some(ref lccn) = query.lccn {
            stmt = stmt.filter(newspaper_pages::lccn.eq(lccn.clone()));
        }
        if let Some(start) = query.date_start {
            stmt = stmt.filter(newspaper_pages::issue_date.ge(start.to_string()));
        }
        if let Some(end) = query.date_end {
            stmt = stmt.filter(newspaper_pages::issue_date.le(end.to_string()));
        }
        if let Some(status) = query.status {
            stmt = stmt.filter(newspaper_pages::status.eq(status.as_str()));
        }
        if let Some(ref text) = query.text {
            stmt = stmt.filter(newspaper_pages::ocr_text.like(format!("%{text}%")));
        }

        let records: Vec<PageRecord> = stmt.load(&mut conn).await?;
        Ok(records.into_iter().map(NewspaperPage::from).collect())
    }

    /// Update a page's status, enforcing monotonic transitions.
    pub async fn update_page_status(&self, page_id: &str, status: PageStatus) -> Result<()> {
        let page = self
            .get_page(page_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("page", page_id))?;
        if !page.status.can_transition_to(status) {
            return Err(AcquireError::Validation(format!(
                "page {page_id} cannot move {} -> {}",
                page.status.as_str(),
                status.as_str()
            )));
        }
        let mut conn = self.pool.get().await?;
        diesel::update(newspaper_pages::table.find(page_id))
            .set((
                newspaper_pages::status.eq(status.as_str()),
                newspaper_pages::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Attach OCR output: write the text and HOCR artifacts and move the
    /// page to `ocr_done`.
    pub async fn attach_ocr(
        &self,
        page_id: &str,
        text: &str,
        hocr: Option<&str>,
    ) -> Result<NewspaperPage> {
        let page = self
            .get_page(page_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("page", page_id))?;
        if !page.status.can_transition_to(PageStatus::OcrDone) {
            return Err(AcquireError::Validation(format!(
                "page {page_id} cannot move {} -> ocr_done",
                page.status.as_str()
            )));
        }

        let text_path = self.layout.ocr_text_path(
            &page.source_system,
            &page.lccn,
            page.issue_date,
            page.sequence,
        );
        if let Some(parent) = text_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&text_path, text)?;

        let hocr_path = match hocr {
            Some(hocr) => {
                let path = self.layout.hocr_path(
                    &page.source_system,
                    &page.lccn,
                    page.issue_date,
                    page.sequence,
                );
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, hocr)?;
                Some(path)
            }
            None => None,
        };

        let mut conn = self.pool.get().await?;
        let updated = diesel::update(newspaper_pages::table.find(page_id))
            .set((
                newspaper_pages::ocr_text_path.eq(text_path.display().to_string()),
                newspaper_pages::hocr_path.eq(hocr_path.as_ref().map(|p| p.display().to_string())),
                newspaper_pages::ocr_text.eq(text),
                newspaper_pages::status.eq(PageStatus::OcrDone.as_str()),
                newspaper_pages::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await;

        if let Err(err) = updated {
            let _ = std::fs::remove_file(&text_path);
            if let Some(path) = &hocr_path {
                let _ = std::fs::remove_file(path);
            }
            return Err(err.into());
        }

        self.get_page(page_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("page", page_id))
    }

    /// Delete a page, cascading to segments, articles, event links, and any
    /// non-terminal queue tasks, then remove the files.
    pub async fn delete_page(&self, page_id: &str) -> Result<()> {
        let page = self
            .get_page(page_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("page", page_id))?;
        let clip_paths: Vec<PathBuf> = self
            .get_page_segments(page_id)
            .await?
            .into_iter()
            .filter_map(|s| s.clip_path)
            .collect();

        let mut conn = self.pool.get().await?;
        let id = page_id.to_string();
        conn.transaction::<_, AcquireError, _>(|conn| {
            Box::pin(async move {
                // Segments, articles, and event links fall out via cascade.
                diesel::delete(newspaper_pages::table.find(&id))
                    .execute(conn)
                    .await?;
                diesel::delete(
                    processing_queue::table
                        .filter(processing_queue::page_id.eq(&id))
                        .filter(processing_queue::status.eq_any(["pending", "leased"])),
                )
                .execute(conn)
                .await?;
                Ok(())
            })
        })
        .await?;

        remove_file_quietly(&page.image_path);
        remove_file_quietly(&RepositoryLayout::sidecar_path(&page.image_path));
        if let Some(path) = &page.ocr_text_path {
            remove_file_quietly(path);
        }
        if let Some(path) = &page.hocr_path {
            remove_file_quietly(path);
        }
        for path in &clip_paths {
            remove_file_quietly(path);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Segments and articles
    // ------------------------------------------------------------------

    /// Insert segments for a page transactionally and mark it `segmented`.
    ///
    /// Bounding boxes are validated against the stored page dimensions and
    /// confidences against [0, 1] before anything is written.
    pub async fn add_segments(
        &self,
        page_id: &str,
        segments: &[ArticleSegment],
    ) -> Result<Vec<String>> {
        let page = self
            .get_page(page_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("page", page_id))?;

        for segment in segments {
            if !(0.0..=1.0).contains(&segment.confidence) {
                return Err(AcquireError::Validation(format!(
                    "segment confidence {} outside [0, 1]",
                    segment.confidence
                )));
            }
            if let (Some(w), Some(h)) = (page.image_width, page.image_height) {
                if !segment.bbox.fits_within(w, h) {
                    return Err(AcquireError::Validation(format!(
                        "segment bbox {:?} outside page image {w}x{h}",
                        segment.bbox
                    )));
                }
            }
        }

        let now = Utc::now().to_rfc3339();
        let rows: Vec<NewSegmentRecord<'_>> = segments
            .iter()
            .map(|s| NewSegmentRecord {
                id: &s.id,
                page_id,
                kind: s.kind.as_str(),
                bbox_x: s.bbox.x as i32,
                bbox_y: s.bbox.y as i32,
                bbox_width: s.bbox.width as i32,
                bbox_height: s.bbox.height as i32,
                text: &s.text,
                confidence: s.confidence,
                clip_path: s.clip_path.as_ref().map(|p| p.display().to_string()),
                status: s.status.as_str(),
                created_at: s.created_at.to_rfc3339(),
            })
            .collect();

        let page_status = page.status;
        let id = page_id.to_string();
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, AcquireError, _>(|conn| {
            Box::pin(async move {
                for row in &rows {
                    diesel::insert_into(article_segments::table)
                        .values(row)
                        .execute(conn)
                        .await?;
                }
                if page_status.can_transition_to(PageStatus::Segmented) {
                    diesel::update(newspaper_pages::table.find(&id))
                        .set((
                            newspaper_pages::status.eq(PageStatus::Segmented.as_str()),
                            newspaper_pages::updated_at.eq(now),
                        ))
                        .execute(conn)
                        .await?;
                }
                Ok(())
            })
        })
        .await?;

        Ok(segments.iter().map(|s| s.id.clone()).collect())
    }

    pub async fn get_segment(&self, segment_id: &str) -> Result<Option<ArticleSegment>> {
        let mut conn = self.pool.get().await?;
        let record: Option<SegmentRecord> = article_segments::table
            .find(segment_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(ArticleSegment::from))
    }

    pub async fn get_page_segments(&self, page_id: &str) -> Result<Vec<ArticleSegment>> {
        let mut conn = self.pool.get().await?;
        let records: Vec<SegmentRecord> = article_segments::table
            .filter(article_segments::page_id.eq(page_id))
            .order(article_segments::created_at.asc())
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(ArticleSegment::from).collect())
    }

    /// Mark a segment's review status.
    pub async fn update_segment_status(
        &self,
        segment_id: &str,
        status: SegmentStatus,
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(article_segments::table.find(segment_id))
            .set(article_segments::status.eq(status.as_str()))
            .execute(&mut conn)
            .await?;
        if updated == 0 {
            return Err(AcquireError::not_found("segment", segment_id));
        }
        Ok(())
    }

    /// Insert an article after checking that every referenced segment
    /// belongs to the article's page.
    pub async fn add_article(&self, article: &NewspaperArticle) -> Result<String> {
        let segments = self.get_page_segments(&article.page_id).await?;
        let on_page: std::collections::HashSet<&str> =
            segments.iter().map(|s| s.id.as_str()).collect();
        for segment_id in &article.segment_ids {
            if !on_page.contains(segment_id.as_str()) {
                return Err(AcquireError::Validation(format!(
                    "segment {segment_id} does not belong to page {}",
                    article.page_id
                )));
            }
        }

        let mut conn = self.pool.get().await?;
        let record = NewArticleRecord {
            id: &article.id,
            page_id: &article.page_id,
            segment_ids: serde_json::to_string(&article.segment_ids).unwrap_or_default(),
            title: &article.title,
            text: &article.text,
            metadata: metadata_to_json(&article.metadata),
            created_at: article.created_at.to_rfc3339(),
        };
        diesel::insert_into(newspaper_articles::table)
            .values(&record)
            .execute(&mut conn)
            .await?;
        Ok(article.id.clone())
    }

    pub async fn get_article(&self, article_id: &str) -> Result<Option<NewspaperArticle>> {
        let mut conn = self.pool.get().await?;
        let record: Option<ArticleRecord> = newspaper_articles::table
            .find(article_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(NewspaperArticle::from))
    }

    pub async fn list_articles(&self, limit: i64, offset: i64) -> Result<Vec<NewspaperArticle>> {
        let mut conn = self.pool.get().await?;
        let records: Vec<ArticleRecord> = newspaper_articles::table
            .order(newspaper_articles::created_at.desc())
            .limit(limit)
            .offset(offset)
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(NewspaperArticle::from).collect())
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    pub async fn stats(&self) -> Result<RepositoryStats> {
        use diesel::dsl::count_star;
        let mut conn = self.pool.get().await?;

        let total_pages: i64 = newspaper_pages::table
            .select(count_star())
            .first(&mut conn)
            .await?;
        let total_segments: i64 = article_segments::table
            .select(count_star())
            .first(&mut conn)
            .await?;
        let total_articles: i64 = newspaper_articles::table
            .select(count_star())
            .first(&mut conn)
            .await?;

        let by_status: Vec<(String, i64)> = newspaper_pages::table
            .group_by(newspaper_pages::status)
            .select((newspaper_pages::status, count_star()))
            .load(&mut conn)
            .await?;
        let by_publication: Vec<(String, i64)> = newspaper_pages::table
            .group_by(newspaper_pages::lccn)
            .select((newspaper_pages::lccn, count_star()))
            .load(&mut conn)
            .await?;

        Ok(RepositoryStats {
            total_pages: total_pages as u64,
            pages_by_status: by_status
                .into_iter()
                .map(|(k, v)| (k, v as u64))
                .collect(),
            pages_by_publication: by_publication
                .into_iter()
                .map(|(k, v)| (k, v as u64))
                .collect(),
            total_segments: total_segments as u64,
            total_articles: total_articles as u64,
        })
    }
}

/// LCCNs are a short lowercase alphabetic prefix followed by digits.
fn validate_lccn(lccn: &str) -> Result<()> {
    let valid = lccn.len() >= 8
        && lccn.len() <= 16
        && lccn.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && lccn.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && lccn.chars().any(|c| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(AcquireError::Validation(format!(
            "not an LCCN-shaped identifier: {lccn:?}"
        )))
    }
}

/// Decode image dimensions when the format is one we can read.
///
/// JP2 originals are common and not decodable here; they simply get no
/// stored dimensions. A recognized format that fails to decode is corrupt.
fn image_dimensions(bytes: &[u8], extension: &str) -> Result<(Option<u32>, Option<u32>)> {
    match image::guess_format(bytes) {
        Ok(format) => match image::load_from_memory_with_format(bytes, format) {
            Ok(img) => Ok((Some(img.width()), Some(img.height()))),
            Err(e) => Err(AcquireError::CorruptData(format!(
                "undecodable {extension} image: {e}"
            ))),
        },
        Err(_) => Ok((None, None)),
    }
}

fn remove_file_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, SegmentKind};
    use crate::repository::migrations::init_repository_schema;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, RepositoryStore) {
        let dir = TempDir::new().unwrap();
        let pool = AsyncSqlitePool::from_path(&dir.path().join("repo.db"));
        init_repository_schema(&pool).await.unwrap();
        let layout = RepositoryLayout::new(dir.path().join("repository"));
        (dir, RepositoryStore::new(pool, layout))
    }

    fn request(sequence: u32) -> NewPage {
        NewPage {
            lccn: "sn83045604".to_string(),
            publication_title: "The Seattle post-intelligencer".to_string(),
            issue_date: NaiveDate::from_ymd_opt(1891, 4, 1).unwrap(),
            sequence,
            source_system: "chroniclingamerica".to_string(),
            extension: "jp2".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_add_page_round_trip() {
        let (_dir, store) = test_store().await;
        let page = store
            .add_page(request(1), PageImage::Bytes(b"jp2 bytes".to_vec()))
            .await
            .unwrap();

        assert!(page.image_path.exists());
        assert!(RepositoryLayout::sidecar_path(&page.image_path).exists());

        let loaded = store.get_page(&page.id).await.unwrap().unwrap();
        assert_eq!(loaded.lccn, page.lccn);
        assert_eq!(loaded.issue_date, page.issue_date);
        assert_eq!(loaded.sequence, 1);
        assert_eq!(loaded.status, PageStatus::New);
    }

    #[tokio::test]
    async fn test_duplicate_page_conflicts() {
        let (_dir, store) = test_store().await;
        let first = store
            .add_page(request(1), PageImage::Bytes(b"a".to_vec()))
            .await
            .unwrap();
        let err = store
            .add_page(request(1), PageImage::Bytes(b"b".to_vec()))
            .await
            .unwrap_err();
        match err {
            AcquireError::Conflict { existing_id, .. } => assert_eq!(existing_id, first.id),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_attach_ocr_transitions_status() {
        let (_dir, store) = test_store().await;
        let page = store
            .add_page(request(1), PageImage::Bytes(b"x".to_vec()))
            .await
            .unwrap();
        store
            .update_page_status(&page.id, PageStatus::Queued)
            .await
            .unwrap();

        let updated = store
            .attach_ocr(&page.id, "OCR TEXT", Some("<html/>"))
            .await
            .unwrap();
        assert_eq!(updated.status, PageStatus::OcrDone);
        assert_eq!(updated.ocr_text.as_deref(), Some("OCR TEXT"));
        assert!(updated.ocr_text_path.unwrap().exists());
        assert!(updated.hocr_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_status_cannot_regress() {
        let (_dir, store) = test_store().await;
        let page = store
            .add_page(request(1), PageImage::Bytes(b"x".to_vec()))
            .await
            .unwrap();
        store.attach_ocr(&page.id, "text", None).await.unwrap();
        let err = store
            .update_page_status(&page.id, PageStatus::Queued)
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::Validation(_)));
    }

    #[tokio::test]
    async fn test_segments_validate_and_cascade() {
        let (_dir, store) = test_store().await;
        // png bytes give the page real dimensions for bbox validation
        let png = {
            let img = image::RgbImage::new(200, 100);
            let mut bytes = Vec::new();
            img.write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();
            bytes
        };
        let mut req = request(1);
        req.extension = "png".to_string();
        let page = store.add_page(req, PageImage::Bytes(png)).await.unwrap();
        store.attach_ocr(&page.id, "text", None).await.unwrap();

        // out-of-bounds bbox rejected
        let mut bad = ArticleSegment::new(
            &page.id,
            SegmentKind::Article,
            BoundingBox::new(150, 0, 100, 50),
            "trimmed".to_string(),
        );
        bad.confidence = 0.9;
        let err = store.add_segments(&page.id, &[bad]).await.unwrap_err();
        assert!(matches!(err, AcquireError::Validation(_)));

        let mut good = ArticleSegment::new(
            &page.id,
            SegmentKind::Article,
            BoundingBox::new(0, 0, 100, 50),
            "kept".to_string(),
        );
        good.confidence = 0.9;
        store.add_segments(&page.id, &[good]).await.unwrap();

        let loaded = store.get_page(&page.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PageStatus::Segmented);
        assert_eq!(store.get_page_segments(&page.id).await.unwrap().len(), 1);

        // delete cascades
        store.delete_page(&page.id).await.unwrap();
        assert!(store.get_page(&page.id).await.unwrap().is_none());
        assert!(store.get_page_segments(&page.id).await.unwrap().is_empty());
        assert!(!page.image_path.exists());
    }

    #[tokio::test]
    async fn test_search_pages_predicates() {
        let (_dir, store) = test_store().await;
        let page = store
            .add_page(request(1), PageImage::Bytes(b"x".to_vec()))
            .await
            .unwrap();
        store
            .add_page(request(2), PageImage::Bytes(b"y".to_vec()))
            .await
            .unwrap();
        store
            .attach_ocr(&page.id, "the great fire of seattle", None)
            .await
            .unwrap();

        let mut query = PageQuery::new();
        query.text = Some("great fire".to_string());
        let hits = store.search_pages(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, page.id);

        let mut query = PageQuery::new();
        query.lccn = Some("sn83045604".to_string());
        query.date_start = NaiveDate::from_ymd_opt(1891, 4, 1);
        query.date_end = NaiveDate::from_ymd_opt(1891, 4, 30);
        assert_eq!(store.search_pages(&query).await.unwrap().len(), 2);

        let mut query = PageQuery::new();
        query.date_end = NaiveDate::from_ymd_opt(1890, 12, 31);
        assert!(store.search_pages(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reject_bad_lccn() {
        let (_dir, store) = test_store().await;
        let mut req = request(1);
        req.lccn = "NOT AN LCCN".to_string();
        let err = store
            .add_page(req, PageImage::Bytes(b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::Validation(_)));
    }
}
