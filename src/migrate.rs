//! Export, import, and backup.
//!
//! Export writes the logical row set (pages, segments, articles, events)
//! as one JSON bundle or a directory of CSV files. Import reads a JSON
//! bundle back, a CSV file through a caller-supplied column mapping, or the
//! matching tables of another SQLite database. Imported rows keep their
//! identifiers, so export-then-import round-trips the logical row set.

use std::collections::HashMap;
use std::path::Path;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::AppContext;
use crate::errors::{AcquireError, Result};
use crate::models::{ArticleSegment, HistoricalEvent, NewspaperArticle, NewspaperPage};
use crate::repository::records::{metadata_to_json, PageRecord};
use crate::repository::{migrations, AsyncSqlitePool, PageQuery};
use crate::schema::{article_segments, newspaper_articles, newspaper_pages};

/// The exported bundle.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExportBundle {
    pub pages: Vec<NewspaperPage>,
    pub segments: Vec<ArticleSegment>,
    pub articles: Vec<NewspaperArticle>,
    pub events: Vec<HistoricalEvent>,
}

/// Export to `output` in the given format (`json` or `csv`), optionally
/// restricted to one publication.
pub async fn export(
    ctx: &AppContext,
    output: &Path,
    format: &str,
    lccn: Option<&str>,
) -> Result<ExportBundle> {
    let bundle = collect_bundle(ctx, lccn).await?;
    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&bundle)
                .map_err(|e| AcquireError::Internal(format!("serialize export: {e}")))?;
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(output, json)?;
        }
        "csv" => {
            std::fs::create_dir_all(output)?;
            std::fs::write(output.join("pages.csv"), pages_csv(&bundle.pages))?;
            std::fs::write(output.join("segments.csv"), segments_csv(&bundle.segments))?;
            std::fs::write(output.join("events.csv"), events_csv(&bundle.events))?;
        }
        other => {
            return Err(AcquireError::Validation(format!(
                "unknown export format: {other}"
            )))
        }
    }
    info!(
        pages = bundle.pages.len(),
        segments = bundle.segments.len(),
        events = bundle.events.len(),
        output = %output.display(),
        "export finished"
    );
    Ok(bundle)
}

async fn collect_bundle(ctx: &AppContext, lccn: Option<&str>) -> Result<ExportBundle> {
    let mut bundle = ExportBundle::default();

    let mut offset = 0i64;
    loop {
        let mut query = PageQuery::new();
        query.limit = 500;
        query.offset = offset;
        query.lccn = lccn.map(str::to_string);
        let pages = ctx.store.search_pages(&query).await?;
        if pages.is_empty() {
            break;
        }
        offset += pages.len() as i64;
        for page in pages {
            bundle
                .segments
                .extend(ctx.store.get_page_segments(&page.id).await?);
            bundle.pages.push(page);
        }
    }

    let mut offset = 0i64;
    loop {
        let articles = ctx.store.list_articles(500, offset).await?;
        if articles.is_empty() {
            break;
        }
        offset += articles.len() as i64;
        let page_ids: std::collections::HashSet<&str> =
            bundle.pages.iter().map(|p| p.id.as_str()).collect();
        bundle
            .articles
            .extend(articles.into_iter().filter(|a| page_ids.contains(a.page_id.as_str())));
    }

    if lccn.is_none() {
        let mut offset = 0i64;
        loop {
            let events = ctx.connector.main().list_events(500, offset).await?;
            if events.is_empty() {
                break;
            }
            offset += events.len() as i64;
            bundle.events.extend(events);
        }
    }
    Ok(bundle)
}

/// Import from a JSON bundle, a mapped CSV file, or another SQLite
/// database. Returns the number of imported rows.
pub async fn import(
    ctx: &AppContext,
    source_type: &str,
    source_path: &Path,
    mapping: &serde_json::Value,
) -> Result<u64> {
    match source_type {
        "json" => import_json(ctx, source_path).await,
        "csv" => import_csv(ctx, source_path, mapping).await,
        "sqlite" => import_sqlite(ctx, source_path).await,
        other => Err(AcquireError::Validation(format!(
            "unknown import source type: {other}"
        ))),
    }
}

async fn import_json(ctx: &AppContext, path: &Path) -> Result<u64> {
    let content = std::fs::read_to_string(path)?;
    let bundle: ExportBundle = serde_json::from_str(&content)
        .map_err(|e| AcquireError::Validation(format!("invalid export bundle: {e}")))?;

    let mut count = 0u64;
    for page in &bundle.pages {
        upsert_page_row(ctx, page).await?;
        count += 1;
    }
    for segment in &bundle.segments {
        upsert_segment_row(ctx, segment).await?;
        count += 1;
    }
    for article in &bundle.articles {
        upsert_article_row(ctx, article).await?;
        count += 1;
    }
    for event in &bundle.events {
        if ctx.connector.main().get_event(&event.id).await?.is_some() {
            ctx.connector.main().update_event(event).await?;
        } else {
            ctx.connector.main().insert_event(event).await?;
        }
        count += 1;
    }
    info!(rows = count, "json import finished");
    Ok(count)
}

/// Rows are written directly (ids preserved) so round-trips are lossless;
/// the files referenced by imported pages are expected to travel with the
/// repository directory.
async fn upsert_page_row(ctx: &AppContext, page: &NewspaperPage) -> Result<()> {
    let mut conn = ctx.repo_pool.get().await?;
    diesel::replace_into(newspaper_pages::table)
        .values((
            newspaper_pages::id.eq(&page.id),
            newspaper_pages::lccn.eq(&page.lccn),
            newspaper_pages::publication_title.eq(&page.publication_title),
            newspaper_pages::issue_date.eq(page.issue_date.to_string()),
            newspaper_pages::sequence.eq(page.sequence as i32),
            newspaper_pages::source_system.eq(&page.source_system),
            newspaper_pages::image_path.eq(page.image_path.display().to_string()),
            newspaper_pages::image_width.eq(page.image_width.map(|w| w as i32)),
            newspaper_pages::image_height.eq(page.image_height.map(|h| h as i32)),
            newspaper_pages::ocr_text_path
                .eq(page.ocr_text_path.as_ref().map(|p| p.display().to_string())),
            newspaper_pages::hocr_path
                .eq(page.hocr_path.as_ref().map(|p| p.display().to_string())),
            newspaper_pages::ocr_text.eq(page.ocr_text.as_deref()),
            newspaper_pages::status.eq(page.status.as_str()),
            newspaper_pages::metadata.eq(metadata_to_json(&page.metadata)),
            newspaper_pages::created_at.eq(page.created_at.to_rfc3339()),
            newspaper_pages::updated_at.eq(page.updated_at.to_rfc3339()),
        ))
        .execute(&mut conn)
        .await?;
    Ok(())
}

async fn upsert_segment_row(ctx: &AppContext, segment: &ArticleSegment) -> Result<()> {
    let mut conn = ctx.repo_pool.get().await?;
    diesel::replace_into(article_segments::table)
        .values((
            article_segments::id.eq(&segment.id),
            article_segments::page_id.eq(&segment.page_id),
            article_segments::kind.eq(segment.kind.as_str()),
            article_segments::bbox_x.eq(segment.bbox.x as i32),
            article_segments::bbox_y.eq(segment.bbox.y as i32),
            article_segments::bbox_width.eq(segment.bbox.width as i32),
            article_segments::bbox_height.eq(segment.bbox.height as i32),
            article_segments::text.eq(&segment.text),
            article_segments::confidence.eq(segment.confidence),
            article_segments::clip_path
                .eq(segment.clip_path.as_ref().map(|p| p.display().to_string())),
            article_segments::status.eq(segment.status.as_str()),
            article_segments::created_at.eq(segment.created_at.to_rfc3339()),
        ))
        .execute(&mut conn)
        .await?;
    Ok(())
}

async fn upsert_article_row(ctx: &AppContext, article: &NewspaperArticle) -> Result<()> {
    let mut conn = ctx.repo_pool.get().await?;
    diesel::replace_into(newspaper_articles::table)
        .values((
            newspaper_articles::id.eq(&article.id),
            newspaper_articles::page_id.eq(&article.page_id),
            newspaper_articles::segment_ids
                .eq(serde_json::to_string(&article.segment_ids).unwrap_or_default()),
            newspaper_articles::title.eq(&article.title),
            newspaper_articles::text.eq(&article.text),
            newspaper_articles::metadata.eq(metadata_to_json(&article.metadata)),
            newspaper_articles::created_at.eq(article.created_at.to_rfc3339()),
        ))
        .execute(&mut conn)
        .await?;
    Ok(())
}

/// CSV import: each row becomes an event in the main store, with the
/// mapping naming the source column for each field, e.g.
/// `{"title": "headline", "date": "published", "body": "content"}`.
async fn import_csv(
    ctx: &AppContext,
    path: &Path,
    mapping: &serde_json::Value,
) -> Result<u64> {
    let content = std::fs::read_to_string(path)?;
    let rows = parse_csv(&content);
    let Some(header) = rows.as_slice().first() else {
        return Ok(0);
    };
    let column = |field: &str| -> Option<usize> {
        let name = mapping.get(field).and_then(|v| v.as_str())?;
        header.iter().position(|h| h == name)
    };
    let title_col = column("title");
    let date_col = column("date");
    let body_col = column("body");
    if title_col.is_none() && body_col.is_none() {
        return Err(AcquireError::Validation(
            "csv mapping must name a title or body column".to_string(),
        ));
    }

    let mut count = 0u64;
    for row in &rows[1..] {
        let get = |col: Option<usize>| col.and_then(|i| row.get(i)).cloned().unwrap_or_default();
        let title = get(title_col);
        let body = get(body_col);
        if title.is_empty() && body.is_empty() {
            continue;
        }
        let now = chrono::Utc::now();
        let event = HistoricalEvent {
            id: uuid::Uuid::new_v4().to_string(),
            title: if title.is_empty() {
                body.chars().take(80).collect()
            } else {
                title
            },
            date: chrono::NaiveDate::parse_from_str(&get(date_col), "%Y-%m-%d").ok(),
            body,
            source: serde_json::json!({"imported_from": path.display().to_string()}),
            created_at: now,
            updated_at: now,
        };
        ctx.connector.main().insert_event(&event).await?;
        count += 1;
    }
    info!(rows = count, "csv import finished");
    Ok(count)
}

/// Import the repository tables of another newsacquire SQLite database.
async fn import_sqlite(ctx: &AppContext, path: &Path) -> Result<u64> {
    if !path.exists() {
        return Err(AcquireError::not_found(
            "sqlite database",
            path.display().to_string(),
        ));
    }
    let source = AsyncSqlitePool::from_path(path);
    migrations::init_repository_schema(&source).await?;

    let mut count = 0u64;
    let mut conn = source.get().await?;
    let records: Vec<PageRecord> = newspaper_pages::table.load(&mut conn).await?;
    drop(conn);
    for record in records {
        let page = NewspaperPage::from(record);
        upsert_page_row(ctx, &page).await?;
        count += 1;
    }
    info!(rows = count, "sqlite import finished");
    Ok(count)
}

/// Back up every database to a directory.
pub async fn backup(ctx: &AppContext, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    migrations::backup_to(&ctx.repo_pool, &output_dir.join("repository.db")).await?;
    let search_pool = AsyncSqlitePool::from_path(&ctx.settings.search_index_path);
    migrations::backup_to(&search_pool, &output_dir.join("search_index.db")).await?;
    let main_pool = AsyncSqlitePool::from_path(&ctx.settings.main_database_path);
    migrations::backup_to(&main_pool, &output_dir.join("main.db")).await?;
    info!(output = %output_dir.display(), "backup finished");
    Ok(())
}

// ---------------------------------------------------------------------------
// Minimal CSV encoding (RFC 4180 quoting)
// ---------------------------------------------------------------------------

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

fn pages_csv(pages: &[NewspaperPage]) -> String {
    let mut out = String::from("id,lccn,issue_date,sequence,source_system,status,image_path\n");
    for p in pages {
        out.push_str(&csv_line(&[
            p.id.clone(),
            p.lccn.clone(),
            p.issue_date.to_string(),
            p.sequence.to_string(),
            p.source_system.clone(),
            p.status.as_str().to_string(),
            p.image_path.display().to_string(),
        ]));
        out.push('\n');
    }
    out
}

fn segments_csv(segments: &[ArticleSegment]) -> String {
    let mut out = String::from("id,page_id,kind,x,y,width,height,confidence,status,text\n");
    for s in segments {
        out.push_str(&csv_line(&[
            s.id.clone(),
            s.page_id.clone(),
            s.kind.as_str().to_string(),
            s.bbox.x.to_string(),
            s.bbox.y.to_string(),
            s.bbox.width.to_string(),
            s.bbox.height.to_string(),
            s.confidence.to_string(),
            s.status.as_str().to_string(),
            s.text.clone(),
        ]));
        out.push('\n');
    }
    out
}

fn events_csv(events: &[HistoricalEvent]) -> String {
    let mut out = String::from("id,title,date,body\n");
    for e in events {
        out.push_str(&csv_line(&[
            e.id.clone(),
            e.title.clone(),
            e.date.map(|d| d.to_string()).unwrap_or_default(),
            e.body.clone(),
        ]));
        out.push('\n');
    }
    out
}

/// Parse CSV with RFC 4180 quoting into rows of fields.
fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => row.push(std::mem::take(&mut field)),
                '\r' => {}
                '\n' => {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                _ => field.push(c),
            }
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// Map of field name to column name, parsed from the CLI `--mapping` JSON.
pub fn parse_mapping(raw: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| AcquireError::Validation(format!("invalid mapping JSON: {e}")))?;
    if !value.is_object() {
        return Err(AcquireError::Validation(
            "mapping must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// Convenience for building a mapping from pairs in tests and callers.
pub fn mapping_from_pairs(pairs: &[(&str, &str)]) -> serde_json::Value {
    let map: HashMap<&str, &str> = pairs.iter().copied().collect();
    serde_json::json!(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_quoting_round_trip() {
        let fields = vec![
            "plain".to_string(),
            "with,comma".to_string(),
            "with \"quotes\"".to_string(),
            "with\nnewline".to_string(),
        ];
        let line = csv_line(&fields);
        let parsed = parse_csv(&format!("{line}\n"));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0], fields);
    }

    #[test]
    fn test_parse_csv_multiple_rows() {
        let rows = parse_csv("a,b,c\n1,2,3\n");
        assert_eq!(rows, vec![vec!["a", "b", "c"], vec!["1", "2", "3"]]);
        // trailing unterminated row still counts
        let rows = parse_csv("a,b\n1,2");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_parse_mapping_rejects_non_objects() {
        assert!(parse_mapping(r#"{"title": "headline"}"#).is_ok());
        assert!(parse_mapping("[1,2]").is_err());
        assert!(parse_mapping("not json").is_err());
    }
}
