//! Acquisition commands: download, process, extract-entities.

use std::collections::HashMap;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use super::parse_date_arg;
use crate::archive::{DownloadFormat, SearchQuery, SOURCE_SYSTEM};
use crate::config::Settings;
use crate::context::AppContext;
use crate::errors::{AcquireError, Result};
use crate::models::{PageStatus, Publication, Task, TaskOperation};
use crate::repository::{NewPage, PageImage, PageQuery};

/// Search the archive and pull matching pages into the repository,
/// enqueueing OCR for each new page under one bulk.
pub async fn cmd_download(
    settings: Settings,
    source: &str,
    publication: &str,
    start_date: &str,
    end_date: &str,
    max_items: usize,
    formats: &str,
) -> Result<()> {
    if source != SOURCE_SYSTEM {
        return Err(AcquireError::Validation(format!(
            "unknown source system: {source}"
        )));
    }
    let date_start = parse_date_arg(start_date)?;
    let date_end = parse_date_arg(end_date)?;
    if date_end < date_start {
        return Err(AcquireError::Validation(
            "end date precedes start date".to_string(),
        ));
    }
    let formats: Vec<DownloadFormat> = formats
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| {
            DownloadFormat::parse(f)
                .ok_or_else(|| AcquireError::Validation(format!("unknown format: {f}")))
        })
        .collect::<Result<_>>()?;

    let ctx = AppContext::initialize(settings).await?;

    let mut query = SearchQuery::new();
    query.lccn = Some(publication.to_string());
    query.date_start = Some(date_start);
    query.date_end = Some(date_end);

    let bulk = ctx
        .queue
        .bulk_create(
            &format!("download {publication} {date_start}..{date_end}"),
            TaskOperation::Ocr,
        )
        .await?;

    let mut downloaded = 0usize;
    let mut skipped = 0usize;
    let mut publication_title = publication.to_string();
    loop {
        let outcome = ctx.archive.search_pages(&query).await?;
        for adjustment in &outcome.adjustments {
            println!(
                "  {} {} date adjusted: {} -> {} ({})",
                style("!").yellow(),
                adjustment.field,
                adjustment.original,
                adjustment.adjusted,
                adjustment.reason
            );
        }
        if outcome.pages.is_empty() {
            break;
        }

        let bar = ProgressBar::new(outcome.pages.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
                .expect("static progress template"),
        );

        for page in &outcome.pages {
            if max_items > 0 && downloaded >= max_items {
                break;
            }
            if !page.title.is_empty() {
                publication_title = page.title.clone();
            }
            bar.set_message(format!("{} seq {}", page.issue_date, page.sequence));

            let download = ctx.archive.download_page(page, &formats).await?;
            let (extension, bytes) = pick_original(&download.files)?;
            let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
            metadata.insert("manifest".to_string(), download.manifest.clone());
            metadata.insert("title".to_string(), serde_json::json!(page.title));

            let request = NewPage {
                lccn: page.lccn.clone(),
                publication_title: page.title.clone(),
                issue_date: page.issue_date,
                sequence: page.sequence,
                source_system: SOURCE_SYSTEM.to_string(),
                extension: extension.to_string(),
                metadata,
            };
            match ctx.store.add_page(request, PageImage::Bytes(bytes)).await {
                Ok(stored) => {
                    // Archive OCR text, when fetched, saves a local OCR pass.
                    if let Some(text) = download.files.get(&DownloadFormat::OcrText) {
                        let text = String::from_utf8_lossy(text);
                        ctx.store
                            .update_page_status(&stored.id, PageStatus::Queued)
                            .await?;
                        ctx.store.attach_ocr(&stored.id, &text, None).await?;
                        ctx.search.index_page(&stored.id).await?;
                    } else {
                        ctx.store
                            .update_page_status(&stored.id, PageStatus::Queued)
                            .await?;
                    }
                    let task = Task::for_page(TaskOperation::Ocr, &stored.id);
                    ctx.queue.bulk_enqueue(&bulk.id, vec![task]).await?;
                    downloaded += 1;
                }
                Err(AcquireError::Conflict { .. }) => {
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        if (max_items > 0 && downloaded >= max_items)
            || outcome.pagination.current_page >= outcome.pagination.total_pages
        {
            break;
        }
        query.page += 1;
    }

    // Track the publication with its resolved issue range.
    let mut record = Publication::new(publication, publication_title);
    record.first_issue_date = ctx.archive.dates().earliest(publication).await?;
    record.last_issue_date = ctx.archive.dates().latest(publication).await?;
    ctx.store.upsert_publication(&record).await?;

    println!(
        "{} downloaded {downloaded} pages ({skipped} already present), bulk {}",
        style("✓").green(),
        bulk.id
    );
    Ok(())
}

/// Prefer JP2, then PDF, as the stored original.
fn pick_original(
    files: &HashMap<DownloadFormat, Vec<u8>>,
) -> Result<(&'static str, Vec<u8>)> {
    if let Some(bytes) = files.get(&DownloadFormat::Jp2) {
        return Ok(("jp2", bytes.clone()));
    }
    if let Some(bytes) = files.get(&DownloadFormat::Pdf) {
        return Ok(("pdf", bytes.clone()));
    }
    Err(AcquireError::Validation(
        "download must include jp2 or pdf to store an original".to_string(),
    ))
}

/// Enqueue OCR tasks for a publication's pages.
pub async fn cmd_process(settings: Settings, publication: &str, reprocess: bool) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;

    let mut query = PageQuery::new();
    query.lccn = Some(publication.to_string());
    query.limit = i64::MAX;
    let pages = ctx.store.search_pages(&query).await?;

    let eligible: Vec<_> = pages
        .into_iter()
        .filter(|p| {
            reprocess
                || matches!(
                    p.status,
                    PageStatus::New | PageStatus::Queued | PageStatus::Failed
                )
        })
        .collect();
    if eligible.is_empty() {
        println!("no pages to process for {publication}");
        return Ok(());
    }

    let bulk = ctx
        .queue
        .bulk_create(&format!("ocr {publication}"), TaskOperation::Ocr)
        .await?;
    let mut tasks = Vec::with_capacity(eligible.len());
    for page in &eligible {
        if page.status == PageStatus::Failed || page.status == PageStatus::New {
            let _ = ctx
                .store
                .update_page_status(&page.id, PageStatus::Queued)
                .await;
        }
        tasks.push(Task::for_page(TaskOperation::Ocr, &page.id));
    }
    ctx.queue.bulk_enqueue(&bulk.id, tasks).await?;

    println!(
        "{} enqueued {} OCR tasks under bulk {}",
        style("✓").green(),
        eligible.len(),
        bulk.id
    );
    Ok(())
}

/// Enqueue segmentation (article extraction) for OCR'd pages.
pub async fn cmd_extract_entities(
    settings: Settings,
    publication: &str,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;

    let mut query = PageQuery::new();
    query.lccn = Some(publication.to_string());
    query.status = Some(PageStatus::OcrDone);
    query.date_start = start_date.map(parse_date_arg).transpose()?;
    query.date_end = end_date.map(parse_date_arg).transpose()?;
    query.limit = i64::MAX;
    let pages = ctx.store.search_pages(&query).await?;
    if pages.is_empty() {
        println!("no OCR'd pages to segment for {publication}");
        return Ok(());
    }

    let bulk = ctx
        .queue
        .bulk_create(&format!("segment {publication}"), TaskOperation::Segment)
        .await?;
    let tasks = pages
        .iter()
        .map(|p| Task::for_page(TaskOperation::Segment, &p.id))
        .collect();
    ctx.queue.bulk_enqueue(&bulk.id, tasks).await?;

    println!(
        "{} enqueued {} segmentation tasks under bulk {}",
        style("✓").green(),
        pages.len(),
        bulk.id
    );
    Ok(())
}
