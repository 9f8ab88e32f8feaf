//! Task handlers: one per queue operation.
//!
//! Handlers receive the shared context and do the actual work of a task.
//! OCR runs under `spawn_blocking` with a deadline; everything else is
//! ordinary async work against the stores.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::connector::PromoteOverrides;
use crate::context::AppContext;
use crate::errors::{AcquireError, Result};
use crate::migrate;
use crate::models::{ArticleSegment, Task, TaskOperation};
use crate::ocr::LayoutFilter;
use crate::search::SearchSource;

/// Default deadline for one OCR run.
pub const OCR_TIMEOUT: Duration = Duration::from_secs(600);

/// A handler for one task operation.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn operation(&self) -> TaskOperation;

    async fn handle(&self, ctx: &AppContext, task: &Task) -> Result<()>;

    /// Handle a batch of identical-parameter tasks from one bulk. The
    /// default runs them sequentially; handlers override to amortize
    /// setup costs.
    async fn handle_batch(
        &self,
        ctx: &AppContext,
        tasks: &[Task],
    ) -> Vec<(String, Result<()>)> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push((task.id.clone(), self.handle(ctx, task).await));
        }
        results
    }
}

/// The built-in handler set, keyed by operation.
pub struct HandlerSet {
    handlers: Vec<Arc<dyn TaskHandler>>,
}

impl HandlerSet {
    pub fn builtin() -> Self {
        Self {
            handlers: vec![
                Arc::new(OcrHandler),
                Arc::new(SegmentHandler),
                Arc::new(ReindexHandler),
                Arc::new(ExportHandler),
                Arc::new(ImportHandler),
                Arc::new(PromoteHandler),
            ],
        }
    }

    pub fn get(&self, operation: TaskOperation) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .iter()
            .find(|h| h.operation() == operation)
            .cloned()
    }
}

fn require_page_id(task: &Task) -> Result<&str> {
    task.page_id
        .as_deref()
        .ok_or_else(|| AcquireError::Validation(format!("task {} has no page id", task.id)))
}

fn param_str<'a>(task: &'a Task, key: &str) -> Option<&'a str> {
    task.parameters.get(key).and_then(|v| v.as_str())
}

/// Runs OCR on the page image, attaches text and HOCR, and enqueues the
/// follow-up segmentation task.
struct OcrHandler;

#[async_trait]
impl TaskHandler for OcrHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::Ocr
    }

    async fn handle(&self, ctx: &AppContext, task: &Task) -> Result<()> {
        let page_id = require_page_id(task)?;
        let page = ctx
            .store
            .get_page(page_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("page", page_id))?;

        // Reprocessing starts from ocr_done; the status only moves forward.
        if page
            .status
            .can_transition_to(crate::models::PageStatus::Processing)
        {
            ctx.store
                .update_page_status(page_id, crate::models::PageStatus::Processing)
                .await?;
        }

        let image = std::fs::read(&page.image_path)?;
        let language = param_str(task, "language")
            .unwrap_or(&ctx.settings.ocr.language)
            .to_string();
        let engine = ctx.ocr_engine.clone();

        let output = tokio::time::timeout(
            OCR_TIMEOUT,
            tokio::task::spawn_blocking(move || engine.run_ocr(&image, &language)),
        )
        .await
        .map_err(|_| AcquireError::transient("ocr deadline exceeded"))?
        .map_err(|e| AcquireError::Internal(format!("ocr worker panicked: {e}")))??;

        ctx.store
            .attach_ocr(page_id, &output.text, output.hocr.as_deref())
            .await?;
        ctx.search.index_page(page_id).await?;

        // Chain the layout pass.
        let follow_up = Task::for_page(TaskOperation::Segment, page_id)
            .with_priority(task.priority)
            .with_parameter(
                "ocr_confidence",
                serde_json::json!(output.confidence.unwrap_or(0.0)),
            );
        ctx.queue.enqueue(&follow_up).await?;
        Ok(())
    }
}

/// Analyzes the page's HOCR into segments and stores them, with image
/// clips when the original can be decoded.
struct SegmentHandler;

#[async_trait]
impl TaskHandler for SegmentHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::Segment
    }

    async fn handle(&self, ctx: &AppContext, task: &Task) -> Result<()> {
        let page_id = require_page_id(task)?;
        let page = ctx
            .store
            .get_page(page_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("page", page_id))?;
        let hocr_path = page.hocr_path.clone().ok_or_else(|| {
            AcquireError::Validation(format!("page {page_id} has no hocr to segment"))
        })?;
        let hocr = std::fs::read_to_string(&hocr_path)?;

        let blocks = ctx
            .ocr_engine
            .analyze_layout(&hocr, &LayoutFilter::default())?;
        if blocks.is_empty() {
            debug!(page_id, "layout analysis produced no segments");
            return Ok(());
        }

        let fallback_confidence = task
            .parameters
            .get("ocr_confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        let clip_source = load_clip_source(&page.image_path);
        let mut segments = Vec::with_capacity(blocks.len());
        for block in blocks {
            let mut segment = ArticleSegment::new(page_id, block.kind, block.bbox, block.text);
            segment.confidence = if block.confidence > 0.0 {
                block.confidence
            } else {
                fallback_confidence
            };
            if let Some(image) = &clip_source {
                segment.clip_path = write_clip(ctx, &page, &segment, image);
            }
            segments.push(segment);
        }

        ctx.store.add_segments(page_id, &segments).await?;
        ctx.search.index_page(page_id).await?;
        Ok(())
    }
}

/// Decode the original page image for clip extraction; many originals are
/// JP2 and undecodable here, which just disables clips.
fn load_clip_source(path: &Path) -> Option<image::DynamicImage> {
    let bytes = std::fs::read(path).ok()?;
    image::load_from_memory(&bytes).ok()
}

fn write_clip(
    ctx: &AppContext,
    page: &crate::models::NewspaperPage,
    segment: &ArticleSegment,
    source: &image::DynamicImage,
) -> Option<std::path::PathBuf> {
    let clip = source.crop_imm(
        segment.bbox.x,
        segment.bbox.y,
        segment.bbox.width,
        segment.bbox.height,
    );
    let path = ctx.store.layout().segment_path(
        &page.source_system,
        page.issue_date,
        &segment.id,
        "jpg",
    );
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    match clip.to_rgb8().save(&path) {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(segment_id = %segment.id, error = %e, "could not write segment clip");
            None
        }
    }
}

/// Rebuilds the search index for the source named in the parameters.
struct ReindexHandler;

#[async_trait]
impl TaskHandler for ReindexHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::Reindex
    }

    async fn handle(&self, ctx: &AppContext, task: &Task) -> Result<()> {
        let source = param_str(task, "source").and_then(SearchSource::parse);
        ctx.search.reindex(source).await?;
        Ok(())
    }
}

/// Exports repository rows to a file.
struct ExportHandler;

#[async_trait]
impl TaskHandler for ExportHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::Export
    }

    async fn handle(&self, ctx: &AppContext, task: &Task) -> Result<()> {
        let output = param_str(task, "output")
            .ok_or_else(|| AcquireError::Validation("export task needs an output path".into()))?;
        let format = param_str(task, "format").unwrap_or("json");
        let lccn = param_str(task, "publication").map(str::to_string);
        migrate::export(ctx, Path::new(output), format, lccn.as_deref()).await?;
        Ok(())
    }
}

/// Imports rows from a CSV or SQLite source.
struct ImportHandler;

#[async_trait]
impl TaskHandler for ImportHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::Import
    }

    async fn handle(&self, ctx: &AppContext, task: &Task) -> Result<()> {
        let source_type = param_str(task, "source_type")
            .ok_or_else(|| AcquireError::Validation("import task needs a source type".into()))?;
        let source_path = param_str(task, "source_path")
            .ok_or_else(|| AcquireError::Validation("import task needs a source path".into()))?;
        let mapping = task
            .parameters
            .get("mapping")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        migrate::import(ctx, source_type, Path::new(source_path), &mapping).await?;
        Ok(())
    }
}

/// Promotes a segment into the main events store.
struct PromoteHandler;

#[async_trait]
impl TaskHandler for PromoteHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::Promote
    }

    async fn handle(&self, ctx: &AppContext, task: &Task) -> Result<()> {
        let segment_id = param_str(task, "segment_id")
            .ok_or_else(|| AcquireError::Validation("promote task needs a segment id".into()))?;
        let overrides = PromoteOverrides {
            title: param_str(task, "title").map(str::to_string),
            ..PromoteOverrides::default()
        };
        let event_id = ctx.connector.promote(segment_id, &overrides).await?;
        debug!(segment_id, event_id, "promotion finished");
        Ok(())
    }
}
