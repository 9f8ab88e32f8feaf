//! Service control and bulk management commands.

use console::style;

use crate::config::Settings;
use crate::context::AppContext;
use crate::errors::{AcquireError, Result};
use crate::models::{Task, TaskOperation};
use crate::pipeline::{PipelineEvent, PipelineService, ServiceConfig};
use crate::repository::PageQuery;

/// Run the pipeline service in the foreground until Ctrl-C (or a stop
/// request through the control state).
pub async fn cmd_service_start(settings: Settings) -> Result<()> {
    let config = ServiceConfig::from_settings(&settings);
    let ctx = AppContext::initialize(settings).await?;
    let service = PipelineService::new(ctx, config);

    // Print progress as it happens; the subscriber is dropped if we lag.
    let mut events = service.events().subscribe(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PipelineEvent::TaskStarted {
                    task_id, operation, ..
                } => {
                    println!("  {} {} {}", style("→").cyan(), operation.as_str(), task_id);
                }
                PipelineEvent::TaskCompleted { task_id } => {
                    println!("  {} {}", style("✓").green(), task_id);
                }
                PipelineEvent::TaskFailed { task_id, error } => {
                    println!("  {} {} {}", style("✗").red(), task_id, error);
                }
                PipelineEvent::BulkProgress {
                    bulk_id,
                    succeeded,
                    failed,
                    total,
                } => {
                    println!(
                        "  {} bulk {} {}/{} ({} failed)",
                        style("∙").dim(),
                        bulk_id,
                        succeeded + failed,
                        total,
                        failed
                    );
                }
                PipelineEvent::TaskProgress { .. } => {}
            }
        }
    });

    let shutdown_trigger = service.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nshutting down...");
            shutdown_trigger();
        }
    });

    service.run().await?;
    printer.abort();
    Ok(())
}

/// Ask a running service (possibly in another process) to stop.
pub async fn cmd_service_stop(settings: Settings) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;
    ctx.queue
        .set_service_state("stop_requested", "true")
        .await?;
    println!("stop requested");
    Ok(())
}

pub async fn cmd_service_status(settings: Settings) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;
    let running = ctx
        .queue
        .get_service_state("running")
        .await?
        .unwrap_or_else(|| "false".to_string());
    let paused = ctx
        .queue
        .get_service_state("paused")
        .await?
        .unwrap_or_else(|| "false".to_string());
    let stats = ctx.queue.stats().await?;
    let repo = ctx.store.stats().await?;

    println!("service running: {running}, paused: {paused}");
    println!(
        "queue: {} pending, {} leased, {} succeeded, {} failed, {} cancelled, {} lost leases",
        stats.pending, stats.leased, stats.succeeded, stats.failed, stats.cancelled,
        stats.lost_leases
    );
    println!(
        "repository: {} pages, {} segments, {} articles",
        repo.total_pages, repo.total_segments, repo.total_articles
    );
    Ok(())
}

/// Set or clear the persisted global pause flag.
pub async fn cmd_service_pause(settings: Settings, pause: bool) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;
    ctx.queue
        .set_service_state("paused", if pause { "true" } else { "false" })
        .await?;
    println!("service {}", if pause { "paused" } else { "resumed" });
    Ok(())
}

pub async fn cmd_bulk_create(
    settings: Settings,
    description: &str,
    operation: &str,
) -> Result<()> {
    let operation = TaskOperation::parse(operation).ok_or_else(|| {
        AcquireError::Validation(format!("unknown operation: {operation}"))
    })?;
    let ctx = AppContext::initialize(settings).await?;
    let bulk = ctx.queue.bulk_create(description, operation).await?;
    println!("{} created bulk {}", style("✓").green(), bulk.id);
    Ok(())
}

/// Add one task per page of a publication to an existing bulk.
pub async fn cmd_bulk_add(settings: Settings, bulk_id: &str, publication: &str) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;
    let bulk = ctx
        .queue
        .get_bulk(bulk_id)
        .await?
        .ok_or_else(|| AcquireError::not_found("bulk", bulk_id))?;

    let mut query = PageQuery::new();
    query.lccn = Some(publication.to_string());
    query.limit = i64::MAX;
    let pages = ctx.store.search_pages(&query).await?;
    let tasks: Vec<Task> = pages
        .iter()
        .map(|p| Task::for_page(bulk.operation, &p.id))
        .collect();
    let count = tasks.len();
    ctx.queue.bulk_enqueue(bulk_id, tasks).await?;
    println!("{} added {count} tasks to bulk {bulk_id}", style("✓").green());
    Ok(())
}

pub async fn cmd_bulk_status(settings: Settings, bulk_id: Option<&str>) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;
    let bulks = match bulk_id {
        Some(id) => vec![ctx
            .queue
            .get_bulk(id)
            .await?
            .ok_or_else(|| AcquireError::not_found("bulk", id))?],
        None => ctx.queue.list_bulks().await?,
    };
    for bulk in bulks {
        println!(
            "  {} [{}] {} {}: {}/{} done ({} failed, {} pending, {} running)",
            style(&bulk.id).dim(),
            bulk.status.as_str(),
            bulk.operation.as_str(),
            bulk.description,
            bulk.succeeded + bulk.failed,
            bulk.total,
            bulk.failed,
            bulk.pending,
            bulk.in_progress
        );
    }
    Ok(())
}

pub async fn cmd_bulk_control(settings: Settings, bulk_id: &str, action: &str) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;
    match action {
        "pause" => ctx.queue.pause_bulk(bulk_id).await?,
        "resume" => ctx.queue.resume_bulk(bulk_id).await?,
        "cancel" => ctx.queue.cancel_bulk(bulk_id).await?,
        "retry-failed" => {
            let requeued = ctx.queue.retry_failed(bulk_id).await?;
            println!("requeued {requeued} failed tasks");
        }
        other => {
            return Err(AcquireError::Validation(format!(
                "unknown bulk action: {other}"
            )))
        }
    }
    println!("{} bulk {bulk_id}: {action}", style("✓").green());
    Ok(())
}
