//! End-to-end tests over the queue, pipeline service, and connector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tempfile::TempDir;

use newsacquire::config::Settings;
use newsacquire::connector::PromoteOverrides;
use newsacquire::context::AppContext;
use newsacquire::models::{
    ArticleSegment, BoundingBox, HistoricalEvent, PageStatus, SegmentKind, SegmentStatus, Task,
    TaskOperation, TaskStatus,
};
use newsacquire::pipeline::{PipelineService, ServiceConfig};
use newsacquire::repository::{NewPage, PageImage};

async fn test_context() -> (TempDir, Arc<AppContext>) {
    let dir = TempDir::new().unwrap();
    let settings = Settings::rooted_at(dir.path());
    let ctx = AppContext::initialize(settings).await.unwrap();
    (dir, ctx)
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::new(width, height);
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .unwrap();
    bytes
}

fn page_request(sequence: u32) -> NewPage {
    NewPage {
        lccn: "sn83045604".to_string(),
        publication_title: "The Seattle post-intelligencer".to_string(),
        issue_date: NaiveDate::from_ymd_opt(1891, 4, 1).unwrap(),
        sequence,
        source_system: "chroniclingamerica".to_string(),
        extension: "png".to_string(),
        metadata: HashMap::new(),
    }
}

/// Create a page with OCR text and one reviewed segment; returns (page id,
/// segment id).
async fn seed_segment(ctx: &AppContext, sequence: u32, text: &str) -> (String, String) {
    let page = ctx
        .store
        .add_page(page_request(sequence), PageImage::Bytes(png_bytes(800, 1200)))
        .await
        .unwrap();
    ctx.store.attach_ocr(&page.id, text, None).await.unwrap();

    let mut segment = ArticleSegment::new(
        &page.id,
        SegmentKind::Article,
        BoundingBox::new(0, 0, 400, 600),
        text.to_string(),
    );
    segment.confidence = 0.9;
    segment.status = SegmentStatus::Reviewed;
    ctx.store.add_segments(&page.id, &[segment.clone()]).await.unwrap();
    (page.id, segment.id)
}

#[tokio::test]
async fn test_concurrent_lease_is_exclusive() {
    let (_dir, ctx) = test_context().await;
    ctx.queue
        .enqueue(&Task::new(TaskOperation::Reindex))
        .await
        .unwrap();

    let mut joins = Vec::new();
    for n in 0..8 {
        let queue = ctx.queue.clone();
        joins.push(tokio::spawn(async move {
            queue
                .lease(&format!("worker-{n}"), Duration::from_secs(60))
                .await
                .unwrap()
        }));
    }
    let mut claimed = 0;
    for join in joins {
        if join.await.unwrap().is_some() {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 1, "exactly one worker may claim the task");
}

#[tokio::test]
async fn test_service_runs_queued_task() {
    let (_dir, ctx) = test_context().await;
    seed_segment(&ctx, 1, "the great fire of seattle").await;

    let task = Task::new(TaskOperation::Reindex);
    ctx.queue.enqueue(&task).await.unwrap();

    let config = ServiceConfig {
        workers: 2,
        poll_interval: Duration::from_millis(50),
        lease_duration: Duration::from_secs(30),
        batch_size: 1,
        max_task_duration: Duration::from_secs(60),
    };
    let service = PipelineService::new(ctx.clone(), config);
    let shutdown = service.shutdown_handle();
    let runner = tokio::spawn(async move { service.run().await });

    // wait for the task to reach a terminal state
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let current = ctx.queue.get_task(&task.id).await.unwrap().unwrap();
        if current.status.is_terminal() {
            assert_eq!(current.status, TaskStatus::Succeeded);
            assert!(current.last_error.is_none());
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // the reindex made the page searchable
    let count = ctx.search.index().document_count(None).await.unwrap();
    assert!(count >= 1);

    shutdown();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_promotion_creates_event_and_link() {
    let (_dir, ctx) = test_context().await;
    let (_page_id, segment_id) =
        seed_segment(&ctx, 1, "GREAT FIRE\nThe city burned through the night.").await;

    let event_id = ctx
        .connector
        .promote(&segment_id, &PromoteOverrides::default())
        .await
        .unwrap();

    let event = ctx.connector.main().get_event(&event_id).await.unwrap().unwrap();
    assert_eq!(event.title, "GREAT FIRE");
    assert_eq!(event.date, NaiveDate::from_ymd_opt(1891, 4, 1));

    let link = ctx.connector.get_link(&segment_id).await.unwrap().unwrap();
    assert_eq!(link.event_id, event_id);

    let segment = ctx.store.get_segment(&segment_id).await.unwrap().unwrap();
    assert_eq!(segment.status, SegmentStatus::Promoted);

    // promoting again conflicts with the existing event id
    let err = ctx
        .connector
        .promote(&segment_id, &PromoteOverrides::default())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn test_duplicate_detection_blocks_near_copy() {
    let (_dir, ctx) = test_context().await;
    let text = "The steamer arrived from Tacoma carrying forty passengers and mail.";
    let (_p1, s1) = seed_segment(&ctx, 1, text).await;
    let (_p2, s2) = seed_segment(&ctx, 2, text).await;

    ctx.connector
        .promote(&s1, &PromoteOverrides::default())
        .await
        .unwrap();
    let err = ctx
        .connector
        .promote(&s2, &PromoteOverrides::default())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 4, "near-duplicate promotion must conflict");

    // an explicit override still goes through
    let overrides = PromoteOverrides {
        skip_duplicate_check: true,
        ..PromoteOverrides::default()
    };
    ctx.connector.promote(&s2, &overrides).await.unwrap();
}

#[tokio::test]
async fn test_reconcile_converges_after_partial_promotion() {
    let (_dir, ctx) = test_context().await;
    let (_page_id, segment_id) = seed_segment(&ctx, 1, "orphaned promotion text").await;
    let segment = ctx.store.get_segment(&segment_id).await.unwrap().unwrap();

    // Simulate a crash between the event insert and the link write: the
    // event exists with a source pointer but no link row.
    let now = Utc::now();
    let orphan = HistoricalEvent {
        id: "evt-orphan".to_string(),
        title: "orphaned promotion text".to_string(),
        date: NaiveDate::from_ymd_opt(1891, 4, 1),
        body: segment.text.clone(),
        source: serde_json::json!({
            "segment_id": segment_id,
            "content_hash": newsacquire::models::NewspaperPage::compute_hash(
                segment.text.as_bytes()
            ),
        }),
        created_at: now,
        updated_at: now,
    };
    ctx.connector.main().insert_event(&orphan).await.unwrap();

    let report = ctx.connector.reconcile().await.unwrap();
    assert_eq!(report.attached, 1);
    assert_eq!(report.removed, 0);

    let link = ctx.connector.get_link(&segment_id).await.unwrap().unwrap();
    assert_eq!(link.event_id, "evt-orphan");

    // a second pass changes nothing
    let report = ctx.connector.reconcile().await.unwrap();
    assert_eq!(report.attached, 0);
    assert_eq!(report.removed, 0);
    assert_eq!(report.dropped_links, 0);
}

#[tokio::test]
async fn test_reconcile_removes_stale_orphans_and_links() {
    let (_dir, ctx) = test_context().await;

    // orphan event whose segment never existed
    let now = Utc::now();
    let stale = HistoricalEvent {
        id: "evt-stale".to_string(),
        title: "gone".to_string(),
        date: None,
        body: "text of a deleted segment".to_string(),
        source: serde_json::json!({
            "segment_id": "no-such-segment",
            "content_hash": "0000",
        }),
        created_at: now,
        updated_at: now,
    };
    ctx.connector.main().insert_event(&stale).await.unwrap();

    // promoted segment whose event was deleted out from under the link
    let (_page_id, segment_id) = seed_segment(&ctx, 1, "event deleted later").await;
    let event_id = ctx
        .connector
        .promote(&segment_id, &PromoteOverrides::default())
        .await
        .unwrap();
    ctx.connector.main().delete_event(&event_id).await.unwrap();

    let report = ctx.connector.reconcile().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.dropped_links, 1);

    assert!(ctx.connector.main().get_event("evt-stale").await.unwrap().is_none());
    assert!(ctx.connector.get_link(&segment_id).await.unwrap().is_none());
    // the segment is demoted so it can be promoted again
    let segment = ctx.store.get_segment(&segment_id).await.unwrap().unwrap();
    assert_eq!(segment.status, SegmentStatus::Reviewed);
}

#[tokio::test]
async fn test_page_delete_cascades_queue_and_segments() {
    let (_dir, ctx) = test_context().await;
    let (page_id, segment_id) = seed_segment(&ctx, 1, "cascade me").await;
    ctx.queue
        .enqueue(&Task::for_page(TaskOperation::Ocr, &page_id))
        .await
        .unwrap();

    ctx.store.delete_page(&page_id).await.unwrap();

    assert!(ctx.store.get_page(&page_id).await.unwrap().is_none());
    assert!(ctx.store.get_segment(&segment_id).await.unwrap().is_none());
    // the pending task for the page is gone too
    assert!(ctx
        .queue
        .lease("w1", Duration::from_secs(30))
        .await
        .unwrap()
        .is_none());

    let stats = ctx.store.stats().await.unwrap();
    assert_eq!(stats.total_pages, 0);
}

#[tokio::test]
async fn test_page_status_failed_page_requeues() {
    let (_dir, ctx) = test_context().await;
    let page = ctx
        .store
        .add_page(page_request(1), PageImage::Bytes(png_bytes(100, 100)))
        .await
        .unwrap();
    ctx.store
        .update_page_status(&page.id, PageStatus::Failed)
        .await
        .unwrap();
    // a failed page may go back to queued, nothing else
    ctx.store
        .update_page_status(&page.id, PageStatus::Queued)
        .await
        .unwrap();
    let page = ctx.store.get_page(&page.id).await.unwrap().unwrap();
    assert_eq!(page.status, PageStatus::Queued);
}
