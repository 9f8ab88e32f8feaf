//! Round-trip properties: page metadata, export/import, search reindex.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::TempDir;

use newsacquire::config::Settings;
use newsacquire::context::AppContext;
use newsacquire::migrate;
use newsacquire::models::{ArticleSegment, BoundingBox, SegmentKind};
use newsacquire::repository::{NewPage, PageImage, PageQuery};
use newsacquire::search::{SearchOptions, SearchSource};

async fn test_context() -> (TempDir, Arc<AppContext>) {
    let dir = TempDir::new().unwrap();
    let settings = Settings::rooted_at(dir.path());
    let ctx = AppContext::initialize(settings).await.unwrap();
    (dir, ctx)
}

fn page_request(sequence: u32, metadata: HashMap<String, serde_json::Value>) -> NewPage {
    NewPage {
        lccn: "sn83045604".to_string(),
        publication_title: "The Seattle post-intelligencer".to_string(),
        issue_date: NaiveDate::from_ymd_opt(1891, 4, 2).unwrap(),
        sequence,
        source_system: "chroniclingamerica".to_string(),
        extension: "png".to_string(),
        metadata,
    }
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::new(640, 480);
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .unwrap();
    bytes
}

#[tokio::test]
async fn test_add_page_metadata_round_trip() {
    let (_dir, ctx) = test_context().await;
    let mut metadata = HashMap::new();
    metadata.insert("title".to_string(), serde_json::json!("Page one"));
    metadata.insert("edition".to_string(), serde_json::json!(1));

    let page = ctx
        .store
        .add_page(page_request(1, metadata.clone()), PageImage::Bytes(png_bytes()))
        .await
        .unwrap();
    let loaded = ctx.store.get_page(&page.id).await.unwrap().unwrap();

    assert_eq!(loaded.lccn, "sn83045604");
    assert_eq!(loaded.issue_date, NaiveDate::from_ymd_opt(1891, 4, 2).unwrap());
    assert_eq!(loaded.sequence, 1);
    assert_eq!(loaded.source_system, "chroniclingamerica");
    assert_eq!(loaded.metadata, metadata);
    assert_eq!(loaded.image_width, Some(640));
    assert_eq!(loaded.image_height, Some(480));
}

#[tokio::test]
async fn test_export_import_preserves_row_set() {
    let (dir, ctx) = test_context().await;
    for sequence in 1..=3u32 {
        let page = ctx
            .store
            .add_page(page_request(sequence, HashMap::new()), PageImage::Bytes(png_bytes()))
            .await
            .unwrap();
        ctx.store
            .attach_ocr(&page.id, &format!("page {sequence} text"), None)
            .await
            .unwrap();
        let mut segment = ArticleSegment::new(
            &page.id,
            SegmentKind::Article,
            BoundingBox::new(0, 0, 320, 240),
            format!("segment on page {sequence}"),
        );
        segment.confidence = 0.75;
        ctx.store.add_segments(&page.id, &[segment]).await.unwrap();
    }

    let export_path = dir.path().join("bundle.json");
    let exported = migrate::export(&ctx, &export_path, "json", None).await.unwrap();
    assert_eq!(exported.pages.len(), 3);
    assert_eq!(exported.segments.len(), 3);

    // import into a fresh set of stores
    let target_dir = TempDir::new().unwrap();
    let target = AppContext::initialize(Settings::rooted_at(target_dir.path()))
        .await
        .unwrap();
    migrate::import(&target, "json", &export_path, &serde_json::Value::Null)
        .await
        .unwrap();

    let mut query = PageQuery::new();
    query.limit = 100;
    let imported = target.store.search_pages(&query).await.unwrap();

    let original_keys: HashSet<(String, String, u32)> = exported
        .pages
        .iter()
        .map(|p| (p.id.clone(), p.issue_date.to_string(), p.sequence))
        .collect();
    let imported_keys: HashSet<(String, String, u32)> = imported
        .iter()
        .map(|p| (p.id.clone(), p.issue_date.to_string(), p.sequence))
        .collect();
    assert_eq!(original_keys, imported_keys);

    for page in &imported {
        let segments = target.store.get_page_segments(&page.id).await.unwrap();
        assert_eq!(segments.len(), 1);
    }
}

#[tokio::test]
async fn test_reindex_is_idempotent() {
    let (_dir, ctx) = test_context().await;
    for sequence in 1..=2u32 {
        let page = ctx
            .store
            .add_page(page_request(sequence, HashMap::new()), PageImage::Bytes(png_bytes()))
            .await
            .unwrap();
        ctx.store
            .attach_ocr(&page.id, "the great fire spread quickly", None)
            .await
            .unwrap();
    }

    let first = ctx.search.reindex(None).await.unwrap();
    let count_after_first = ctx.search.index().document_count(None).await.unwrap();
    let second = ctx.search.reindex(None).await.unwrap();
    let count_after_second = ctx.search.index().document_count(None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(count_after_first, count_after_second);

    // the same query returns the same totals after each rebuild
    let response = ctx.search.search(&SearchOptions::new("fire")).await.unwrap();
    assert_eq!(response.total_count, 2);
}

#[tokio::test]
async fn test_search_ranks_exact_above_fuzzy() {
    let (_dir, ctx) = test_context().await;
    let exact = ctx
        .store
        .add_page(page_request(1, HashMap::new()), PageImage::Bytes(png_bytes()))
        .await
        .unwrap();
    ctx.store
        .attach_ocr(&exact.id, "the harbor was quiet", None)
        .await
        .unwrap();
    let fuzzy = ctx
        .store
        .add_page(page_request(2, HashMap::new()), PageImage::Bytes(png_bytes()))
        .await
        .unwrap();
    ctx.store
        .attach_ocr(&fuzzy.id, "the harbour was quiet", None)
        .await
        .unwrap();
    ctx.search.reindex(Some(SearchSource::Repository)).await.unwrap();

    let mut options = SearchOptions::new("harbor");
    options.fuzzy = true;
    options.fuzzy_threshold = 70;
    let response = ctx.search.search(&options).await.unwrap();

    assert_eq!(response.total_count, 2);
    assert_eq!(response.results[0].source_id, exact.id);
    assert_eq!(response.results[1].source_id, fuzzy.id);
    assert!(response.results[0].score > response.results[1].score);
}
