//! Schema initialization and database maintenance.
//!
//! All DDL is idempotent (`CREATE TABLE IF NOT EXISTS`) so `setup` and every
//! context construction can run it unconditionally. Referential integrity is
//! enforced here with cascading foreign keys; the store re-checks at the API
//! boundary.

use diesel_async::RunQueryDsl;

use super::pool::{AsyncSqlitePool, DieselError};

/// DDL for the repository index.
const REPOSITORY_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS publications (
        lccn TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        place TEXT,
        first_issue_date TEXT,
        last_issue_date TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS newspaper_pages (
        id TEXT PRIMARY KEY,
        lccn TEXT NOT NULL,
        publication_title TEXT NOT NULL,
        issue_date TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        source_system TEXT NOT NULL,
        image_path TEXT NOT NULL,
        image_width INTEGER,
        image_height INTEGER,
        ocr_text_path TEXT,
        hocr_path TEXT,
        ocr_text TEXT,
        status TEXT NOT NULL DEFAULT 'new',
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(lccn, issue_date, sequence, source_system)
    )",
    "CREATE TABLE IF NOT EXISTS article_segments (
        id TEXT PRIMARY KEY,
        page_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        bbox_x INTEGER NOT NULL,
        bbox_y INTEGER NOT NULL,
        bbox_width INTEGER NOT NULL,
        bbox_height INTEGER NOT NULL,
        text TEXT NOT NULL,
        confidence REAL NOT NULL DEFAULT 0,
        clip_path TEXT,
        status TEXT NOT NULL DEFAULT 'draft',
        created_at TEXT NOT NULL,
        FOREIGN KEY (page_id) REFERENCES newspaper_pages(id) ON DELETE CASCADE,
        CHECK (confidence >= 0 AND confidence <= 1)
    )",
    "CREATE TABLE IF NOT EXISTS newspaper_articles (
        id TEXT PRIMARY KEY,
        page_id TEXT NOT NULL,
        segment_ids TEXT NOT NULL DEFAULT '[]',
        title TEXT NOT NULL,
        text TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        FOREIGN KEY (page_id) REFERENCES newspaper_pages(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS processing_queue (
        id TEXT PRIMARY KEY,
        page_id TEXT,
        operation TEXT NOT NULL,
        parameters TEXT NOT NULL DEFAULT '{}',
        priority INTEGER NOT NULL DEFAULT 10,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        last_error TEXT,
        worker_id TEXT,
        leased_at TEXT,
        lease_expires_at TEXT,
        next_eligible_at TEXT,
        bulk_id TEXT,
        enqueued_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (bulk_id) REFERENCES bulk_processing_tasks(id) ON DELETE SET NULL
    )",
    "CREATE TABLE IF NOT EXISTS bulk_processing_tasks (
        id TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        operation TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'running',
        total INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS event_links (
        segment_id TEXT PRIMARY KEY,
        event_id TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (segment_id) REFERENCES article_segments(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS queue_counters (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS service_state (
        name TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_pages_lccn_date
        ON newspaper_pages(lccn, issue_date)",
    "CREATE INDEX IF NOT EXISTS idx_pages_status ON newspaper_pages(status)",
    "CREATE INDEX IF NOT EXISTS idx_segments_page ON article_segments(page_id)",
    "CREATE INDEX IF NOT EXISTS idx_articles_page ON newspaper_articles(page_id)",
    "CREATE INDEX IF NOT EXISTS idx_queue_claim
        ON processing_queue(status, priority, enqueued_at)",
    "CREATE INDEX IF NOT EXISTS idx_queue_bulk ON processing_queue(bulk_id)",
    "CREATE INDEX IF NOT EXISTS idx_queue_page ON processing_queue(page_id)",
    "CREATE INDEX IF NOT EXISTS idx_event_links_event ON event_links(event_id)",
];

/// DDL for the main events database.
const MAIN_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        event_date TEXT,
        body TEXT NOT NULL,
        source TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_date ON events(event_date)",
];

/// DDL for the search index.
const SEARCH_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS search_documents (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        source_id TEXT NOT NULL,
        doc_type TEXT NOT NULL,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        doc_date TEXT,
        facets TEXT NOT NULL DEFAULT '{}',
        indexed_at TEXT NOT NULL,
        UNIQUE(source, source_id)
    )",
    "CREATE TABLE IF NOT EXISTS search_postings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id TEXT NOT NULL,
        term TEXT NOT NULL,
        field TEXT NOT NULL,
        frequency INTEGER NOT NULL DEFAULT 1,
        FOREIGN KEY (document_id) REFERENCES search_documents(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_postings_term ON search_postings(term)",
    "CREATE INDEX IF NOT EXISTS idx_postings_doc ON search_postings(document_id)",
];

async fn run_ddl(pool: &AsyncSqlitePool, statements: &[&str]) -> Result<(), DieselError> {
    let mut conn = pool.get().await?;
    for ddl in statements {
        diesel::sql_query(*ddl).execute(&mut conn).await?;
    }
    Ok(())
}

/// Create the repository index schema.
pub async fn init_repository_schema(pool: &AsyncSqlitePool) -> Result<(), DieselError> {
    run_ddl(pool, REPOSITORY_DDL).await
}

/// Create the main events schema.
pub async fn init_main_schema(pool: &AsyncSqlitePool) -> Result<(), DieselError> {
    run_ddl(pool, MAIN_DDL).await
}

/// Create the search index schema.
pub async fn init_search_schema(pool: &AsyncSqlitePool) -> Result<(), DieselError> {
    run_ddl(pool, SEARCH_DDL).await
}

/// Reclaim free pages.
pub async fn vacuum(pool: &AsyncSqlitePool) -> Result<(), DieselError> {
    let mut conn = pool.get().await?;
    diesel::sql_query("VACUUM").execute(&mut conn).await?;
    Ok(())
}

/// Refresh the query planner statistics.
pub async fn analyze(pool: &AsyncSqlitePool) -> Result<(), DieselError> {
    let mut conn = pool.get().await?;
    diesel::sql_query("ANALYZE").execute(&mut conn).await?;
    Ok(())
}

/// Online backup of a database file via `VACUUM INTO`.
pub async fn backup_to(pool: &AsyncSqlitePool, target: &std::path::Path) -> Result<(), DieselError> {
    let mut conn = pool.get().await?;
    let escaped = target.display().to_string().replace('\'', "''");
    diesel::sql_query(format!("VACUUM INTO '{escaped}'"))
        .execute(&mut conn)
        .await?;
    Ok(())
}
