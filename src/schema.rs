// Table definitions for the three logical schemas: the repository index,
// the main events database, and the search index. Each group lives in its
// own SQLite file; the grouping below is documentation only.

// ---------------------------------------------------------------------------
// Repository index
// ---------------------------------------------------------------------------

diesel::table! {
    publications (lccn) {
        lccn -> Text,
        title -> Text,
        place -> Nullable<Text>,
        first_issue_date -> Nullable<Text>,
        last_issue_date -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    newspaper_pages (id) {
        id -> Text,
        lccn -> Text,
        publication_title -> Text,
        issue_date -> Text,
        sequence -> Integer,
        source_system -> Text,
        image_path -> Text,
        image_width -> Nullable<Integer>,
        image_height -> Nullable<Integer>,
        ocr_text_path -> Nullable<Text>,
        hocr_path -> Nullable<Text>,
        ocr_text -> Nullable<Text>,
        status -> Text,
        metadata -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    article_segments (id) {
        id -> Text,
        page_id -> Text,
        kind -> Text,
        bbox_x -> Integer,
        bbox_y -> Integer,
        bbox_width -> Integer,
        bbox_height -> Integer,
        text -> Text,
        confidence -> Double,
        clip_path -> Nullable<Text>,
        status -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    newspaper_articles (id) {
        id -> Text,
        page_id -> Text,
        segment_ids -> Text,
        title -> Text,
        text -> Text,
        metadata -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    processing_queue (id) {
        id -> Text,
        page_id -> Nullable<Text>,
        operation -> Text,
        parameters -> Text,
        priority -> Integer,
        status -> Text,
        attempts -> Integer,
        max_attempts -> Integer,
        last_error -> Nullable<Text>,
        worker_id -> Nullable<Text>,
        leased_at -> Nullable<Text>,
        lease_expires_at -> Nullable<Text>,
        next_eligible_at -> Nullable<Text>,
        bulk_id -> Nullable<Text>,
        enqueued_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    bulk_processing_tasks (id) {
        id -> Text,
        description -> Text,
        operation -> Text,
        status -> Text,
        total -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    event_links (segment_id) {
        segment_id -> Text,
        event_id -> Text,
        content_hash -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    queue_counters (name) {
        name -> Text,
        value -> Integer,
    }
}

diesel::table! {
    service_state (name) {
        name -> Text,
        value -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(newspaper_pages -> publications (lccn));
diesel::joinable!(article_segments -> newspaper_pages (page_id));
diesel::joinable!(newspaper_articles -> newspaper_pages (page_id));
diesel::joinable!(event_links -> article_segments (segment_id));

diesel::allow_tables_to_appear_in_same_query!(
    publications,
    newspaper_pages,
    article_segments,
    newspaper_articles,
    processing_queue,
    bulk_processing_tasks,
    event_links,
    queue_counters,
    service_state,
);

// ---------------------------------------------------------------------------
// Main events database
// ---------------------------------------------------------------------------

diesel::table! {
    events (id) {
        id -> Text,
        title -> Text,
        event_date -> Nullable<Text>,
        body -> Text,
        source -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

// ---------------------------------------------------------------------------
// Search index
// ---------------------------------------------------------------------------

diesel::table! {
    search_documents (id) {
        id -> Text,
        source -> Text,
        source_id -> Text,
        doc_type -> Text,
        title -> Text,
        body -> Text,
        doc_date -> Nullable<Text>,
        facets -> Text,
        indexed_at -> Text,
    }
}

diesel::table! {
    search_postings (id) {
        id -> Integer,
        document_id -> Text,
        term -> Text,
        field -> Text,
        frequency -> Integer,
    }
}

diesel::allow_tables_to_appear_in_same_query!(search_documents, search_postings);
