//! The inverted index.
//!
//! Documents live in `search_documents`; per-term postings with field and
//! frequency in `search_postings`. Indexing a document replaces its previous
//! postings, which makes both incremental updates and full rebuilds
//! idempotent.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::query::normalize;
use super::SearchSource;
use crate::errors::{AcquireError, Result};
use crate::repository::pool::AsyncSqlitePool;
use crate::schema::{search_documents, search_postings};

/// Words too common to index.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "or", "that", "the", "to", "was", "were", "will", "with",
];

/// A document to index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub source: SearchSource,
    pub source_id: String,
    pub doc_type: String,
    pub title: String,
    pub body: String,
    pub date: Option<NaiveDate>,
    pub facets: HashMap<String, String>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = search_documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct SearchDocRecord {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub doc_type: String,
    pub title: String,
    pub body: String,
    pub doc_date: Option<String>,
    pub facets: String,
    pub indexed_at: String,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = search_postings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct PostingRecord {
    #[allow(dead_code)]
    pub id: i32,
    pub document_id: String,
    pub term: String,
    pub field: String,
    pub frequency: i32,
}

/// Handle to the search index database.
#[derive(Clone)]
pub struct SearchIndex {
    pool: AsyncSqlitePool,
}

impl SearchIndex {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    fn doc_key(source: SearchSource, source_id: &str) -> String {
        format!("{}:{}", source.as_str(), source_id)
    }

    /// Index (or re-index) one document.
    pub async fn index_document(&self, entry: &IndexEntry) -> Result<()> {
        let id = Self::doc_key(entry.source, &entry.source_id);
        let facets = serde_json::to_string(&entry.facets).unwrap_or_else(|_| "{}".to_string());
        let title_postings = tokenize_counted(&entry.title);
        let body_postings = tokenize_counted(&entry.body);

        let source = entry.source.as_str().to_string();
        let source_id = entry.source_id.clone();
        let doc_type = entry.doc_type.clone();
        let title = entry.title.clone();
        let body = entry.body.clone();
        let doc_date = entry.date.map(|d| d.to_string());
        let now = Utc::now().to_rfc3339();

        let mut conn = self.pool.get().await?;
        conn.transaction::<_, AcquireError, _>(|conn| {
            Box::pin(async move {
                diesel::delete(
                    search_postings::table.filter(search_postings::document_id.eq(&id)),
                )
                .execute(conn)
                .await?;
                diesel::replace_into(search_documents::table)
                    .values((
                        search_documents::id.eq(&id),
                        search_documents::source.eq(&source),
                        search_documents::source_id.eq(&source_id),
                        search_documents::doc_type.eq(&doc_type),
                        search_documents::title.eq(&title),
                        search_documents::body.eq(&body),
                        search_documents::doc_date.eq(&doc_date),
                        search_documents::facets.eq(&facets),
                        search_documents::indexed_at.eq(&now),
                    ))
                    .execute(conn)
                    .await?;

                for (field, postings) in [("title", &title_postings), ("body", &body_postings)] {
                    for (term, frequency) in postings {
                        diesel::insert_into(search_postings::table)
                            .values((
                                search_postings::document_id.eq(&id),
                                search_postings::term.eq(term),
                                search_postings::field.eq(field),
                                search_postings::frequency.eq(*frequency as i32),
                            ))
                            .execute(conn)
                            .await?;
                    }
                }
                Ok(())
            })
        })
        .await?;
        Ok(())
    }

    /// Remove one document and its postings.
    pub async fn delete_document(&self, source: SearchSource, source_id: &str) -> Result<()> {
        let id = Self::doc_key(source, source_id);
        let mut conn = self.pool.get().await?;
        // postings cascade from the document row
        diesel::delete(search_documents::table.find(&id))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Replace every document of a source with the given entries.
    ///
    /// Running it twice with the same entries yields the same document set.
    pub async fn replace_source(
        &self,
        source: SearchSource,
        entries: &[IndexEntry],
    ) -> Result<usize> {
        {
            let mut conn = self.pool.get().await?;
            diesel::delete(
                search_documents::table.filter(search_documents::source.eq(source.as_str())),
            )
            .execute(&mut conn)
            .await?;
        }
        for entry in entries {
            self.index_document(entry).await?;
        }
        Ok(entries.len())
    }

    /// Total indexed documents, optionally per source.
    pub async fn document_count(&self, source: Option<SearchSource>) -> Result<u64> {
        use diesel::dsl::count_star;
        let mut conn = self.pool.get().await?;
        let count: i64 = match source {
            Some(source) => {
                search_documents::table
                    .filter(search_documents::source.eq(source.as_str()))
                    .select(count_star())
                    .first(&mut conn)
                    .await?
            }
            None => {
                search_documents::table
                    .select(count_star())
                    .first(&mut conn)
                    .await?
            }
        };
        Ok(count as u64)
    }

    pub(crate) async fn postings_for_term(&self, term: &str) -> Result<Vec<PostingRecord>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<PostingRecord> = search_postings::table
            .filter(search_postings::term.eq(term))
            .select(PostingRecord::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Every distinct term in the index; the fuzzy matcher scans these.
    pub(crate) async fn distinct_terms(&self) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let terms: Vec<String> = search_postings::table
            .select(search_postings::term)
            .distinct()
            .load(&mut conn)
            .await?;
        Ok(terms)
    }

    /// Ids of every document from one source.
    pub(crate) async fn get_documents_by_source(
        &self,
        source: SearchSource,
    ) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = search_documents::table
            .filter(search_documents::source.eq(source.as_str()))
            .select(search_documents::id)
            .load(&mut conn)
            .await?;
        Ok(ids)
    }

    pub(crate) async fn get_documents(&self, ids: &[String]) -> Result<Vec<SearchDocRecord>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<SearchDocRecord> = search_documents::table
            .filter(search_documents::id.eq_any(ids))
            .select(SearchDocRecord::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }
}

/// Tokenize into `(term, frequency)` pairs, skipping stopwords and single
/// characters.
pub(crate) fn tokenize_counted(text: &str) -> Vec<(String, u32)> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        let term = normalize(raw);
        if term.len() < 2 || STOPWORDS.contains(&term.as_str()) {
            continue;
        }
        *counts.entry(term).or_insert(0) += 1;
    }
    let mut pairs: Vec<(String, u32)> = counts.into_iter().collect();
    pairs.sort();
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::migrations::init_search_schema;
    use tempfile::TempDir;

    #[test]
    fn test_tokenize_counted() {
        let pairs = tokenize_counted("The fire, the FIRE, spread fast!");
        assert_eq!(
            pairs,
            vec![
                ("fast".to_string(), 1),
                ("fire".to_string(), 2),
                ("spread".to_string(), 1),
            ]
        );
    }

    async fn test_index() -> (TempDir, SearchIndex) {
        let dir = TempDir::new().unwrap();
        let pool = AsyncSqlitePool::from_path(&dir.path().join("search.db"));
        init_search_schema(&pool).await.unwrap();
        (dir, SearchIndex::new(pool))
    }

    fn entry(id: &str, title: &str, body: &str) -> IndexEntry {
        IndexEntry {
            source: SearchSource::Repository,
            source_id: id.to_string(),
            doc_type: "page".to_string(),
            title: title.to_string(),
            body: body.to_string(),
            date: None,
            facets: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_index_and_reindex_idempotent() {
        let (_dir, index) = test_index().await;
        let entries = vec![
            entry("p1", "Great fire", "the fire spread"),
            entry("p2", "Flood", "river flood"),
        ];
        index
            .replace_source(SearchSource::Repository, &entries)
            .await
            .unwrap();
        let first = index.document_count(None).await.unwrap();
        let first_postings = index.postings_for_term("fire").await.unwrap().len();

        index
            .replace_source(SearchSource::Repository, &entries)
            .await
            .unwrap();
        assert_eq!(index.document_count(None).await.unwrap(), first);
        assert_eq!(
            index.postings_for_term("fire").await.unwrap().len(),
            first_postings
        );
        assert_eq!(first, 2);
        // "fire" appears in both fields of p1
        assert_eq!(first_postings, 2);
    }

    #[tokio::test]
    async fn test_delete_document_drops_postings() {
        let (_dir, index) = test_index().await;
        index
            .index_document(&entry("p1", "Great fire", "the fire spread"))
            .await
            .unwrap();
        index
            .delete_document(SearchSource::Repository, "p1")
            .await
            .unwrap();
        assert_eq!(index.document_count(None).await.unwrap(), 0);
        assert!(index.postings_for_term("fire").await.unwrap().is_empty());
    }
}
