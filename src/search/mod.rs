//! Full-text search across the repository and the main events store.
//!
//! A secondary inverted index lives in its own SQLite database; both stores
//! feed it incrementally and can be rebuilt wholesale with `reindex`.

mod engine;
mod index;
mod query;

pub use engine::SearchEngine;
pub use index::{IndexEntry, SearchIndex};
pub use query::{parse_query, ParsedQuery, QueryClause};

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which store a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Repository,
    Main,
}

impl SearchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Main => "main",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "repository" | "repo" => Some(Self::Repository),
            "main" => Some(Self::Main),
            _ => None,
        }
    }
}

/// Search options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub query: String,
    /// None searches both sources.
    pub source: Option<SearchSource>,
    pub limit: usize,
    pub offset: usize,
    pub fuzzy: bool,
    /// Similarity threshold 0-100 for fuzzy matches.
    pub fuzzy_threshold: u8,
    /// Facet names to count over the result set.
    pub facets: Vec<String>,
    /// Exact facet filters, e.g. `publication -> sn83045604`.
    pub filters: HashMap<String, String>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
}

impl SearchOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            source: None,
            limit: 20,
            offset: 0,
            fuzzy: false,
            fuzzy_threshold: 70,
            facets: Vec::new(),
            filters: HashMap::new(),
            date_start: None,
            date_end: None,
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub source: SearchSource,
    pub source_id: String,
    pub doc_type: String,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub score: f64,
    /// Snippets around matched terms.
    pub highlights: Vec<String>,
}

/// A search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total_count: usize,
    /// `facet name -> value -> count` over the full match set.
    pub facets: HashMap<String, HashMap<String, u64>>,
    pub execution_time_ms: u64,
}
