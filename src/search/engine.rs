//! Search execution: term, phrase, and fuzzy matching over the inverted
//! index, TF scoring with a title boost, facets, and snippet highlights.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::NaiveDate;
use tracing::info;

use super::index::{IndexEntry, SearchDocRecord, SearchIndex};
use super::query::{parse_query, QueryClause};
use super::{SearchOptions, SearchResponse, SearchResult, SearchSource};
use crate::connector::MainStore;
use crate::errors::Result;
use crate::repository::{PageQuery, RepositoryStore};

/// Title matches count double.
const TITLE_WEIGHT: f64 = 2.0;
/// Fuzzy matches score at half weight, keeping exact matches ranked above.
const FUZZY_WEIGHT: f64 = 0.5;
/// Characters of context on each side of a highlight.
const SNIPPET_CONTEXT: usize = 40;

/// Accumulated evidence that a document matches.
#[derive(Debug, Clone, Default)]
struct DocHit {
    score: f64,
    fuzzy_only: bool,
    matched_terms: Vec<String>,
}

/// Search engine over the secondary index.
#[derive(Clone)]
pub struct SearchEngine {
    index: SearchIndex,
    repository: RepositoryStore,
    main: MainStore,
}

impl SearchEngine {
    pub fn new(index: SearchIndex, repository: RepositoryStore, main: MainStore) -> Self {
        Self {
            index,
            repository,
            main,
        }
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    /// Execute a search.
    pub async fn search(&self, options: &SearchOptions) -> Result<SearchResponse> {
        let started = Instant::now();
        let parsed = parse_query(&options.query);

        let hits: HashMap<String, DocHit> = if parsed.is_empty() {
            // No query: every document, unranked; filters still apply.
            let ids = self.all_document_ids(options.source).await?;
            ids.into_iter().map(|id| (id, DocHit::default())).collect()
        } else {
            let mut merged: HashMap<String, DocHit> = HashMap::new();
            for group in &parsed.groups {
                if let Some(group_hits) = self.match_group(group, options).await? {
                    for (id, hit) in group_hits {
                        let entry = merged.entry(id).or_default();
                        entry.score += hit.score;
                        entry.fuzzy_only = entry.fuzzy_only || hit.fuzzy_only;
                        entry.matched_terms.extend(hit.matched_terms);
                    }
                }
            }
            merged
        };

        // Load and filter the matched documents.
        let ids: Vec<String> = hits.keys().cloned().collect();
        let docs = self.index.get_documents(&ids).await?;
        let mut matched: Vec<(SearchDocRecord, DocHit)> = docs
            .into_iter()
            .filter(|doc| filter_doc(doc, options))
            .map(|doc| {
                let hit = hits.get(&doc.id).cloned().unwrap_or_default();
                (doc, hit)
            })
            .collect();

        let total_count = matched.len();
        let facets = count_facets(&matched, &options.facets);

        // Exact matches above fuzzy-only, then by score, then stable by id.
        matched.sort_by(|(a_doc, a), (b_doc, b)| {
            a.fuzzy_only
                .cmp(&b.fuzzy_only)
                .then(
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a_doc.id.cmp(&b_doc.id))
        });

        let results: Vec<SearchResult> = matched
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .map(|(doc, hit)| build_result(doc, hit))
            .collect();

        Ok(SearchResponse {
            query: options.query.clone(),
            results,
            total_count,
            facets,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// AND the clauses of one group. Returns None when any clause matches
    /// nothing (the whole group fails).
    async fn match_group(
        &self,
        group: &[QueryClause],
        options: &SearchOptions,
    ) -> Result<Option<HashMap<String, DocHit>>> {
        let mut group_hits: Option<HashMap<String, DocHit>> = None;

        for clause in group {
            let clause_hits = match clause {
                QueryClause::Term(term) => self.match_term(term, options).await?,
                QueryClause::Phrase(phrase) => self.match_phrase(phrase).await?,
            };
            if clause_hits.is_empty() {
                return Ok(None);
            }
            group_hits = Some(match group_hits {
                None => clause_hits,
                Some(mut existing) => {
                    existing.retain(|id, _| clause_hits.contains_key(id));
                    for (id, hit) in clause_hits {
                        if let Some(entry) = existing.get_mut(&id) {
                            entry.score += hit.score;
                            entry.fuzzy_only = entry.fuzzy_only || hit.fuzzy_only;
                            entry.matched_terms.extend(hit.matched_terms);
                        }
                    }
                    existing
                }
            });
            if group_hits.as_ref().is_some_and(|h| h.is_empty()) {
                return Ok(None);
            }
        }
        Ok(group_hits)
    }

    async fn match_term(
        &self,
        term: &str,
        options: &SearchOptions,
    ) -> Result<HashMap<String, DocHit>> {
        let mut hits: HashMap<String, DocHit> = HashMap::new();

        for posting in self.index.postings_for_term(term).await? {
            let weight = field_weight(&posting.field);
            let entry = hits.entry(posting.document_id.clone()).or_default();
            entry.score += f64::from(posting.frequency) * weight;
            entry.matched_terms.push(term.to_string());
        }

        if options.fuzzy {
            let threshold = f64::from(options.fuzzy_threshold) / 100.0;
            for candidate in self.index.distinct_terms().await? {
                if candidate == term {
                    continue;
                }
                let similarity = strsim::normalized_levenshtein(term, &candidate);
                if similarity < threshold {
                    continue;
                }
                for posting in self.index.postings_for_term(&candidate).await? {
                    let weight = field_weight(&posting.field) * FUZZY_WEIGHT * similarity;
                    let entry = hits
                        .entry(posting.document_id.clone())
                        .or_insert_with(|| DocHit {
                            fuzzy_only: true,
                            ..DocHit::default()
                        });
                    entry.score += f64::from(posting.frequency) * weight;
                    entry.matched_terms.push(candidate.clone());
                }
            }
        }

        Ok(hits)
    }

    /// Documents containing every phrase word, verified by a substring
    /// check against the stored text.
    async fn match_phrase(&self, phrase: &str) -> Result<HashMap<String, DocHit>> {
        let words: Vec<&str> = phrase.split_whitespace().collect();
        let mut candidates: Option<HashSet<String>> = None;
        for word in &words {
            let ids: HashSet<String> = self
                .index
                .postings_for_term(word)
                .await?
                .into_iter()
                .map(|p| p.document_id)
                .collect();
            candidates = Some(match candidates {
                None => ids,
                Some(existing) => existing.intersection(&ids).cloned().collect(),
            });
            if candidates.as_ref().is_some_and(|c| c.is_empty()) {
                return Ok(HashMap::new());
            }
        }

        let ids: Vec<String> = candidates.unwrap_or_default().into_iter().collect();
        let docs = self.index.get_documents(&ids).await?;
        let mut hits = HashMap::new();
        for doc in docs {
            let title = doc.title.to_lowercase();
            let body = doc.body.to_lowercase();
            let mut score = 0.0;
            if title.contains(phrase) {
                score += TITLE_WEIGHT;
            }
            if body.contains(phrase) {
                score += count_occurrences(&body, phrase) as f64;
            }
            if score > 0.0 {
                hits.insert(
                    doc.id,
                    DocHit {
                        score,
                        fuzzy_only: false,
                        matched_terms: vec![phrase.to_string()],
                    },
                );
            }
        }
        Ok(hits)
    }

    async fn all_document_ids(&self, source: Option<SearchSource>) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for s in [SearchSource::Repository, SearchSource::Main] {
            if source.is_none() || source == Some(s) {
                ids.extend(self.index.get_documents_by_source(s).await?);
            }
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Reindexing
    // ------------------------------------------------------------------

    /// Rebuild the index for one source (or both). Idempotent.
    pub async fn reindex(&self, source: Option<SearchSource>) -> Result<u64> {
        let mut indexed = 0u64;
        if source.is_none() || source == Some(SearchSource::Repository) {
            let entries = self.repository_entries().await?;
            indexed += self
                .index
                .replace_source(SearchSource::Repository, &entries)
                .await? as u64;
        }
        if source.is_none() || source == Some(SearchSource::Main) {
            let entries = self.main_entries().await?;
            indexed += self
                .index
                .replace_source(SearchSource::Main, &entries)
                .await? as u64;
        }
        info!(indexed, "reindex finished");
        Ok(indexed)
    }

    /// Incrementally index one page and its segments.
    pub async fn index_page(&self, page_id: &str) -> Result<()> {
        if let Some(page) = self.repository.get_page(page_id).await? {
            self.index.index_document(&page_entry(&page)).await?;
            for segment in self.repository.get_page_segments(page_id).await? {
                self.index
                    .index_document(&segment_entry(&segment, &page))
                    .await?;
            }
        }
        Ok(())
    }

    async fn repository_entries(&self) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        let mut offset = 0i64;
        loop {
            let mut query = PageQuery::new();
            query.limit = 500;
            query.offset = offset;
            let pages = self.repository.search_pages(&query).await?;
            if pages.is_empty() {
                break;
            }
            offset += pages.len() as i64;
            for page in pages {
                entries.push(page_entry(&page));
                for segment in self.repository.get_page_segments(&page.id).await? {
                    entries.push(segment_entry(&segment, &page));
                }
            }
        }

        let mut offset = 0i64;
        loop {
            let articles = self.repository.list_articles(500, offset).await?;
            if articles.is_empty() {
                break;
            }
            offset += articles.len() as i64;
            for article in articles {
                let mut facets = HashMap::new();
                facets.insert("type".to_string(), "article".to_string());
                entries.push(IndexEntry {
                    source: SearchSource::Repository,
                    source_id: article.id.clone(),
                    doc_type: "article".to_string(),
                    title: article.title.clone(),
                    body: article.text.clone(),
                    date: None,
                    facets,
                });
            }
        }
        Ok(entries)
    }

    async fn main_entries(&self) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        let mut offset = 0i64;
        loop {
            let events = self.main.list_events(500, offset).await?;
            if events.is_empty() {
                break;
            }
            offset += events.len() as i64;
            for event in events {
                let mut facets = HashMap::new();
                facets.insert("type".to_string(), "event".to_string());
                entries.push(IndexEntry {
                    source: SearchSource::Main,
                    source_id: event.id.clone(),
                    doc_type: "event".to_string(),
                    title: event.title.clone(),
                    body: event.body.clone(),
                    date: event.date,
                    facets,
                });
            }
        }
        Ok(entries)
    }
}

fn field_weight(field: &str) -> f64 {
    if field == "title" {
        TITLE_WEIGHT
    } else {
        1.0
    }
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

fn filter_doc(doc: &SearchDocRecord, options: &SearchOptions) -> bool {
    if let Some(source) = options.source {
        if doc.source != source.as_str() {
            return false;
        }
    }
    let doc_date = doc
        .doc_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    if let Some(start) = options.date_start {
        match doc_date {
            Some(d) if d >= start => {}
            _ => return false,
        }
    }
    if let Some(end) = options.date_end {
        match doc_date {
            Some(d) if d <= end => {}
            _ => return false,
        }
    }
    if !options.filters.is_empty() {
        let facets: HashMap<String, String> =
            serde_json::from_str(&doc.facets).unwrap_or_default();
        for (key, expected) in &options.filters {
            if facets.get(key) != Some(expected) {
                return false;
            }
        }
    }
    true
}

fn count_facets(
    matched: &[(SearchDocRecord, DocHit)],
    names: &[String],
) -> HashMap<String, HashMap<String, u64>> {
    let mut result: HashMap<String, HashMap<String, u64>> = HashMap::new();
    if names.is_empty() {
        return result;
    }
    for (doc, _) in matched {
        let facets: HashMap<String, String> =
            serde_json::from_str(&doc.facets).unwrap_or_default();
        for name in names {
            if let Some(value) = facets.get(name) {
                *result
                    .entry(name.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_insert(0) += 1;
            }
        }
    }
    result
}

fn build_result(doc: SearchDocRecord, hit: DocHit) -> SearchResult {
    let mut highlights = Vec::new();
    let body_lower = doc.body.to_lowercase();
    let mut seen = HashSet::new();
    for term in &hit.matched_terms {
        if !seen.insert(term.clone()) {
            continue;
        }
        if let Some(snippet) = snippet_around(&doc.body, &body_lower, term) {
            highlights.push(snippet);
        }
        if highlights.len() >= 3 {
            break;
        }
    }

    SearchResult {
        source: SearchSource::parse(&doc.source).unwrap_or(SearchSource::Repository),
        source_id: doc.source_id,
        doc_type: doc.doc_type,
        title: doc.title,
        date: doc
            .doc_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        score: hit.score,
        highlights,
    }
}

/// A snippet of context around the first occurrence of a term.
fn snippet_around(original: &str, lower: &str, term: &str) -> Option<String> {
    let pos = lower.find(term)?;
    let start = floor_char_boundary(original, pos.saturating_sub(SNIPPET_CONTEXT));
    let end = ceil_char_boundary(original, (pos + term.len() + SNIPPET_CONTEXT).min(original.len()));
    let mut snippet = original[start..end].trim().to_string();
    if start > 0 {
        snippet.insert_str(0, "...");
    }
    if end < original.len() {
        snippet.push_str("...");
    }
    Some(snippet)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Build an index entry for a page.
fn page_entry(page: &crate::models::NewspaperPage) -> IndexEntry {
    let mut facets = HashMap::new();
    facets.insert("publication".to_string(), page.lccn.clone());
    facets.insert("status".to_string(), page.status.as_str().to_string());
    facets.insert("type".to_string(), "page".to_string());
    IndexEntry {
        source: SearchSource::Repository,
        source_id: page.id.clone(),
        doc_type: "page".to_string(),
        title: format!(
            "{} {} p.{}",
            page.publication_title, page.issue_date, page.sequence
        ),
        body: page.ocr_text.clone().unwrap_or_default(),
        date: Some(page.issue_date),
        facets,
    }
}

/// Build an index entry for a segment.
fn segment_entry(
    segment: &crate::models::ArticleSegment,
    page: &crate::models::NewspaperPage,
) -> IndexEntry {
    let mut facets = HashMap::new();
    facets.insert("publication".to_string(), page.lccn.clone());
    facets.insert("kind".to_string(), segment.kind.as_str().to_string());
    facets.insert("type".to_string(), "segment".to_string());
    IndexEntry {
        source: SearchSource::Repository,
        source_id: segment.id.clone(),
        doc_type: "segment".to_string(),
        title: segment
            .text
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(80)
            .collect(),
        body: segment.text.clone(),
        date: Some(page.issue_date),
        facets,
    }
}
