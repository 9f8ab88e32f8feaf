//! Client for the Chronicling America search and download surfaces.
//!
//! Search runs an ordered chain of strategies until one yields results:
//!
//! 1. advanced search with `MM/DD/YYYY` bounds and `dateFilterType=range`
//! 2. per-day direct URL probing (only for ranges of at most 730 days)
//! 3. year plus month-name keyword
//! 4. year only
//!
//! Every result set is filtered client-side to the requested date range,
//! deduplicated on `(lccn, issue_date, sequence)`, and sorted by
//! `(issue_date, sequence)`. When an LCCN is given, the requested range is
//! pruned to the publication's known issue range first and the adjustment
//! reported back to the caller.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::dates::IssueDateProvider;
use super::http::ArchiveHttpClient;
use crate::errors::{AcquireError, Result};

/// Most pages probed per issue in the direct-URL strategy.
const MAX_SEQUENCES_PER_ISSUE: u32 = 20;

/// Largest range (in days) the per-day strategy will walk.
const MAX_DIRECT_RANGE_DAYS: i64 = 730;

/// Metadata of one page in the archive's search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub lccn: String,
    pub issue_date: NaiveDate,
    pub sequence: u32,
    pub title: String,
    pub url: String,
    pub jp2_url: String,
    pub pdf_url: String,
    pub ocr_url: String,
}

/// Publication metadata from the newspapers directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewspaperMetadata {
    pub lccn: String,
    pub title: String,
    pub place_of_publication: Option<String>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub url: Option<String>,
}

/// Pagination summary for a search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: u64,
}

/// A date-range adjustment applied before searching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateAdjustment {
    /// `"start"` or `"end"`.
    pub field: &'static str,
    pub original: NaiveDate,
    pub adjusted: NaiveDate,
    /// `"first_issue"` or `"last_issue"`.
    pub reason: &'static str,
}

/// Search parameters.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub keywords: Option<String>,
    pub lccn: Option<String>,
    pub state: Option<String>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    /// 1-based result page.
    pub page: u32,
    pub page_size: u32,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self {
            page: 1,
            page_size: 20,
            ..Default::default()
        }
    }
}

/// Search results plus pagination and any date adjustments.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub pages: Vec<PageMetadata>,
    pub pagination: Pagination,
    pub adjustments: Vec<DateAdjustment>,
}

/// Downloadable content formats for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadFormat {
    Pdf,
    Jp2,
    OcrText,
    Json,
}

impl DownloadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jp2 => "jp2",
            Self::OcrText => "ocr_text",
            Self::Json => "json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(Self::Pdf),
            "jp2" => Some(Self::Jp2),
            "ocr_text" | "ocr" => Some(Self::OcrText),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jp2 => "jp2",
            Self::OcrText => "txt",
            Self::Json => "json",
        }
    }
}

/// Downloaded content for one page.
#[derive(Debug)]
pub struct PageDownload {
    pub page: PageMetadata,
    pub files: HashMap<DownloadFormat, Vec<u8>>,
    /// Per-format byte counts and source URLs, for the `.meta.json` sidecar.
    pub manifest: serde_json::Value,
}

/// The archive client.
#[derive(Clone)]
pub struct ChroniclingAmericaClient {
    http: ArchiveHttpClient,
    dates: IssueDateProvider,
    base_url: String,
}

impl ChroniclingAmericaClient {
    pub fn new(http: ArchiveHttpClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let dates = IssueDateProvider::new(http.clone(), base_url.clone());
        Self {
            http,
            dates,
            base_url,
        }
    }

    pub fn with_date_provider(mut self, dates: IssueDateProvider) -> Self {
        self.dates = dates;
        self
    }

    pub fn dates(&self) -> &IssueDateProvider {
        &self.dates
    }

    /// Search the newspapers directory, optionally filtered by state,
    /// title, and publication year.
    pub async fn search_newspapers(
        &self,
        state: Option<&str>,
        title: Option<&str>,
        year: Option<i32>,
    ) -> Result<Vec<NewspaperMetadata>> {
        let url = format!("{}/newspapers.json", self.base_url);
        let mut query: Vec<(&str, String)> = vec![("format", "json".to_string())];
        if let Some(state) = state {
            query.push(("state", state.to_string()));
        }
        if let Some(title) = title {
            query.push(("terms", title.to_string()));
        }
        let json = self.http.get_json(&url, &query).await?;

        let items = json
            .get("newspapers")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let mut newspapers: Vec<NewspaperMetadata> = items
            .iter()
            .filter_map(parse_newspaper_item)
            .collect();
        if let Some(year) = year {
            newspapers.retain(|n| {
                n.start_year.is_none_or(|s| s <= year) && n.end_year.is_none_or(|e| e >= year)
            });
        }
        Ok(newspapers)
    }

    /// Search for pages. See the module docs for the strategy chain.
    pub async fn search_pages(&self, query: &SearchQuery) -> Result<SearchOutcome> {
        let mut query = query.clone();
        if query.page == 0 {
            return Err(AcquireError::Validation("page index is 1-based".to_string()));
        }
        let adjustments = self.prune_date_range(&mut query).await?;

        let strategies = build_strategies(&query);
        let mut pages = Vec::new();
        let mut pagination = Pagination::default();

        for strategy in strategies {
            debug!(strategy = strategy.name(), "trying search strategy");
            let (found, found_pagination) = match &strategy {
                Strategy::Api { name, params } => {
                    let url = format!("{}/search/pages/results/", self.base_url);
                    let query_params: Vec<(&str, String)> =
                        params.iter().map(|(k, v)| (*k, v.clone())).collect();
                    match self.http.get_json(&url, &query_params).await {
                        Ok(json) => {
                            let items = parse_page_items(&json, &self.base_url);
                            let pagination = parse_pagination(&json, query.page, query.page_size);
                            debug!(strategy = name, items = items.len(), "strategy returned");
                            (items, Some(pagination))
                        }
                        Err(e) => {
                            debug!(strategy = name, error = %e, "strategy failed");
                            (Vec::new(), None)
                        }
                    }
                }
                Strategy::DirectUrls { lccn, start, end } => {
                    (self.probe_direct_urls(lccn, *start, *end).await?, None)
                }
            };

            let filtered = filter_to_range(found, query.date_start, query.date_end);
            if !filtered.is_empty() {
                pagination = found_pagination.unwrap_or(Pagination {
                    current_page: 1,
                    total_pages: 1,
                    total_items: filtered.len() as u64,
                });
                pages = filtered;
                info!(strategy = strategy.name(), count = pages.len(), "search strategy succeeded");
                break;
            }
        }

        let pages = dedup_and_sort(pages);
        if pages.is_empty() {
            pagination = Pagination {
                current_page: query.page,
                total_pages: 0,
                total_items: 0,
            };
        }
        Ok(SearchOutcome {
            pages,
            pagination,
            adjustments,
        })
    }

    /// Download the requested formats for a page.
    pub async fn download_page(
        &self,
        page: &PageMetadata,
        formats: &[DownloadFormat],
    ) -> Result<PageDownload> {
        let mut files = HashMap::new();
        let mut manifest_entries = serde_json::Map::new();

        for format in formats {
            let url = match format {
                DownloadFormat::Pdf => page.pdf_url.clone(),
                DownloadFormat::Jp2 => page.jp2_url.clone(),
                DownloadFormat::OcrText => page.ocr_url.clone(),
                DownloadFormat::Json => format!("{}.json", page.url.trim_end_matches('/')),
            };
            let bytes = self.http.get_bytes(&url).await?;
            manifest_entries.insert(
                format.as_str().to_string(),
                serde_json::json!({ "url": url, "bytes": bytes.len() }),
            );
            files.insert(*format, bytes);
        }

        let manifest = serde_json::json!({
            "lccn": page.lccn,
            "issue_date": page.issue_date.to_string(),
            "sequence": page.sequence,
            "source_url": page.url,
            "formats": serde_json::Value::Object(manifest_entries),
        });
        Ok(PageDownload {
            page: page.clone(),
            files,
            manifest,
        })
    }

    /// Clamp the requested range to the publication's known issue range,
    /// recording every adjustment.
    async fn prune_date_range(&self, query: &mut SearchQuery) -> Result<Vec<DateAdjustment>> {
        let mut adjustments = Vec::new();
        let Some(lccn) = query.lccn.clone() else {
            return Ok(adjustments);
        };

        if let Some(start) = query.date_start {
            if let Some(earliest) = self.dates.earliest(&lccn).await? {
                if start < earliest {
                    info!(%lccn, %start, %earliest, "adjusting start date to first issue");
                    adjustments.push(DateAdjustment {
                        field: "start",
                        original: start,
                        adjusted: earliest,
                        reason: "first_issue",
                    });
                    query.date_start = Some(earliest);
                }
            }
        }
        if let Some(end) = query.date_end {
            if let Some(latest) = self.dates.latest(&lccn).await? {
                if end > latest {
                    info!(%lccn, %end, %latest, "adjusting end date to last issue");
                    adjustments.push(DateAdjustment {
                        field: "end",
                        original: end,
                        adjusted: latest,
                        reason: "last_issue",
                    });
                    query.date_end = Some(latest);
                }
            }
        }
        Ok(adjustments)
    }

    /// Strategy 2: probe `/lccn/<lccn>/<date>/ed-1/seq-<n>.jp2` for each
    /// calendar day in range. Every day is considered; a missing `seq-1`
    /// just means no issue that day.
    async fn probe_direct_urls(
        &self,
        lccn: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PageMetadata>> {
        let mut pages = Vec::new();
        let mut day = start;
        while day <= end {
            for sequence in 1..=MAX_SEQUENCES_PER_ISSUE {
                let page_url = format!(
                    "{}/lccn/{}/{}/ed-1/seq-{}",
                    self.base_url, lccn, day, sequence
                );
                let jp2_url = format!("{page_url}.jp2");
                if !self.http.head_exists(&jp2_url).await? {
                    break;
                }
                pages.push(PageMetadata {
                    lccn: lccn.to_string(),
                    issue_date: day,
                    sequence,
                    title: format!("Page {sequence}"),
                    url: page_url.clone(),
                    jp2_url,
                    pdf_url: format!("{page_url}.pdf"),
                    ocr_url: format!("{page_url}/ocr.txt"),
                });
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        Ok(pages)
    }
}

/// One entry in the strategy chain.
enum Strategy {
    Api {
        name: &'static str,
        params: Vec<(&'static str, String)>,
    },
    DirectUrls {
        lccn: String,
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl Strategy {
    fn name(&self) -> &'static str {
        match self {
            Strategy::Api { name, .. } => name,
            Strategy::DirectUrls { .. } => "direct urls",
        }
    }
}

/// Base query parameters shared by the API strategies.
fn base_params(query: &SearchQuery) -> Vec<(&'static str, String)> {
    let mut params: Vec<(&'static str, String)> = Vec::new();
    if let Some(keywords) = &query.keywords {
        params.push(("andtext", keywords.clone()));
    }
    if let Some(state) = &query.state {
        params.push(("state", state.clone()));
    }
    if let Some(lccn) = &query.lccn {
        params.push(("lccn", lccn.trim().to_string()));
    }
    params.push(("page", query.page.to_string()));
    params.push(("rows", query.page_size.to_string()));
    params.push(("format", "json".to_string()));
    params
}

/// Strategy 1 parameters: the advanced-search form with `MM/DD/YYYY`
/// bounds, exactly as the archive's web UI submits them.
pub(crate) fn advanced_search_params(
    query: &SearchQuery,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<(&'static str, String)> {
    let mut params = base_params(query);
    params.push(("date1", start.format("%m/%d/%Y").to_string()));
    params.push(("date2", end.format("%m/%d/%Y").to_string()));
    params.push(("dateFilterType", "range".to_string()));
    params.push(("searchType", "advanced".to_string()));
    params
}

fn build_strategies(query: &SearchQuery) -> Vec<Strategy> {
    let mut strategies = Vec::new();

    if let (Some(start), Some(end)) = (query.date_start, query.date_end) {
        strategies.push(Strategy::Api {
            name: "advanced date range",
            params: advanced_search_params(query, start, end),
        });

        if let Some(lccn) = &query.lccn {
            if (end - start).num_days() <= MAX_DIRECT_RANGE_DAYS {
                strategies.push(Strategy::DirectUrls {
                    lccn: lccn.clone(),
                    start,
                    end,
                });
            }
        }
    }

    if let Some(start) = query.date_start {
        let mut params = base_params(query);
        params.push(("year", start.year().to_string()));
        params.push(("ortext", month_name(start.month()).to_string()));
        strategies.push(Strategy::Api {
            name: "year plus month keyword",
            params,
        });

        let mut params = base_params(query);
        params.push(("year", start.year().to_string()));
        strategies.push(Strategy::Api {
            name: "year only",
            params,
        });
    } else {
        // No dates at all: plain keyword/lccn search.
        strategies.push(Strategy::Api {
            name: "unbounded",
            params: base_params(query),
        });
    }

    strategies
}

fn month_name(month: u32) -> &'static str {
    match month {
        1 => "january",
        2 => "february",
        3 => "march",
        4 => "april",
        5 => "may",
        6 => "june",
        7 => "july",
        8 => "august",
        9 => "september",
        10 => "october",
        11 => "november",
        _ => "december",
    }
}

/// Parse the `items` array of a pages search response.
fn parse_page_items(json: &serde_json::Value, base_url: &str) -> Vec<PageMetadata> {
    let Some(items) = json.get("items").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| parse_page_item(item, base_url))
        .collect()
}

fn parse_page_item(item: &serde_json::Value, base_url: &str) -> Option<PageMetadata> {
    let lccn = item.get("lccn")?.as_str()?.to_string();
    let issue_date = parse_item_date(item.get("date")?.as_str()?)?;
    let sequence = item
        .get("sequence")
        .and_then(|v| v.as_u64())
        .unwrap_or(1)
        .max(1) as u32;

    let mut url = item.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
    if !url.starts_with("http") {
        url = format!("{base_url}{url}");
    }
    let trimmed = url.trim_end_matches('/').to_string();

    let title = item
        .get("title")
        .and_then(|v| v.as_str())
        .map(|t| t.to_string())
        .unwrap_or_else(|| format!("Page {sequence}"));

    Some(PageMetadata {
        lccn,
        issue_date,
        sequence,
        title,
        url,
        jp2_url: format!("{trimmed}.jp2"),
        pdf_url: format!("{trimmed}.pdf"),
        ocr_url: format!("{trimmed}/ocr.txt"),
    })
}

/// The API emits dates as `YYYYMMDD` or `YYYY-MM-DD`.
fn parse_item_date(raw: &str) -> Option<NaiveDate> {
    if raw.len() == 8 && raw.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::parse_from_str(raw, "%Y%m%d").ok();
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn parse_pagination(json: &serde_json::Value, page: u32, page_size: u32) -> Pagination {
    let total_items = json
        .get("totalItems")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let total_pages = if page_size > 0 {
        total_items.div_ceil(u64::from(page_size)) as u32
    } else {
        0
    };
    Pagination {
        current_page: page,
        total_pages,
        total_items,
    }
}

fn parse_newspaper_item(item: &serde_json::Value) -> Option<NewspaperMetadata> {
    let lccn = item
        .get("lccn")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            // fall back to extracting from the url
            let url = item.get("url").and_then(|v| v.as_str())?;
            url.split("/lccn/").nth(1).map(|rest| {
                rest.trim_end_matches(".json").trim_end_matches('/').to_string()
            })
        })?;
    Some(NewspaperMetadata {
        lccn,
        title: item
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        place_of_publication: item
            .get("place_of_publication")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        start_year: item
            .get("start_year")
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or(v.as_i64().map(|n| n as i32))),
        end_year: item
            .get("end_year")
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or(v.as_i64().map(|n| n as i32))),
        url: item.get("url").and_then(|v| v.as_str()).map(|s| s.to_string()),
    })
}

/// Keep only pages strictly within the requested range.
fn filter_to_range(
    pages: Vec<PageMetadata>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Vec<PageMetadata> {
    pages
        .into_iter()
        .filter(|p| start.is_none_or(|s| p.issue_date >= s))
        .filter(|p| end.is_none_or(|e| p.issue_date <= e))
        .collect()
}

/// Deduplicate on `(lccn, issue_date, sequence)` and sort by date then
/// sequence.
fn dedup_and_sort(pages: Vec<PageMetadata>) -> Vec<PageMetadata> {
    let mut unique: HashMap<(String, NaiveDate, u32), PageMetadata> = HashMap::new();
    for page in pages {
        unique
            .entry((page.lccn.clone(), page.issue_date, page.sequence))
            .or_insert(page);
    }
    let mut pages: Vec<PageMetadata> = unique.into_values().collect();
    pages.sort_by(|a, b| (a.issue_date, a.sequence).cmp(&(b.issue_date, b.sequence)));
    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn client() -> ChroniclingAmericaClient {
        // unroutable base URL: only offline strategies may answer
        let http = ArchiveHttpClient::new(100.0, 1, Duration::from_millis(50));
        ChroniclingAmericaClient::new(http, "http://127.0.0.1:9")
    }

    #[test]
    fn test_advanced_search_params_match_web_ui() {
        let mut query = SearchQuery::new();
        query.lccn = Some("sn83045604".to_string());
        let params = advanced_search_params(&query, date("1891-04-01"), date("1891-04-30"));

        let find = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(find("date1"), Some("04/01/1891"));
        assert_eq!(find("date2"), Some("04/30/1891"));
        assert_eq!(find("dateFilterType"), Some("range"));
        assert_eq!(find("searchType"), Some("advanced"));
        assert_eq!(find("lccn"), Some("sn83045604"));
        assert_eq!(find("page"), Some("1"));
        assert_eq!(find("format"), Some("json"));
    }

    #[tokio::test]
    async fn test_earliest_date_pruning_surfaces_adjustment() {
        let client = client();
        let mut query = SearchQuery::new();
        query.lccn = Some("sn83045604".to_string());
        query.date_start = Some(date("1800-01-01"));
        query.date_end = Some(date("1888-12-31"));
        let mut pruned = query.clone();
        let adjustments = client.prune_date_range(&mut pruned).await.unwrap();

        assert_eq!(pruned.date_start, Some(date("1888-05-11")));
        assert_eq!(
            adjustments,
            vec![DateAdjustment {
                field: "start",
                original: date("1800-01-01"),
                adjusted: date("1888-05-11"),
                reason: "first_issue",
            }]
        );

        // the upstream parameters therefore carry the adjusted bound
        let params = advanced_search_params(
            &pruned,
            pruned.date_start.unwrap(),
            pruned.date_end.unwrap(),
        );
        assert!(params.contains(&("date1", "05/11/1888".to_string())));
    }

    #[tokio::test]
    async fn test_end_date_clamped_to_last_issue() {
        let client = client();
        let mut query = SearchQuery::new();
        query.lccn = Some("sn83045604".to_string());
        query.date_start = Some(date("1899-01-01"));
        query.date_end = Some(date("1950-01-01"));
        let adjustments = client.prune_date_range(&mut query).await.unwrap();
        assert_eq!(query.date_end, Some(date("1900-12-31")));
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].reason, "last_issue");
    }

    #[test]
    fn test_direct_url_strategy_gated_on_range() {
        let mut query = SearchQuery::new();
        query.lccn = Some("sn83045604".to_string());
        query.date_start = Some(date("1891-04-01"));
        query.date_end = Some(date("1891-04-30"));
        let names: Vec<&str> = build_strategies(&query).iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "advanced date range",
                "direct urls",
                "year plus month keyword",
                "year only"
            ]
        );

        // ranges beyond two years skip the per-day walk
        query.date_end = Some(date("1895-01-01"));
        let names: Vec<&str> = build_strategies(&query).iter().map(|s| s.name()).collect();
        assert!(!names.contains(&"direct urls"));
    }

    #[test]
    fn test_parse_page_items_both_date_forms() {
        let json = serde_json::json!({
            "totalItems": 42,
            "items": [
                {"lccn": "sn83045604", "date": "18910401", "sequence": 2,
                 "id": "/lccn/sn83045604/1891-04-01/ed-1/seq-2/",
                 "title": "The Seattle post-intelligencer."},
                {"lccn": "sn83045604", "date": "1891-04-02", "sequence": 1,
                 "id": "https://chroniclingamerica.loc.gov/lccn/sn83045604/1891-04-02/ed-1/seq-1/"},
            ]
        });
        let pages = parse_page_items(&json, "https://chroniclingamerica.loc.gov");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].issue_date, date("1891-04-01"));
        assert_eq!(pages[0].sequence, 2);
        assert!(pages[0].url.starts_with("https://chroniclingamerica.loc.gov/lccn/"));
        assert!(pages[0].jp2_url.ends_with("seq-2.jp2"));
        assert!(pages[0].ocr_url.ends_with("seq-2/ocr.txt"));
        assert_eq!(pages[1].title, "Page 1");

        let pagination = parse_pagination(&json, 1, 20);
        assert_eq!(pagination.total_items, 42);
        assert_eq!(pagination.total_pages, 3);
    }

    #[test]
    fn test_filter_dedup_sort() {
        let make = |d: &str, seq: u32| PageMetadata {
            lccn: "sn83045604".to_string(),
            issue_date: date(d),
            sequence: seq,
            title: String::new(),
            url: String::new(),
            jp2_url: String::new(),
            pdf_url: String::new(),
            ocr_url: String::new(),
        };
        let pages = vec![
            make("1891-04-02", 1),
            make("1891-04-01", 2),
            make("1891-04-01", 1),
            make("1891-04-01", 1), // duplicate
            make("1891-05-01", 1), // out of range
        ];
        let filtered = filter_to_range(pages, Some(date("1891-04-01")), Some(date("1891-04-30")));
        let sorted = dedup_and_sort(filtered);
        let keys: Vec<(NaiveDate, u32)> =
            sorted.iter().map(|p| (p.issue_date, p.sequence)).collect();
        assert_eq!(
            keys,
            vec![
                (date("1891-04-01"), 1),
                (date("1891-04-01"), 2),
                (date("1891-04-02"), 1),
            ]
        );
    }
}
