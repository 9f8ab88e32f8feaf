//! Issue-date resolution for publications.
//!
//! The archive does not expose a cheap "first issue" field, so resolution
//! walks a strategy chain and caches whatever wins:
//!
//! 1. in-memory cache (persisted to a JSON file when configured)
//! 2. bundled dataset of well-known publications
//! 3. the per-publication JSON endpoint (`/lccn/<lccn>.json`)
//! 4. HTML scrape of the publication listing page (`/lccn/<lccn>`)
//!
//! Each strategy is a small pure function over fetched content, so the
//! parsing is testable without the network.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::http::ArchiveHttpClient;
use crate::errors::Result;

/// Well-known publications and their issue ranges.
const BUNDLED_DATES: &[(&str, &str, &str)] = &[
    // (lccn, earliest, latest)
    ("sn83045604", "1888-05-11", "1900-12-31"), // The Seattle post-intelligencer
    ("sn83030213", "1842-04-22", "1866-04-12"), // New-York daily tribune
    ("sn83030214", "1866-04-10", "1922-12-31"), // New-York tribune
    ("sn84026749", "1902-12-01", "1920-12-31"), // The Washington times
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CachedDates {
    earliest: Option<NaiveDate>,
    latest: Option<NaiveDate>,
}

/// Resolver for earliest and latest issue dates, keyed by LCCN.
#[derive(Clone)]
pub struct IssueDateProvider {
    http: ArchiveHttpClient,
    base_url: String,
    cache: Arc<RwLock<HashMap<String, CachedDates>>>,
    cache_path: Option<PathBuf>,
}

impl IssueDateProvider {
    pub fn new(http: ArchiveHttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_path: None,
        }
    }

    /// Persist the cache to a JSON file, loading any existing content now.
    pub fn with_cache_file(mut self, path: PathBuf) -> Self {
        if let Ok(content) = std::fs::read_to_string(&path) {
            match serde_json::from_str::<HashMap<String, CachedDates>>(&content) {
                Ok(loaded) => {
                    info!(entries = loaded.len(), "loaded issue-date cache");
                    self.cache = Arc::new(RwLock::new(loaded));
                }
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring bad date cache"),
            }
        }
        self.cache_path = Some(path);
        self
    }

    /// Earliest issue date for a publication, or None when no source knows.
    pub async fn earliest(&self, lccn: &str) -> Result<Option<NaiveDate>> {
        self.resolve(lccn, true).await
    }

    /// Latest issue date for a publication.
    pub async fn latest(&self, lccn: &str) -> Result<Option<NaiveDate>> {
        self.resolve(lccn, false).await
    }

    async fn resolve(&self, lccn: &str, earliest: bool) -> Result<Option<NaiveDate>> {
        // 1. cache
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(lccn) {
                let hit = if earliest { cached.earliest } else { cached.latest };
                if hit.is_some() {
                    debug!(lccn, "issue date from cache");
                    return Ok(hit);
                }
            }
        }

        // 2. bundled dataset
        if let Some(date) = bundled_date(lccn, earliest) {
            debug!(lccn, %date, "issue date from bundled dataset");
            self.remember(lccn, earliest, date).await;
            return Ok(Some(date));
        }

        // 3. publication JSON endpoint
        let json_url = format!("{}/lccn/{}.json", self.base_url, lccn);
        match self.http.get_json(&json_url, &[]).await {
            Ok(json) => {
                if let Some(date) = issue_date_from_json(&json, earliest) {
                    debug!(lccn, %date, "issue date from JSON endpoint");
                    self.remember(lccn, earliest, date).await;
                    return Ok(Some(date));
                }
            }
            Err(e) => debug!(lccn, error = %e, "publication JSON lookup failed"),
        }

        // 4. HTML scrape of the listing page
        let html_url = format!("{}/lccn/{}", self.base_url, lccn);
        match self.http.get_text(&html_url).await {
            Ok(html) => {
                if let Some(date) = issue_date_from_html(&html, earliest) {
                    debug!(lccn, %date, "issue date from HTML listing");
                    self.remember(lccn, earliest, date).await;
                    return Ok(Some(date));
                }
            }
            Err(e) => debug!(lccn, error = %e, "publication HTML lookup failed"),
        }

        warn!(lccn, "no source knows the {} issue date", if earliest { "earliest" } else { "latest" });
        Ok(None)
    }

    async fn remember(&self, lccn: &str, earliest: bool, date: NaiveDate) {
        {
            let mut cache = self.cache.write().await;
            let entry = cache.entry(lccn.to_string()).or_default();
            if earliest {
                entry.earliest = Some(date);
            } else {
                entry.latest = Some(date);
            }
        }
        if let Some(path) = &self.cache_path {
            let snapshot = self.cache.read().await.clone();
            if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(path = %path.display(), error = %e, "could not persist date cache");
                }
            }
        }
    }
}

/// Strategy 2: the bundled dataset.
fn bundled_date(lccn: &str, earliest: bool) -> Option<NaiveDate> {
    BUNDLED_DATES
        .iter()
        .find(|(known, _, _)| *known == lccn)
        .and_then(|(_, first, last)| {
            let raw = if earliest { first } else { last };
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
        })
}

/// Strategy 3: issues listed in the publication JSON.
fn issue_date_from_json(json: &serde_json::Value, earliest: bool) -> Option<NaiveDate> {
    let issues = json.get("issues")?.as_array()?;
    let mut dates: Vec<NaiveDate> = issues
        .iter()
        .filter_map(|issue| issue.get("date_issued").and_then(|d| d.as_str()))
        .filter_map(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
        .collect();
    dates.sort();
    if earliest {
        dates.first().copied()
    } else {
        dates.last().copied()
    }
}

/// Strategy 4: the "Earliest Issue" / "Latest Issue" rows of the listing
/// page, with dates like `May 11, 1888`.
fn issue_date_from_html(html: &str, earliest: bool) -> Option<NaiveDate> {
    let label = if earliest { "earliest" } else { "latest" };
    let document = Html::parse_document(html);
    let row_selector = Selector::parse("tr").ok()?;
    let th_selector = Selector::parse("th").ok()?;
    let td_selector = Selector::parse("td").ok()?;

    for row in document.select(&row_selector) {
        let heading = row
            .select(&th_selector)
            .next()
            .map(|th| th.text().collect::<String>().to_ascii_lowercase());
        if heading.is_some_and(|h| h.contains(label)) {
            let value = row
                .select(&td_selector)
                .next()
                .map(|td| td.text().collect::<String>())?;
            if let Ok(date) = NaiveDate::parse_from_str(value.trim(), "%B %d, %Y") {
                return Some(date);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_seattle_pi() {
        assert_eq!(
            bundled_date("sn83045604", true),
            NaiveDate::from_ymd_opt(1888, 5, 11)
        );
        assert_eq!(
            bundled_date("sn83045604", false),
            NaiveDate::from_ymd_opt(1900, 12, 31)
        );
        assert_eq!(bundled_date("sn00000000", true), None);
    }

    #[test]
    fn test_issue_date_from_json() {
        let json = serde_json::json!({
            "issues": [
                {"date_issued": "1891-04-03"},
                {"date_issued": "1891-04-01"},
                {"date_issued": "1891-04-02"},
            ]
        });
        assert_eq!(
            issue_date_from_json(&json, true),
            NaiveDate::from_ymd_opt(1891, 4, 1)
        );
        assert_eq!(
            issue_date_from_json(&json, false),
            NaiveDate::from_ymd_opt(1891, 4, 3)
        );
        assert_eq!(issue_date_from_json(&serde_json::json!({}), true), None);
    }

    #[test]
    fn test_issue_date_from_html() {
        let html = r#"
            <table class="newspaper-metadata">
              <tr><th>Place of publication</th><td>Seattle, Wash.</td></tr>
              <tr><th>Earliest Issue</th><td>May 11, 1888</td></tr>
              <tr><th>Latest Issue</th><td>December 31, 1900</td></tr>
            </table>
        "#;
        assert_eq!(
            issue_date_from_html(html, true),
            NaiveDate::from_ymd_opt(1888, 5, 11)
        );
        assert_eq!(
            issue_date_from_html(html, false),
            NaiveDate::from_ymd_opt(1900, 12, 31)
        );
        assert_eq!(issue_date_from_html("<p>no table</p>", true), None);
    }

    #[tokio::test]
    async fn test_bundled_wins_without_network() {
        // base_url points nowhere; the bundled dataset must answer first
        let http = ArchiveHttpClient::new(100.0, 1, std::time::Duration::from_millis(50));
        let provider = IssueDateProvider::new(http, "http://127.0.0.1:9");
        let date = provider.earliest("sn83045604").await.unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(1888, 5, 11));
    }

    #[tokio::test]
    async fn test_cache_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("dates.json");
        let http = ArchiveHttpClient::new(100.0, 1, std::time::Duration::from_millis(50));
        let provider = IssueDateProvider::new(http.clone(), "http://127.0.0.1:9")
            .with_cache_file(cache_path.clone());
        provider.earliest("sn83045604").await.unwrap();
        assert!(cache_path.exists());

        // a fresh provider reads the persisted entry before anything else
        let reloaded =
            IssueDateProvider::new(http, "http://127.0.0.1:9").with_cache_file(cache_path);
        let date = reloaded.earliest("sn83045604").await.unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(1888, 5, 11));
    }
}
