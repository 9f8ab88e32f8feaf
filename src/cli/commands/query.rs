//! Read-side commands: search and list.

use console::style;

use crate::config::Settings;
use crate::context::AppContext;
use crate::errors::{AcquireError, Result};
use crate::repository::PageQuery;
use crate::search::{SearchOptions, SearchSource};

/// Run a search across the configured sources and print the results.
pub async fn cmd_search(
    settings: Settings,
    query: &str,
    source: &str,
    limit: usize,
    offset: usize,
    fuzzy: bool,
    threshold: u8,
) -> Result<()> {
    let source = match source {
        "all" => None,
        other => Some(SearchSource::parse(other).ok_or_else(|| {
            AcquireError::Validation(format!("unknown source: {other} (repo, main, all)"))
        })?),
    };
    if threshold > 100 {
        return Err(AcquireError::Validation(
            "threshold must be between 0 and 100".to_string(),
        ));
    }

    let ctx = AppContext::initialize(settings).await?;
    let mut options = SearchOptions::new(query);
    options.source = source;
    options.limit = limit;
    options.offset = offset;
    options.fuzzy = fuzzy;
    options.fuzzy_threshold = threshold;
    options.facets = vec!["publication".to_string(), "type".to_string()];

    let response = ctx.search.search(&options).await?;

    println!(
        "{} results ({} total, {} ms)",
        response.results.len(),
        response.total_count,
        response.execution_time_ms
    );
    for result in &response.results {
        let date = result
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "----".to_string());
        println!(
            "  {} [{}] {} {} (score {:.2})",
            style(&result.source_id).dim(),
            result.doc_type,
            date,
            style(&result.title).bold(),
            result.score
        );
        for highlight in &result.highlights {
            println!("      {highlight}");
        }
    }

    for (facet, values) in &response.facets {
        let mut counts: Vec<_> = values.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));
        let summary = counts
            .iter()
            .take(5)
            .map(|(value, count)| format!("{value}={count}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {}: {}", style(facet).cyan(), summary);
    }
    Ok(())
}

/// List repository pages or main-store events.
pub async fn cmd_list(
    settings: Settings,
    source: &str,
    publication: Option<&str>,
    limit: usize,
) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;

    match source {
        "repo" | "repository" => {
            let mut query = PageQuery::new();
            query.lccn = publication.map(str::to_string);
            query.limit = limit as i64;
            let pages = ctx.store.search_pages(&query).await?;
            for page in &pages {
                println!(
                    "  {} {} {} seq {:>2} [{}]",
                    style(&page.id).dim(),
                    page.lccn,
                    page.issue_date,
                    page.sequence,
                    page.status.as_str()
                );
            }

            let stats = ctx.store.stats().await?;
            println!(
                "{} pages, {} segments, {} articles",
                stats.total_pages, stats.total_segments, stats.total_articles
            );
            let mut by_status: Vec<_> = stats.pages_by_status.iter().collect();
            by_status.sort();
            for (status, count) in by_status {
                println!("  {status}: {count}");
            }
        }
        "main" => {
            let events = ctx.connector.main().list_events(limit as i64, 0).await?;
            for event in &events {
                let date = event
                    .date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "----".to_string());
                println!("  {} {} {}", style(&event.id).dim(), date, event.title);
            }
            println!("{} events shown", events.len());
        }
        other => {
            return Err(AcquireError::Validation(format!(
                "unknown source: {other} (repo, main)"
            )))
        }
    }
    Ok(())
}
