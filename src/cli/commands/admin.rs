//! Administrative commands: setup, export, import, maintenance, backup.

use std::path::Path;

use console::style;

use crate::config::Settings;
use crate::context::AppContext;
use crate::errors::Result;
use crate::migrate;
use crate::repository::migrations;

/// Initialize the repository directory and all three databases.
pub async fn cmd_setup(settings: Settings) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;
    println!("{} repository: {}", style("✓").green(), ctx.settings.repository_path.display());
    println!("{} index db:   {}", style("✓").green(), ctx.settings.database_path.display());
    println!("{} search db:  {}", style("✓").green(), ctx.settings.search_index_path.display());
    println!("{} main db:    {}", style("✓").green(), ctx.settings.main_database_path.display());
    Ok(())
}

pub async fn cmd_export(
    settings: Settings,
    output: &Path,
    format: &str,
    publication: Option<&str>,
) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;
    let bundle = migrate::export(&ctx, output, format, publication).await?;
    println!(
        "{} exported {} pages, {} segments, {} articles, {} events to {}",
        style("✓").green(),
        bundle.pages.len(),
        bundle.segments.len(),
        bundle.articles.len(),
        bundle.events.len(),
        output.display()
    );
    Ok(())
}

pub async fn cmd_import(
    settings: Settings,
    source_type: &str,
    source_path: &Path,
    mapping: Option<&str>,
) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;
    let mapping = match mapping {
        Some(raw) => migrate::parse_mapping(raw)?,
        None => serde_json::Value::Null,
    };
    let rows = migrate::import(&ctx, source_type, source_path, &mapping).await?;
    println!("{} imported {rows} rows", style("✓").green());
    Ok(())
}

pub async fn cmd_maintenance(
    settings: Settings,
    vacuum: bool,
    analyze: bool,
    rebuild_index: bool,
) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;

    let cleaned = ctx
        .queue
        .cleanup(ctx.settings.retention.archive_days)
        .await?;
    if cleaned > 0 {
        println!("removed {cleaned} archived tasks and bulks");
    }
    if vacuum {
        migrations::vacuum(&ctx.repo_pool).await?;
        println!("{} vacuum", style("✓").green());
    }
    if analyze {
        migrations::analyze(&ctx.repo_pool).await?;
        println!("{} analyze", style("✓").green());
    }
    if rebuild_index {
        let indexed = ctx.search.reindex(None).await?;
        println!("{} reindexed {indexed} documents", style("✓").green());
    }
    Ok(())
}

pub async fn cmd_backup(settings: Settings, output: &Path) -> Result<()> {
    let ctx = AppContext::initialize(settings).await?;
    migrate::backup(&ctx, output).await?;
    println!("{} backup written to {}", style("✓").green(), output.display());
    Ok(())
}
