//! CLI parser and dispatch.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::errors::AcquireError;

#[derive(Parser)]
#[command(name = "newsacquire")]
#[command(about = "Historical newspaper acquisition and research system")]
#[command(version)]
pub struct Cli {
    /// Config file path (JSON or YAML); discovered next to the data
    /// directory when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the repository, databases, and search index
    Setup,

    /// Search the archive and download pages into the repository
    Download {
        /// Source system (only chroniclingamerica is built in)
        #[arg(long, default_value = "chroniclingamerica")]
        source: String,
        /// Publication LCCN, e.g. sn83045604
        #[arg(long)]
        publication: String,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start_date: String,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end_date: String,
        /// Stop after this many pages (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_items: usize,
        /// Formats to fetch (comma separated: jp2,pdf,ocr_text,json)
        #[arg(long, default_value = "jp2,ocr_text")]
        formats: String,
    },

    /// Enqueue OCR for downloaded pages of a publication
    Process {
        /// Publication LCCN
        #[arg(long)]
        publication: String,
        /// Also re-enqueue pages that already have OCR
        #[arg(long)]
        reprocess: bool,
    },

    /// Enqueue article segmentation for OCR'd pages
    ExtractEntities {
        /// Publication LCCN
        #[arg(long)]
        publication: String,
        /// Start date filter (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<String>,
        /// End date filter (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<String>,
    },

    /// Search the repository and the main events store
    Search {
        /// Query string; supports AND/OR and "quoted phrases"
        query: String,
        /// Restrict to one source: repo, main, or all
        #[arg(long, default_value = "all")]
        source: String,
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Enable fuzzy matching
        #[arg(long)]
        fuzzy: bool,
        /// Fuzzy similarity threshold (0-100)
        #[arg(long, default_value = "70")]
        threshold: u8,
    },

    /// List repository pages or main-store events
    List {
        /// Source to list: repo or main
        #[arg(long, default_value = "repo")]
        source: String,
        /// Filter by publication LCCN
        #[arg(long)]
        publication: Option<String>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Export the logical row set to JSON or CSV
    Export {
        /// Output file (json) or directory (csv)
        #[arg(long)]
        output: PathBuf,
        /// json or csv
        #[arg(long, default_value = "json")]
        format: String,
        /// Restrict to one publication
        #[arg(long)]
        publication: Option<String>,
    },

    /// Import rows from a JSON bundle, CSV file, or SQLite database
    Import {
        /// json, csv, or sqlite
        #[arg(long)]
        source_type: String,
        #[arg(long)]
        source_path: PathBuf,
        /// JSON column mapping for CSV imports,
        /// e.g. {"title":"headline","date":"published","body":"content"}
        #[arg(long)]
        mapping: Option<String>,
    },

    /// Database maintenance
    Maintenance {
        /// Reclaim free pages
        #[arg(long)]
        vacuum: bool,
        /// Refresh planner statistics
        #[arg(long)]
        analyze: bool,
        /// Rebuild the search index from both stores
        #[arg(long)]
        rebuild_index: bool,
    },

    /// Back up all databases to a directory
    Backup {
        #[arg(long)]
        output: PathBuf,
    },

    /// Control the processing service
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },

    /// Manage bulk operations
    Bulk {
        #[command(subcommand)]
        command: BulkCommands,
    },
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// Run the pipeline service in the foreground
    Start,
    /// Ask a running service to stop
    Stop,
    /// Show queue and repository status
    Status,
    /// Pause the scheduler (leased tasks finish)
    Pause,
    /// Resume a paused scheduler
    Resume,
}

#[derive(Subcommand)]
enum BulkCommands {
    /// Create an empty bulk operation
    Create {
        #[arg(long)]
        description: String,
        /// ocr, segment, reindex, export, import, or promote
        #[arg(long)]
        operation: String,
    },
    /// Add tasks for a publication's pages to a bulk
    Add {
        bulk_id: String,
        #[arg(long)]
        publication: String,
    },
    /// Show one bulk, or all when no id is given
    Status { bulk_id: Option<String> },
    Pause { bulk_id: String },
    Resume { bulk_id: String },
    Cancel { bulk_id: String },
    /// Requeue only the failed children of a bulk
    RetryFailed { bulk_id: String },
}

/// Run the CLI; the returned error carries the process exit code.
pub async fn run() -> Result<(), AcquireError> {
    let cli = Cli::parse();
    let settings = Settings::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Setup => commands::cmd_setup(settings).await,
        Commands::Download {
            source,
            publication,
            start_date,
            end_date,
            max_items,
            formats,
        } => {
            commands::cmd_download(
                settings,
                &source,
                &publication,
                &start_date,
                &end_date,
                max_items,
                &formats,
            )
            .await
        }
        Commands::Process {
            publication,
            reprocess,
        } => commands::cmd_process(settings, &publication, reprocess).await,
        Commands::ExtractEntities {
            publication,
            start_date,
            end_date,
        } => {
            commands::cmd_extract_entities(
                settings,
                &publication,
                start_date.as_deref(),
                end_date.as_deref(),
            )
            .await
        }
        Commands::Search {
            query,
            source,
            limit,
            offset,
            fuzzy,
            threshold,
        } => {
            commands::cmd_search(settings, &query, &source, limit, offset, fuzzy, threshold).await
        }
        Commands::List {
            source,
            publication,
            limit,
        } => commands::cmd_list(settings, &source, publication.as_deref(), limit).await,
        Commands::Export {
            output,
            format,
            publication,
        } => commands::cmd_export(settings, &output, &format, publication.as_deref()).await,
        Commands::Import {
            source_type,
            source_path,
            mapping,
        } => {
            commands::cmd_import(settings, &source_type, &source_path, mapping.as_deref()).await
        }
        Commands::Maintenance {
            vacuum,
            analyze,
            rebuild_index,
        } => commands::cmd_maintenance(settings, vacuum, analyze, rebuild_index).await,
        Commands::Backup { output } => commands::cmd_backup(settings, &output).await,
        Commands::Service { command } => match command {
            ServiceCommands::Start => commands::cmd_service_start(settings).await,
            ServiceCommands::Stop => commands::cmd_service_stop(settings).await,
            ServiceCommands::Status => commands::cmd_service_status(settings).await,
            ServiceCommands::Pause => commands::cmd_service_pause(settings, true).await,
            ServiceCommands::Resume => commands::cmd_service_pause(settings, false).await,
        },
        Commands::Bulk { command } => match command {
            BulkCommands::Create {
                description,
                operation,
            } => commands::cmd_bulk_create(settings, &description, &operation).await,
            BulkCommands::Add {
                bulk_id,
                publication,
            } => commands::cmd_bulk_add(settings, &bulk_id, &publication).await,
            BulkCommands::Status { bulk_id } => {
                commands::cmd_bulk_status(settings, bulk_id.as_deref()).await
            }
            BulkCommands::Pause { bulk_id } => {
                commands::cmd_bulk_control(settings, &bulk_id, "pause").await
            }
            BulkCommands::Resume { bulk_id } => {
                commands::cmd_bulk_control(settings, &bulk_id, "resume").await
            }
            BulkCommands::Cancel { bulk_id } => {
                commands::cmd_bulk_control(settings, &bulk_id, "cancel").await
            }
            BulkCommands::RetryFailed { bulk_id } => {
                commands::cmd_bulk_control(settings, &bulk_id, "retry-failed").await
            }
        },
    }
}
