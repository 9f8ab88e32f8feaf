//! NewsAcquire - historical newspaper acquisition and research system.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsacquire::cli;

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "newsacquire=info"
    } else {
        "newsacquire=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(error) = cli::run().await {
        eprintln!("error: {error}");
        std::process::exit(error.exit_code());
    }
}
