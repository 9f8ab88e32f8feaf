//! Chronicling America archive client.
//!
//! The client searches the archive, downloads page content, and resolves
//! publication issue-date ranges. It never writes into the repository; it
//! hands bytes and metadata back to the caller.

mod client;
mod dates;
mod http;
mod rate_limit;

pub use client::{
    ChroniclingAmericaClient, DateAdjustment, DownloadFormat, NewspaperMetadata, PageDownload,
    PageMetadata, Pagination, SearchOutcome, SearchQuery,
};
pub use dates::IssueDateProvider;
pub use http::ArchiveHttpClient;
pub use rate_limit::RateLimiter;

/// Production base URL of the archive.
pub const CHRONICLING_AMERICA_BASE: &str = "https://chroniclingamerica.loc.gov";

/// Source-system identifier recorded on acquired pages.
pub const SOURCE_SYSTEM: &str = "chroniclingamerica";
