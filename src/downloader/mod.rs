//! Run orchestration and rate limiting
//!
//! This module provides the extraction engine: it takes a manifest of
//! `(user, date range)` entries and turns each into one published result.
//!
//! # Overview
//!
//! 1. **Planning**: The manifest is read in full; malformed lines and duplicate
//!    entries are recorded and skipped
//! 2. **Resumability**: Entries whose result is already published are skipped
//! 3. **Execution**: Pagination, aggregation and publication per entry, with up
//!    to `concurrency` entries in flight, via [`executor::ExtractionExecutor`]
//! 4. **Rate Limiting**: Every request takes a permit from [`rate_limit::RateLimiter`]
//! 5. **Reporting**: A [`job::RunSummary`] describes what happened to every entry
//!
//! # Quick Start
//!
//! ```no_run
//! use amplitude_events_downloader::downloader::ExtractionExecutor;
//! use amplitude_events_downloader::fetcher::EventSource;
//! use amplitude_events_downloader::output::JsonResultWriter;
//! use std::sync::Arc;
//!
//! # async fn example(source: Arc<dyn EventSource>) -> Result<(), Box<dyn std::error::Error>> {
//! let writer = Arc::new(JsonResultWriter::new("userData/raw")?);
//! let summary = ExtractionExecutor::new(source, writer)
//!     .with_concurrency(4)
//!     .run_manifest("user_ids.txt")
//!     .await?;
//! if summary.is_aborted() {
//!     eprintln!("{}", summary.format_report());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Only an unreadable manifest is returned as [`DownloadError`]. Entry failures,
//! malformed lines and run aborts are data in the summary.

pub mod config;
pub mod executor;
pub mod job;
pub mod progress;
pub mod rate_limit;

pub use executor::ExtractionExecutor;
pub use job::{EntryOutcome, EntryState, RunSummary};
pub use rate_limit::{RateLimiter, Throttle};

/// Run-level errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The manifest could not be opened or read
    #[error("{0}")]
    ManifestUnreadable(String),
}
