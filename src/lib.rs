//! # Amplitude Events Downloader Library
//!
//! Batch extraction of per-user event histories from an Amplitude-style export
//! API. A manifest lists users and inclusive date ranges; every entry becomes one
//! JSON file holding that user's deduplicated events.
//!
//! ## Features
//!
//! - **Manifest parsing**: `user_id|start_date|end_date` lines, malformed lines
//!   reported and skipped
//! - **Rate Limiting**: Rolling-window request ceiling shared by all workers
//! - **Retry**: Exponential backoff with jitter for transient HTTP failures
//! - **Pagination**: Cursor-following loop with cycle detection
//! - **Resume Capability**: Entries with a published output are skipped on re-run
//! - **Atomic Output**: Results are staged and renamed into place
//!
//! ## Quick Start
//!
//! ```no_run
//! use amplitude_events_downloader::downloader::{ExtractionExecutor, RateLimiter};
//! use amplitude_events_downloader::fetcher::amplitude_config::{AmplitudeConfig, Credentials};
//! use amplitude_events_downloader::fetcher::amplitude_http::AmplitudeHttpClient;
//! use amplitude_events_downloader::output::JsonResultWriter;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::new("api-key", "secret-key")?;
//! let limiter = Arc::new(RateLimiter::new(60, Duration::from_secs(60)));
//! let client = AmplitudeHttpClient::new(AmplitudeConfig::default(), credentials, limiter)?;
//! let writer = JsonResultWriter::new("userData/raw")?;
//!
//! let executor = ExtractionExecutor::new(Arc::new(client), Arc::new(writer));
//! let summary = executor.run_manifest("user_ids.txt").await?;
//! println!("{} entries done", summary.succeeded.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`manifest`] - Manifest parsing into [`manifest::ManifestEntry`] records
//! - [`fetcher`] - Export API client, retry policy, response parsing, pagination
//! - [`aggregator`] - Merging pages into one ordered, deduplicated result
//! - [`output`] - Atomic JSON result writer
//! - [`downloader`] - Rate limiting and run orchestration
//! - [`shutdown`] - Cooperative cancellation

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Merging of paginated results
pub mod aggregator;

/// CLI command implementations
pub mod cli;

/// Run orchestration and rate limiting
pub mod downloader;

/// Export API access
pub mod fetcher;

/// Manifest parsing
pub mod manifest;

/// Observability metrics
pub mod metrics;

/// Result writers
pub mod output;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

pub use manifest::{EntryKey, ManifestEntry};

/// A single analytics event for one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Vendor-supplied event identity, when the payload carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Event name (e.g., "session_start")
    pub event_type: String,
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Event properties
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// User properties attached to the event
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub user_properties: Map<String, Value>,
    /// User the event belongs to
    pub user_id: String,
}

impl Event {
    /// Validate event data integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.event_type.is_empty() {
            return Err("Event type cannot be empty".to_string());
        }

        if self.user_id.is_empty() {
            return Err("User id cannot be empty".to_string());
        }

        if let Some(id) = &self.event_id {
            if id.is_empty() {
                return Err("Event id must be absent or non-empty".to_string());
            }
        }

        Ok(())
    }
}

/// One decoded export API response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    /// Events in vendor order
    pub events: Vec<Event>,
    /// Continuation token; `None` when the vendor reported no further pages
    pub cursor: Option<String>,
    /// Explicit end-of-results marker
    pub done: bool,
}

impl RawPage {
    /// Whether another page should be requested after this one
    pub fn has_more(&self) -> bool {
        !self.done && self.cursor.is_some()
    }
}

/// All events of one manifest entry, merged across pages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedResult {
    /// User the events were requested for
    pub user_id: String,
    /// First day of the range (inclusive)
    pub range_start: NaiveDate,
    /// Last day of the range (inclusive)
    pub range_end: NaiveDate,
    /// Events in first-seen vendor order
    pub events: Vec<Event>,
    /// When the last page was received
    pub fetched_at: DateTime<Utc>,
    /// Number of pages consumed
    pub page_count: usize,
    /// Number of re-delivered events that were dropped
    #[serde(default)]
    pub duplicates_dropped: usize,
}

impl AggregatedResult {
    /// Key this result is published under
    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.user_id.clone(), self.range_start, self.range_end)
    }

    /// Zero events is a valid outcome, not a failure
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
