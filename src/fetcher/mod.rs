//! Export API access
//!
//! [`EventSource`] is the seam between the orchestrator and the vendor: one call
//! returns one decoded page. [`amplitude_http::AmplitudeHttpClient`] is the real
//! implementation; tests script fakes.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{ManifestEntry, RawPage};

pub mod amplitude_config;
pub mod amplitude_http;
pub mod amplitude_parser;
pub mod pagination;
pub mod retry;

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Credentials rejected (401/403); no later request can succeed
    #[error("authentication rejected (HTTP {status}): {message}")]
    Auth {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Export endpoint not found (404); the configuration is wrong for every entry
    #[error("export endpoint not found: {message}")]
    NotFound {
        /// Response body or reason
        message: String,
    },

    /// Request failed permanently for this entry
    #[error("fetch failed for user {user_id}: {cause}")]
    FetchFailed {
        /// User whose request failed
        user_id: String,
        /// Last underlying error
        cause: String,
    },

    /// Pagination did not make forward progress
    #[error("pagination stalled for user {user_id} after {pages} page(s): {reason}")]
    PaginationStalled {
        /// User being paginated
        user_id: String,
        /// Offending cursor, if any
        cursor: Option<String>,
        /// Pages consumed before giving up
        pages: usize,
        /// Cycle or page ceiling
        reason: String,
    },

    /// Response body is not the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Shutdown or run abort observed before the next call
    #[error("cancelled")]
    Cancelled,
}

impl FetcherError {
    /// Whether the error halts the whole run rather than just the current entry
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::NotFound { .. })
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// One call's worth of request parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// User whose events are requested
    pub user_id: String,
    /// First day (inclusive)
    pub range_start: NaiveDate,
    /// Last day (inclusive)
    pub range_end: NaiveDate,
    /// Continuation token from the previous page; `None` on the first call
    pub cursor: Option<String>,
}

impl PageRequest {
    /// Request for the first page of an entry
    pub fn first(entry: &ManifestEntry) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            range_start: entry.range_start,
            range_end: entry.range_end,
            cursor: None,
        }
    }

    /// Request for the page following `cursor`
    pub fn next(&self, cursor: impl Into<String>) -> Self {
        Self {
            cursor: Some(cursor.into()),
            ..self.clone()
        }
    }
}

/// Source of event pages
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch one page
    ///
    /// Implementations own retrying of transient failures; an `Err` here is
    /// final for this page.
    async fn fetch_page(&self, request: &PageRequest) -> FetcherResult<RawPage>;
}
