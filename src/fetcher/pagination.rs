//! Cursor pagination for export API requests
//!
//! Follows continuation cursors until the vendor reports the last page.
//!
//! Includes safety mechanisms:
//! - Cycle detection over the most recent cursors
//! - Maximum page limit to prevent infinite loops
//! - Cancellation check before every call

use std::collections::VecDeque;
use tracing::debug;

use crate::downloader::config::{DEFAULT_MAX_PAGES, DEFAULT_STALL_WINDOW};
use crate::fetcher::{EventSource, FetcherError, FetcherResult, PageRequest};
use crate::shutdown::ShutdownCoordinator;
use crate::{ManifestEntry, RawPage};

/// Bounds on one pagination loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationLimits {
    /// How many recently sent cursors a new cursor is compared against
    pub stall_window: usize,
    /// Maximum pages for one entry
    pub max_pages: usize,
}

impl Default for PaginationLimits {
    fn default() -> Self {
        Self {
            stall_window: DEFAULT_STALL_WINDOW,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

/// Fetch every page of one manifest entry
///
/// # Arguments
/// * `source` - Page source; owns retries of individual calls
/// * `entry` - User and date range to fetch
/// * `limits` - Stall window and page ceiling
/// * `cancel` - Checked before every call
///
/// # Returns
/// Pages in the order they were received
///
/// # Errors
/// - [`FetcherError::Cancelled`] if cancellation was requested before a call
/// - [`FetcherError::PaginationStalled`] on a repeated cursor or when `max_pages`
///   pages were fetched and the vendor still reports more
/// - any error from `source`
pub async fn fetch_all_pages(
    source: &dyn EventSource,
    entry: &ManifestEntry,
    limits: PaginationLimits,
    cancel: Option<&ShutdownCoordinator>,
) -> FetcherResult<Vec<RawPage>> {
    let stall_window = limits.stall_window.max(1);
    let mut pages: Vec<RawPage> = Vec::new();
    let mut recent: VecDeque<String> = VecDeque::with_capacity(stall_window);
    let mut request = PageRequest::first(entry);

    loop {
        if cancel.is_some_and(ShutdownCoordinator::is_shutdown_requested) {
            debug!(
                user_id = %entry.user_id,
                pages = pages.len(),
                "Pagination cancelled before next call"
            );
            return Err(FetcherError::Cancelled);
        }

        let page = source.fetch_page(&request).await?;
        debug!(
            user_id = %entry.user_id,
            page = pages.len() + 1,
            events = page.events.len(),
            "Received page"
        );

        let next_cursor = if page.has_more() { page.cursor.clone() } else { None };
        pages.push(page);
        let Some(cursor) = next_cursor else {
            break;
        };

        if recent.contains(&cursor) {
            return Err(FetcherError::PaginationStalled {
                user_id: entry.user_id.clone(),
                cursor: Some(cursor),
                pages: pages.len(),
                reason: format!("cursor repeated within the last {stall_window} page(s)"),
            });
        }

        if pages.len() >= limits.max_pages {
            return Err(FetcherError::PaginationStalled {
                user_id: entry.user_id.clone(),
                cursor: Some(cursor),
                pages: pages.len(),
                reason: format!("page limit ({}) reached", limits.max_pages),
            });
        }

        if recent.len() == stall_window {
            recent.pop_front();
        }
        recent.push_back(cursor.clone());
        request = request.next(cursor);
    }

    debug!(
        user_id = %entry.user_id,
        pages = pages.len(),
        "Pagination completed"
    );

    Ok(pages)
}
