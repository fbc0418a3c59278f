//! Run configuration constants

/// Default number of retries after the first attempt of a request.
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
/// Retry 5 = 32s capped to 30s.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Fraction of a backoff delay that jitter may remove.
pub const BACKOFF_JITTER_RATIO: f64 = 0.25;

/// Default export API budget: requests per window.
pub const DEFAULT_MAX_REQUESTS: usize = 60;

/// Default rate-limit window in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Default number of manifest entries processed concurrently.
/// One keeps the run strictly sequential.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Number of recent cursors compared against each new cursor.
pub const DEFAULT_STALL_WINDOW: usize = 3;

/// Hard ceiling on pages fetched for one entry.
pub const DEFAULT_MAX_PAGES: usize = 10_000;

/// Per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// TCP connect timeout in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
