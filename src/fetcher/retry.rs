//! Retry classification, backoff policy and retry message formatting.
//!
//! The backoff decision is a pure function of the attempt number, the error
//! class and a jitter sample, so it can be tested without clocks or randomness.

use chrono::NaiveDate;
use reqwest::{Error as ReqwestError, StatusCode};
use std::time::Duration;

use crate::downloader::config::{
    BACKOFF_JITTER_RATIO, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_RETRIES,
};

/// Classification of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// HTTP 404, the export endpoint or project does not exist
    NotFound,
    /// Other client errors (4xx, except 429)
    ClientError(u16),
    /// Generic transport failure
    NetworkGeneric,
}

impl RetryErrorType {
    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "authentication failed (403)",
                _ => "authentication failed",
            },
            Self::NotFound => "resource not found",
            Self::ClientError(_) => "client error",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation presented with actionable guidance after failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection or raise --request-timeout-secs",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "Lower --max-requests or widen --window-secs",
            Self::ServerError(_) => "The analytics API may be degraded, try again later",
            Self::AuthFailed(_) => "Verify AMPLITUDE_API_KEY and AMPLITUDE_SECRET_KEY",
            Self::NotFound => "Check --base-url and the export path",
            Self::ClientError(_) => "Review the user id and date range of the entry",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether a request failing this way may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout
                | Self::NetworkOffline
                | Self::RateLimit
                | Self::ServerError(_)
                | Self::NetworkGeneric
        )
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the duration, then try again
    RetryAfter(Duration),
    /// Stop retrying and surface the error
    GiveUp,
}

/// Exponential backoff with downward jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Fraction of the delay jitter may remove, in `[0, 1]`
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_max_retries(MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Policy allowing `max_retries` retries after the first attempt
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            base_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            jitter_ratio: BACKOFF_JITTER_RATIO,
        }
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed
    ///
    /// `jitter_sample` is expected in `[0, 1)`; values outside are clamped.
    /// The delay is `min(base * 2^(attempt-1), max)` reduced by up to
    /// `jitter_ratio` of itself.
    pub fn decide(&self, attempt: u32, kind: RetryErrorType, jitter_sample: f64) -> RetryDecision {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let exponent = attempt.saturating_sub(1).min(31);
        let uncapped = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = uncapped.min(self.max_delay);

        let sample = if jitter_sample.is_finite() {
            jitter_sample.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        RetryDecision::RetryAfter(capped.mul_f64(1.0 - ratio * sample))
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// User being extracted
    pub user_id: String,
    /// Requested date range
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    /// Original error message for details
    pub error_message: String,
    /// URL or endpoint that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.attempt + 1,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );

        append_user_and_range(&mut message, &self.user_id, self.date_range);
        message
    }

    /// Format retry success message when a previous attempt eventually works.
    pub fn format_success(&self) -> String {
        let mut message = format!(
            "Retry attempt {}/{} succeeded - resuming extraction",
            self.attempt, self.max_attempts
        );
        append_user_and_range(&mut message, &self.user_id, self.date_range);
        message
    }

    /// Format final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!("[FAILED] Request failed after {} attempt(s)", self.attempt),
            format!("  Last error: {}", self.error_message),
        ];

        let user_display = if self.user_id.is_empty() {
            "unknown"
        } else {
            &self.user_id
        };
        lines.push(format!("  User: {user_display}"));

        let range_display = self
            .date_range
            .map(|(start, end)| format!("{start} to {end}"))
            .unwrap_or_else(|| "unknown".to_string());
        lines.push(format!("  Date range: {range_display}"));
        lines.push(format!("  Endpoint: {}", self.endpoint));
        lines.push("  Suggestions:".to_string());

        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }

        lines.join("\n")
    }

    /// Derive suggestions tailored to the current retry context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            suggestions.push(format!(
                "Try increasing --max-retries (current: {})",
                self.max_attempts.saturating_sub(1)
            ));
        }
        suggestions
    }
}

/// Extract a [`RetryErrorType`] from an HTTP status or reqwest error.
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> RetryErrorType {
    if let Some(status) = status {
        match status.as_u16() {
            401 | 403 => return RetryErrorType::AuthFailed(status.as_u16()),
            404 => return RetryErrorType::NotFound,
            429 => return RetryErrorType::RateLimit,
            _ => {}
        }

        if status.is_server_error() {
            return RetryErrorType::ServerError(status.as_u16());
        }

        if status.is_client_error() {
            return RetryErrorType::ClientError(status.as_u16());
        }
    }

    if let Some(err) = err {
        if err.is_timeout() {
            return RetryErrorType::NetworkTimeout;
        }

        if err.is_connect() {
            return RetryErrorType::NetworkOffline;
        }
    }

    RetryErrorType::NetworkGeneric
}

fn append_user_and_range(
    buffer: &mut String,
    user_id: &str,
    date_range: Option<(NaiveDate, NaiveDate)>,
) {
    if !user_id.is_empty() {
        buffer.push_str(&format!(" ({user_id})"));
    }

    if let Some((start, end)) = date_range {
        buffer.push_str(&format!(" {start} to {end}"));
    }
}
