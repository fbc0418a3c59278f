//! Amplitude export API configuration
//!
//! Endpoint location and response field names are configuration rather than
//! code, so a differently shaped deployment only needs different flags.

use std::fmt;
use std::time::Duration;

use crate::downloader::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::fetcher::retry::RetryPolicy;

/// Environment variable holding the project API key
pub const API_KEY_ENV: &str = "AMPLITUDE_API_KEY";

/// Environment variable holding the project secret key
pub const SECRET_KEY_ENV: &str = "AMPLITUDE_SECRET_KEY";

/// Template values shipped in the example `.env` file
const PLACEHOLDER_VALUES: [&str; 2] = ["your_api_key_here", "your_secret_key_here"];

/// Default API host
pub const DEFAULT_BASE_URL: &str = "https://amplitude.com";

/// Default export endpoint path
pub const DEFAULT_EXPORT_PATH: &str = "/api/2/export";

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A credential is missing, empty, or still the template placeholder
    #[error("missing credentials: {0} must be set to a real value")]
    MissingCredentials(&'static str),

    /// A configuration value is out of range or malformed
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Project credentials for HTTP basic auth
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    secret_key: String,
}

impl Credentials {
    /// Build validated credentials
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredentials`] for empty or placeholder values.
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into().trim().to_string();
        let secret_key = secret_key.into().trim().to_string();

        if !is_real_value(&api_key) {
            return Err(ConfigError::MissingCredentials(API_KEY_ENV));
        }
        if !is_real_value(&secret_key) {
            return Err(ConfigError::MissingCredentials(SECRET_KEY_ENV));
        }

        Ok(Self {
            api_key,
            secret_key,
        })
    }

    /// Username half of basic auth
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Password half of basic auth
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("secret_key", &"***")
            .finish()
    }
}

fn is_real_value(value: &str) -> bool {
    !value.is_empty() && !PLACEHOLDER_VALUES.contains(&value)
}

fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}***")
}

/// Vendor endpoint and response-shape configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AmplitudeConfig {
    /// Scheme and host, without trailing slash
    pub base_url: String,
    /// Export endpoint path, starting with `/`
    pub export_path: String,
    /// Response field holding the events array
    pub events_field: String,
    /// Response field holding the continuation token
    pub cursor_field: String,
    /// Query parameter carrying the continuation token
    pub cursor_param: String,
    /// Optional boolean response field marking the last page
    pub done_field: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Days subtracted from the range start when querying
    pub lookback_days: u32,
    /// Backoff policy for transient failures
    pub retry: RetryPolicy,
}

impl Default for AmplitudeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            export_path: DEFAULT_EXPORT_PATH.to_string(),
            events_field: "events".to_string(),
            cursor_field: "next_cursor".to_string(),
            cursor_param: "cursor".to_string(),
            done_field: "done".to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            lookback_days: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl AmplitudeConfig {
    /// Full export URL
    pub fn export_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.export_path
        )
    }

    /// Check that the configuration can produce a request
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "base URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if !self.export_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "export path must start with '/', got '{}'",
                self.export_path
            )));
        }
        for (name, value) in [
            ("events field", &self.events_field),
            ("cursor field", &self.cursor_field),
            ("cursor parameter", &self.cursor_param),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!("{name} cannot be empty")));
            }
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request timeout must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("at least one attempt is required".into()));
        }
        Ok(())
    }
}
