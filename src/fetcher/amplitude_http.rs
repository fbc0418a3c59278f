//! Amplitude export API HTTP client
//!
//! Provides the production [`EventSource`]:
//! - HTTP basic auth with the project credentials
//! - Rate limit permit before every attempt
//! - Retry of transient failures through [`RetryPolicy::decide`](crate::fetcher::retry::RetryPolicy::decide)
//! - Backoff sleeps that end early on shutdown

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::downloader::config::CONNECT_TIMEOUT_SECS;
use crate::downloader::rate_limit::Throttle;
use crate::fetcher::amplitude_config::{AmplitudeConfig, ConfigError, Credentials};
use crate::fetcher::amplitude_parser::{AmplitudeParser, ResponseShape};
use crate::fetcher::retry::{extract_error_type, RetryContext, RetryDecision, RetryErrorType};
use crate::fetcher::{EventSource, FetcherError, FetcherResult, PageRequest};
use crate::metrics::{record_retry_backoff, HttpRequestMetrics};
use crate::shutdown::SharedShutdown;
use crate::RawPage;

/// Longest slice of an error body kept in messages
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Outcome of a single failed attempt
enum AttemptError {
    /// Stop immediately, no retry
    Fatal(FetcherError),
    /// Candidate for retry
    Transient(RetryErrorType, String),
}

/// HTTP client for the export endpoint
pub struct AmplitudeHttpClient {
    client: Client,
    config: AmplitudeConfig,
    shape: ResponseShape,
    credentials: Credentials,
    throttle: Arc<dyn Throttle>,
    shutdown: Option<SharedShutdown>,
}

impl AmplitudeHttpClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `config` - Endpoint, response shape, timeout and retry policy
    /// * `credentials` - Basic auth credentials
    /// * `throttle` - Shared rate limiter; every attempt takes one permit
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(
        config: AmplitudeConfig,
        credentials: Credentials,
        throttle: Arc<dyn Throttle>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            shape: ResponseShape::from(&config),
            config,
            credentials,
            throttle,
            shutdown: None,
        })
    }

    /// Make backoff sleeps and new attempts observe `shutdown`
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &AmplitudeConfig {
        &self.config
    }

    /// Query parameters for one call
    ///
    /// The day range is inclusive, so the end hour is `T23`. The start moves back
    /// by `lookback_days` to catch events recorded late in the vendor's timezone.
    pub fn build_query(&self, request: &PageRequest) -> Vec<(String, String)> {
        let start = shift_back(request.range_start, self.config.lookback_days);

        let mut query = vec![
            ("user_id".to_string(), request.user_id.clone()),
            ("start".to_string(), format!("{}T00", start.format("%Y%m%d"))),
            (
                "end".to_string(),
                format!("{}T23", request.range_end.format("%Y%m%d")),
            ),
        ];
        if let Some(cursor) = &request.cursor {
            query.push((self.config.cursor_param.clone(), cursor.clone()));
        }
        query
    }

    async fn attempt(
        &self,
        url: &str,
        query: &[(String, String)],
        request: &PageRequest,
        attempt: u32,
    ) -> Result<RawPage, AttemptError> {
        let metrics = HttpRequestMetrics::start(self.config.export_path.clone(), attempt);

        let response = match self
            .client
            .get(url)
            .basic_auth(self.credentials.api_key(), Some(self.credentials.secret_key()))
            .query(query)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                metrics.record_network_error();
                return Err(AttemptError::Transient(
                    extract_error_type(None, Some(&e)),
                    e.to_string(),
                ));
            }
        };

        let status = response.status();
        metrics.record_complete(status.as_u16());

        if status.is_success() {
            let body = response.text().await.map_err(|e| {
                AttemptError::Transient(extract_error_type(None, Some(&e)), e.to_string())
            })?;
            debug!(
                correlation_id = %metrics.correlation_id(),
                bytes = body.len(),
                "received export page"
            );
            return AmplitudeParser::parse_page(&body, &request.user_id, &self.shape)
                .map_err(AttemptError::Fatal);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status, truncate(&body));

        match extract_error_type(Some(status), None) {
            RetryErrorType::AuthFailed(code) => Err(AttemptError::Fatal(FetcherError::Auth {
                status: code,
                message,
            })),
            RetryErrorType::NotFound => {
                Err(AttemptError::Fatal(FetcherError::NotFound { message }))
            }
            RetryErrorType::ClientError(_) => Err(AttemptError::Fatal(FetcherError::FetchFailed {
                user_id: request.user_id.clone(),
                cause: message,
            })),
            kind => Err(AttemptError::Transient(kind, message)),
        }
    }

    /// Sleep for `delay`, returning `Cancelled` if shutdown arrives first
    async fn backoff(&self, delay: Duration) -> FetcherResult<()> {
        match &self.shutdown {
            Some(shutdown) => tokio::select! {
                _ = tokio::time::sleep(delay) => Ok(()),
                _ = shutdown.wait_for_shutdown() => Err(FetcherError::Cancelled),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn context(
        &self,
        request: &PageRequest,
        attempt: u32,
        kind: RetryErrorType,
        backoff: Duration,
        message: &str,
        url: &str,
    ) -> RetryContext {
        RetryContext {
            attempt,
            max_attempts: self.config.retry.max_attempts,
            error_type: kind,
            backoff_duration: backoff,
            user_id: request.user_id.clone(),
            date_range: Some((request.range_start, request.range_end)),
            error_message: message.to_string(),
            endpoint: url.to_string(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
    }
}

#[async_trait]
impl EventSource for AmplitudeHttpClient {
    async fn fetch_page(&self, request: &PageRequest) -> FetcherResult<RawPage> {
        let url = self.config.export_url();
        let query = self.build_query(request);
        let policy = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if self.is_cancelled() {
                return Err(FetcherError::Cancelled);
            }

            self.throttle.acquire().await;

            let (kind, message) = match self.attempt(&url, &query, request, attempt).await {
                Ok(page) => {
                    if attempt > 1 {
                        let ctx = self.context(
                            request,
                            attempt,
                            RetryErrorType::NetworkGeneric,
                            Duration::ZERO,
                            "",
                            &url,
                        );
                        info!("{}", ctx.format_success());
                    }
                    return Ok(page);
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Transient(kind, message)) => (kind, message),
            };

            match policy.decide(attempt, kind, rand::random::<f64>()) {
                RetryDecision::RetryAfter(delay) => {
                    let ctx = self.context(request, attempt, kind, delay, &message, &url);
                    warn!(user_id = %request.user_id, error = %message, "{}", ctx.format_retry());
                    record_retry_backoff(delay, attempt);
                    self.backoff(delay).await?;
                }
                RetryDecision::GiveUp => {
                    let ctx = self.context(request, attempt, kind, Duration::ZERO, &message, &url);
                    warn!("{}", ctx.format_failure());
                    return Err(FetcherError::FetchFailed {
                        user_id: request.user_id.clone(),
                        cause: message,
                    });
                }
            }
        }
    }
}

fn shift_back(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(date)
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{head}...")
    }
}
