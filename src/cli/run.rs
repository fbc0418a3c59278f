//! Run command: the full extraction pipeline

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{CliError, OutputFormat};
use crate::downloader::config::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_PAGES, DEFAULT_MAX_REQUESTS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_STALL_WINDOW, DEFAULT_WINDOW_SECS, MAX_RETRIES,
};
use crate::downloader::{ExtractionExecutor, RateLimiter, RunSummary};
use crate::fetcher::amplitude_config::{
    AmplitudeConfig, Credentials, API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_EXPORT_PATH,
    SECRET_KEY_ENV,
};
use crate::fetcher::amplitude_http::AmplitudeHttpClient;
use crate::fetcher::pagination::PaginationLimits;
use crate::fetcher::retry::RetryPolicy;
use crate::output::{JsonResultWriter, OutputError};
use crate::shutdown::SharedShutdown;

/// Maximum allowed concurrency to prevent self-inflicted rate limiting
const MAX_CONCURRENCY: usize = 32;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

fn parse_max_requests(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("max requests must be at least 1".to_string()),
        Ok(value) => Ok(value),
        Err(_) => Err(format!("'{s}' is not a valid number")),
    }
}

/// Arguments of the `run` command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Manifest file: one `user_id|start|end` entry per line
    #[arg(long)]
    pub manifest: PathBuf,

    /// Directory receiving one JSON file per entry
    #[arg(long, default_value = "userData/raw")]
    pub output_dir: PathBuf,

    /// Entries processed at once (max: 32)
    ///
    /// All entries share one rate limiter, so raising this only helps when
    /// the request budget is not already the bottleneck.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Requests allowed per rate-limit window
    #[arg(long, default_value_t = DEFAULT_MAX_REQUESTS, value_parser = parse_max_requests)]
    pub max_requests: usize,

    /// Length of the rate-limit window in seconds
    #[arg(long, default_value_t = DEFAULT_WINDOW_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub window_secs: u64,

    /// Retries of a transient failure before the entry fails (range: 0-20)
    #[arg(long, default_value_t = MAX_RETRIES, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: u32,

    /// Recent cursors a new cursor is compared against to detect a loop
    #[arg(long, default_value_t = DEFAULT_STALL_WINDOW)]
    pub stall_window: usize,

    /// Maximum pages fetched for one entry
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
    pub max_pages: usize,

    /// Days to move each range start back when querying
    #[arg(long, default_value_t = 0)]
    pub lookback_days: u32,

    /// Re-fetch entries whose result is already published
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Vendor base URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Export endpoint path, appended to the base URL
    #[arg(long, default_value = DEFAULT_EXPORT_PATH)]
    pub export_path: String,

    /// Response field holding the events array
    #[arg(long, default_value = "events")]
    pub events_field: String,

    /// Response field holding the continuation cursor
    #[arg(long, default_value = "next_cursor")]
    pub cursor_field: String,

    /// Query parameter carrying the continuation cursor
    #[arg(long, default_value = "cursor")]
    pub cursor_param: String,

    /// Optional boolean response field marking the last page
    #[arg(long, default_value = "done")]
    pub done_field: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// Project API key
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Project secret key
    #[arg(long, env = SECRET_KEY_ENV, hide_env_values = true)]
    pub secret_key: Option<String>,
}

impl RunArgs {
    /// Vendor configuration from the flags
    pub fn amplitude_config(&self) -> AmplitudeConfig {
        AmplitudeConfig {
            base_url: self.base_url.clone(),
            export_path: self.export_path.clone(),
            events_field: self.events_field.clone(),
            cursor_field: self.cursor_field.clone(),
            cursor_param: self.cursor_param.clone(),
            done_field: self.done_field.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            lookback_days: self.lookback_days,
            retry: RetryPolicy::with_max_retries(self.max_retries),
            ..AmplitudeConfig::default()
        }
    }

    /// Pagination bounds from the flags
    pub fn pagination_limits(&self) -> PaginationLimits {
        PaginationLimits {
            stall_window: self.stall_window,
            max_pages: self.max_pages,
        }
    }

    /// Execute the run and print its summary
    ///
    /// Returns the summary so the caller can derive the exit status.
    ///
    /// # Errors
    /// Missing credentials, invalid configuration, an unusable output directory
    /// or an unreadable manifest. Entry failures are not errors.
    pub async fn execute(
        &self,
        output_format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<RunSummary, CliError> {
        if self.stall_window == 0 {
            return Err(CliError::InvalidArgument(
                "stall window must be at least 1".to_string(),
            ));
        }
        if self.max_pages == 0 {
            return Err(CliError::InvalidArgument(
                "max pages must be at least 1".to_string(),
            ));
        }

        let credentials = Credentials::new(
            self.api_key.clone().unwrap_or_default(),
            self.secret_key.clone().unwrap_or_default(),
        )?;

        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr)?;
            info!(%addr, "Prometheus metrics exporter listening");
        }

        let limiter = Arc::new(RateLimiter::new(
            self.max_requests,
            Duration::from_secs(self.window_secs),
        ));
        let client = AmplitudeHttpClient::new(self.amplitude_config(), credentials, limiter)?
            .with_shutdown(Arc::clone(&shutdown));
        let writer = JsonResultWriter::new(&self.output_dir)?;

        info!(
            manifest = %self.manifest.display(),
            output_dir = %self.output_dir.display(),
            concurrency = self.concurrency,
            max_requests = self.max_requests,
            window_secs = self.window_secs,
            "Configured extraction run"
        );

        let mut executor = ExtractionExecutor::new(Arc::new(client), Arc::new(writer))
            .with_concurrency(self.concurrency)
            .with_pagination_limits(self.pagination_limits())
            .with_force(self.force)
            .with_shutdown(shutdown);

        if output_format == OutputFormat::Human {
            executor = executor.with_progress_bar(create_progress_bar());
        }

        let summary = executor.run_manifest(&self.manifest).await?;

        match output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&summary)
                    .map_err(|e| OutputError::SerializationError(e.to_string()))?;
                println!("{json}");
            }
            OutputFormat::Human => {
                println!("\n{}", summary.format_report());
                if summary.is_aborted() {
                    eprintln!("\nRun stopped early; re-run the same manifest to continue.");
                }
            }
        }

        Ok(summary)
    }
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} entries ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
