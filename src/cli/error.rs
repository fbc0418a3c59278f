//! CLI error types and conversions

use crate::downloader::DownloadError;
use crate::fetcher::amplitude_config::ConfigError;
use crate::fetcher::FetcherError;
use crate::manifest::ManifestError;
use crate::metrics::MetricsError;
use crate::output::OutputError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Manifest error
    #[error("{0}")]
    ManifestError(#[from] ManifestError),

    /// Download error
    #[error("download error: {0}")]
    DownloadError(#[from] DownloadError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Credentials or vendor configuration error
    #[error("{0}")]
    ConfigError(#[from] ConfigError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
