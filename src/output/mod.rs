//! Result writers

use crate::{AggregatedResult, EntryKey};
use std::path::PathBuf;

pub mod json;
pub mod path;

pub use json::JsonResultWriter;
pub use path::{
    decode_user_id, encode_user_id, parse_result_file_name, result_file_name, OutputPathBuilder,
};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Output location is unusable
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Durable store of published results
///
/// A result is either fully published or absent; [`ResultStore::exists`]
/// never reports a partially written result.
pub trait ResultStore: Send + Sync {
    /// Whether a completed result for `key` is already published
    fn exists(&self, key: &EntryKey) -> bool;

    /// Publish `result`, replacing any earlier result for the same key
    ///
    /// Returns the location of the published artifact.
    fn write(&self, result: &AggregatedResult) -> OutputResult<PathBuf>;
}
