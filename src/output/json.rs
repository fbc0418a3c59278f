//! Atomic JSON result writer
//!
//! Each result is written to a `.staging-*` file in the output directory,
//! flushed and fsynced, then renamed over the final name. Readers therefore see
//! either no file or a complete one. Staging files left by a crash are removed
//! when the writer is created.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::path::{parse_result_file_name, OutputPathBuilder};
use super::{OutputError, OutputResult, ResultStore};
use crate::{AggregatedResult, EntryKey};

/// Prefix of in-progress files; never matches a result file name
pub const STAGING_PREFIX: &str = ".staging-";

/// Writes one pretty-printed JSON file per manifest entry
#[derive(Debug, Clone)]
pub struct JsonResultWriter {
    root: PathBuf,
}

impl JsonResultWriter {
    /// Create a writer rooted at `root`, creating the directory if needed
    ///
    /// # Errors
    /// Returns [`OutputError::IoError`] if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> OutputResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            OutputError::IoError(format!(
                "Failed to create output directory {}: {e}",
                root.display()
            ))
        })?;

        let removed = sweep_staging_files(&root);
        if removed > 0 {
            warn!(
                dir = %root.display(),
                removed,
                "Removed staging files left by an interrupted run"
            );
        }

        Ok(Self { root })
    }

    /// Keys of every result published under `root`
    ///
    /// Read-only: unlike [`JsonResultWriter::new`] this neither creates the
    /// directory nor sweeps staging files, so it is safe next to a live run.
    /// A missing directory yields an empty set.
    pub fn published_keys(root: &Path) -> OutputResult<HashSet<EntryKey>> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => {
                return Err(OutputError::IoError(format!(
                    "Failed to list {}: {e}",
                    root.display()
                )))
            }
        };

        let mut keys = HashSet::new();
        for entry in entries.flatten() {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(key) = entry.file_name().to_str().and_then(parse_result_file_name) {
                keys.insert(key);
            }
        }
        Ok(keys)
    }

    /// Output directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of the result for `key`
    pub fn path_for(&self, key: &EntryKey) -> OutputResult<PathBuf> {
        OutputPathBuilder::for_key(self.root.clone(), key).build()
    }

    /// Load a published result
    pub fn read(&self, key: &EntryKey) -> OutputResult<AggregatedResult> {
        let path = self.path_for(key)?;
        let bytes = fs::read(&path)
            .map_err(|e| OutputError::IoError(format!("Failed to read {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            OutputError::SerializationError(format!("Failed to parse {}: {e}", path.display()))
        })
    }
}

impl ResultStore for JsonResultWriter {
    fn exists(&self, key: &EntryKey) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn write(&self, result: &AggregatedResult) -> OutputResult<PathBuf> {
        let path = self.path_for(&result.key())?;

        let json = serde_json::to_vec_pretty(result)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;

        let mut staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.root)
            .map_err(|e| OutputError::IoError(format!("Failed to create staging file: {e}")))?;

        staging
            .write_all(&json)
            .map_err(|e| OutputError::IoError(format!("Failed to write staging file: {e}")))?;
        staging
            .flush()
            .map_err(|e| OutputError::IoError(format!("Failed to flush staging file: {e}")))?;
        staging
            .as_file()
            .sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync staging file: {e}")))?;

        // Dropping the staging handle on any error above deletes it.
        staging.persist(&path).map_err(|e| {
            OutputError::IoError(format!("Failed to publish {}: {}", path.display(), e.error))
        })?;

        sync_dir(&self.root);

        debug!(
            path = %path.display(),
            events = result.events.len(),
            bytes = json.len(),
            "Published result"
        );
        Ok(path)
    }
}

/// Fsync the directory so the rename itself is durable
fn sync_dir(dir: &Path) {
    if cfg!(unix) {
        if let Ok(handle) = fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}

fn sweep_staging_files(root: &Path) -> usize {
    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(STAGING_PREFIX))
        })
        .filter(|entry| fs::remove_file(entry.path()).is_ok())
        .count()
}
