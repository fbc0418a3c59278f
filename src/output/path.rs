//! Deterministic result file naming
//!
//! Every manifest entry maps to exactly one file:
//! `{root}/user_{user_id}_events_{YYYYMMDD}_to_{YYYYMMDD}.json`, with the
//! user id percent-encoded so distinct ids never share a file.
//!
//! # Usage Example
//!
//! ```rust
//! use amplitude_events_downloader::output::OutputPathBuilder;
//! use chrono::NaiveDate;
//! use std::path::PathBuf;
//!
//! let path = OutputPathBuilder::new(PathBuf::from("userData/raw"), "alice")
//!     .with_range(
//!         NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!         NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
//!     )
//!     .build()
//!     .unwrap();
//! assert_eq!(
//!     path,
//!     PathBuf::from("userData/raw/user_alice_events_20240101_to_20240131.json")
//! );
//! ```

use super::{OutputError, OutputResult};
use crate::EntryKey;
use chrono::NaiveDate;
use std::path::PathBuf;

const FILE_PREFIX: &str = "user_";
const EVENTS_MARKER: &str = "_events_";
const RANGE_SEPARATOR: &str = "_to_";
const FILE_EXTENSION: &str = ".json";
const DATE_FORMAT: &str = "%Y%m%d";

/// Path builder for result files
pub struct OutputPathBuilder {
    root_dir: PathBuf,
    user_id: String,
    range: Option<(NaiveDate, NaiveDate)>,
}

impl OutputPathBuilder {
    /// Create a new path builder
    ///
    /// # Security
    ///
    /// The user id is percent-encoded (see [`encode_user_id`]) so it can never
    /// introduce a path separator.
    pub fn new(root_dir: PathBuf, user_id: &str) -> Self {
        Self {
            root_dir,
            user_id: encode_user_id(user_id),
            range: None,
        }
    }

    /// Builder for the file of `key`
    pub fn for_key(root_dir: PathBuf, key: &EntryKey) -> Self {
        Self::new(root_dir, &key.user_id).with_range(key.range_start, key.range_end)
    }

    /// Set the date range (required)
    pub fn with_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.range = Some((start, end));
        self
    }

    /// Build the complete file path
    pub fn build(&self) -> OutputResult<PathBuf> {
        let (start, end) = self.range.ok_or_else(|| {
            OutputError::ConfigurationError("date range required for result path".to_string())
        })?;
        if self.user_id.trim().is_empty() {
            return Err(OutputError::ConfigurationError(
                "user id required for result path".to_string(),
            ));
        }
        Ok(self.root_dir.join(file_name(&self.user_id, start, end)))
    }
}

/// File name of the result for `key`
pub fn result_file_name(key: &EntryKey) -> String {
    file_name(&encode_user_id(&key.user_id), key.range_start, key.range_end)
}

fn file_name(encoded_user: &str, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "{FILE_PREFIX}{encoded_user}{EVENTS_MARKER}{}{RANGE_SEPARATOR}{}{FILE_EXTENSION}",
        start.format(DATE_FORMAT),
        end.format(DATE_FORMAT)
    )
}

/// Recover the entry key from a result file name
///
/// Returns `None` for names that do not follow the result naming scheme,
/// including staging files and names with a broken escape.
pub fn parse_result_file_name(name: &str) -> Option<EntryKey> {
    let stem = name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_EXTENSION)?;

    // Dates have fixed width, so split from the right; user ids may contain the markers.
    let (rest, end) = stem.rsplit_once(RANGE_SEPARATOR)?;
    let (user, start) = rest.rsplit_once(EVENTS_MARKER)?;
    if user.is_empty() {
        return None;
    }

    let start = NaiveDate::parse_from_str(start, DATE_FORMAT).ok()?;
    let end = NaiveDate::parse_from_str(end, DATE_FORMAT).ok()?;
    Some(EntryKey::new(decode_user_id(user)?, start, end))
}

fn needs_escape(c: char) -> bool {
    matches!(c, '%' | '/' | '\\' | ':' | '<' | '>' | '"' | '|' | '?' | '*') || c.is_control()
}

/// Encode a user id for use inside a file name
///
/// Path separators, characters rejected by common filesystems, control
/// characters and `%` itself become `%XX` escapes of their UTF-8 bytes.
/// Everything else, case included, is kept, so the mapping is one-to-one and
/// [`decode_user_id`] reverses it. The fixed `user_` prefix keeps `.` and `..`
/// from ever forming a whole path component.
pub fn encode_user_id(user_id: &str) -> String {
    let mut encoded = String::with_capacity(user_id.len());
    for c in user_id.chars() {
        if needs_escape(c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        } else {
            encoded.push(c);
        }
    }
    encoded
}

/// Reverse [`encode_user_id`]
///
/// Returns `None` on a truncated or non-hex escape, or escapes that do not
/// decode to UTF-8.
pub fn decode_user_id(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}
