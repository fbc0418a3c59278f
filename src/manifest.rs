//! Manifest parsing and validation
//!
//! A manifest is a UTF-8 text file with one extraction request per line:
//! `user_id|start_date|end_date`. Blank lines and `#` comments are ignored.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

/// Field separator used in manifest lines
pub const FIELD_SEPARATOR: char = '|';

/// Comment marker for manifest lines
pub const COMMENT_PREFIX: char = '#';

/// Date-only formats accepted in manifest date fields
const DATE_FORMATS: [&str; 3] = ["%B %d, %Y", "%b %d, %Y", "%Y-%m-%d"];

/// Detailed format produced by the analytics UI export, e.g.
/// `June 11, 2025 1:32:45.275 PM GMT+2`
const DETAILED_DATETIME_FORMAT: &str = "%B %d, %Y %I:%M:%S%.f %p";

/// Identity of one unit of extraction work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    /// Vendor-opaque user identifier
    pub user_id: String,
    /// First day of the range (inclusive)
    pub range_start: NaiveDate,
    /// Last day of the range (inclusive)
    pub range_end: NaiveDate,
}

impl EntryKey {
    /// Create a key from its three components
    pub fn new(user_id: impl Into<String>, range_start: NaiveDate, range_end: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            range_start,
            range_end,
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} to {}]",
            self.user_id, self.range_start, self.range_end
        )
    }
}

/// One validated manifest line
///
/// # Examples
///
/// ```
/// use amplitude_events_downloader::manifest::ManifestEntry;
///
/// let entry = ManifestEntry::parse_line("alice|January 1, 2024|January 31, 2024", 1).unwrap();
/// assert_eq!(entry.user_id, "alice");
/// assert_eq!(entry.range_start.to_string(), "2024-01-01");
/// assert_eq!(entry.range_end.to_string(), "2024-01-31");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Vendor-opaque user identifier (non-empty)
    pub user_id: String,
    /// First day of the range (inclusive)
    pub range_start: NaiveDate,
    /// Last day of the range (inclusive, >= `range_start`)
    pub range_end: NaiveDate,
    /// 1-based line number in the manifest; 0 when built programmatically
    #[serde(default)]
    pub line: usize,
}

impl ManifestEntry {
    /// Build a validated entry
    pub fn new(
        user_id: impl Into<String>,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<Self, ManifestError> {
        let entry = Self {
            user_id: user_id.into(),
            range_start,
            range_end,
            line: 0,
        };
        entry.validate().map_err(|reason| ManifestError::MalformedEntry { line: 0, reason })?;
        Ok(entry)
    }

    /// Parse one non-comment manifest line
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::MalformedEntry`] tagged with `line` when the line
    /// does not have exactly three fields, a date is unparseable, the user id is
    /// empty, or the range is inverted.
    pub fn parse_line(raw: &str, line: usize) -> Result<Self, ManifestError> {
        let malformed = |reason: String| ManifestError::MalformedEntry { line, reason };

        let parts: Vec<&str> = raw.split(FIELD_SEPARATOR).map(str::trim).collect();
        if parts.len() != 3 {
            return Err(malformed(format!(
                "expected user_id|start_date|end_date, found {} field(s)",
                parts.len()
            )));
        }

        let range_start = parse_manifest_date(parts[1])
            .ok_or_else(|| malformed(format!("invalid start date '{}'", parts[1])))?;
        let range_end = parse_manifest_date(parts[2])
            .ok_or_else(|| malformed(format!("invalid end date '{}'", parts[2])))?;

        let entry = Self {
            user_id: parts[0].to_string(),
            range_start,
            range_end,
            line,
        };
        entry.validate().map_err(malformed)?;
        Ok(entry)
    }

    /// Validate entry invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.user_id.is_empty() {
            return Err("user id cannot be empty".to_string());
        }

        if self.range_start > self.range_end {
            return Err(format!(
                "start date ({}) must not be after end date ({})",
                self.range_start, self.range_end
            ));
        }

        Ok(())
    }

    /// Identity used for resumability and duplicate detection
    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.user_id.clone(), self.range_start, self.range_end)
    }
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "line {}: {}", self.line, self.key())
        } else {
            write!(f, "{}", self.key())
        }
    }
}

/// Parse a manifest date field
///
/// Accepts `January 5, 2024`, `Jan 5, 2024`, `2024-01-05` and the detailed
/// `June 11, 2025 1:32:45.275 PM GMT+2` form, whose time of day and offset are
/// discarded.
pub fn parse_manifest_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return Some(date);
        }
    }

    let without_offset = match input.find(" GMT") {
        Some(idx) => &input[..idx],
        None => input,
    };
    NaiveDateTime::parse_from_str(without_offset.trim(), DETAILED_DATETIME_FORMAT)
        .ok()
        .map(|dt| dt.date())
}

/// Lazy reader over manifest lines
///
/// Yields one item per non-blank, non-comment line. Malformed lines surface as
/// [`ManifestError::MalformedEntry`] items and iteration continues. The reader
/// is consumed by iteration; open it again to re-read.
pub struct ManifestReader<R> {
    lines: Lines<R>,
    line_number: usize,
    source: String,
    finished: bool,
}

impl ManifestReader<BufReader<File>> {
    /// Open a manifest file
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Unreadable`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ManifestError::Unreadable {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::with_source_name(
            BufReader::new(file),
            path.display().to_string(),
        ))
    }
}

impl<R: BufRead> ManifestReader<R> {
    /// Read a manifest from any buffered source
    pub fn from_reader(reader: R) -> Self {
        Self::with_source_name(reader, "<memory>")
    }

    fn with_source_name(reader: R, source: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            source: source.into(),
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for ManifestReader<R> {
    type Item = Result<ManifestEntry, ManifestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(ManifestError::Unreadable {
                        source_name: self.source.clone(),
                        reason: format!("read failed after line {}: {e}", self.line_number),
                    }));
                }
            };
            self.line_number += 1;

            let trimmed = raw.trim().trim_start_matches('\u{feff}');
            if trimmed.is_empty() || trimmed.starts_with(COMMENT_PREFIX) {
                continue;
            }

            return Some(ManifestEntry::parse_line(trimmed, self.line_number));
        }
    }
}

/// Errors that can occur while reading a manifest
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    /// The manifest source could not be opened or read
    #[error("manifest unreadable: {source_name}: {reason}")]
    Unreadable {
        /// Path or description of the source
        source_name: String,
        /// Underlying cause
        reason: String,
    },

    /// A single line could not be parsed
    #[error("malformed manifest entry at line {line}: {reason}")]
    MalformedEntry {
        /// 1-based line number
        line: usize,
        /// What was wrong with the line
        reason: String,
    },
}
