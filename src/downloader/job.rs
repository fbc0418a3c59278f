//! Entry lifecycle and run summary

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::{EntryKey, ManifestEntry};

/// Lifecycle state of one manifest entry
///
/// `Pending → Skipped`, or `Pending → Fetching → Aggregating → Writing → Done`.
/// `Fetching` and `Writing` may end in `Failed`; any state may end in `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum EntryState {
    /// Not started
    #[default]
    Pending,
    /// A published result already existed
    Skipped,
    /// Pages are being requested
    Fetching,
    /// Pages are being merged
    Aggregating,
    /// The result is being published
    Writing,
    /// Result published
    Done,
    /// Gave up on this entry; the run continues
    Failed,
    /// The run was halted while or because of this entry
    Aborted,
}

impl EntryState {
    /// Whether the entry will not change state again in this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Done | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Skipped => "skipped",
            Self::Fetching => "fetching",
            Self::Aggregating => "aggregating",
            Self::Writing => "writing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// How processing of one entry ended
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    /// Result published
    Done {
        /// Entry identity
        key: EntryKey,
        /// Events in the published result
        events: u64,
        /// Published file
        path: PathBuf,
    },
    /// Result already existed
    Skipped(EntryKey),
    /// Entry-level failure
    Failed {
        /// The entry
        entry: ManifestEntry,
        /// What went wrong
        cause: String,
    },
    /// Run-fatal failure raised by this entry
    Aborted {
        /// The entry
        entry: ManifestEntry,
        /// What went wrong
        cause: String,
    },
    /// Not started, or stopped at a page boundary, because the run was halting
    NotProcessed(ManifestEntry),
}

/// Outcome of a whole run
///
/// Built incrementally by the executor; read-only afterwards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Manifest items seen, valid or malformed
    pub total_entries: usize,
    /// Entries whose result was published in this run
    pub succeeded: Vec<EntryKey>,
    /// Entries that failed, with the cause
    pub failed: Vec<(ManifestEntry, String)>,
    /// Entries skipped because a result was already published
    pub skipped_already_done: Vec<EntryKey>,
    /// Malformed manifest lines: (line number, reason)
    pub malformed: Vec<(usize, String)>,
    /// Repeated manifest entries processed only once
    pub duplicates: usize,
    /// Entries left untouched for a later run
    pub not_processed: usize,
    /// Entry (if any) and cause that halted the run
    pub aborted: Option<(Option<ManifestEntry>, String)>,
    /// The run was stopped by an external shutdown request
    pub interrupted: bool,
    /// Events across all results published in this run
    pub events_written: u64,
}

impl RunSummary {
    /// Whether the run stopped early; drives the process exit status
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some() || self.interrupted
    }

    /// Fold one entry outcome into the summary
    pub fn record(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Done { key, events, .. } => {
                self.events_written += events;
                self.succeeded.push(key);
            }
            EntryOutcome::Skipped(key) => self.skipped_already_done.push(key),
            EntryOutcome::Failed { entry, cause } => self.failed.push((entry, cause)),
            EntryOutcome::Aborted { entry, cause } => {
                if self.aborted.is_none() {
                    self.aborted = Some((Some(entry), cause));
                } else {
                    // Only the first fatal error is reported; later ones leave
                    // their entry pending.
                    self.not_processed += 1;
                }
            }
            EntryOutcome::NotProcessed(_) => self.not_processed += 1,
        }
    }

    /// Items accounted for; equals `total_entries` once the run is over
    pub fn accounted(&self) -> usize {
        self.succeeded.len()
            + self.failed.len()
            + self.skipped_already_done.len()
            + self.malformed.len()
            + self.duplicates
            + self.not_processed
            + usize::from(matches!(self.aborted, Some((Some(_), _))))
    }

    /// Human-readable multi-line report
    pub fn format_report(&self) -> String {
        let mut lines = vec![
            "Extraction summary".to_string(),
            format!("  Manifest entries:   {}", self.total_entries),
            format!("  Succeeded:          {}", self.succeeded.len()),
            format!("  Already done:       {}", self.skipped_already_done.len()),
            format!("  Failed:             {}", self.failed.len()),
            format!("  Malformed lines:    {}", self.malformed.len()),
            format!("  Duplicate entries:  {}", self.duplicates),
            format!("  Not processed:      {}", self.not_processed),
            format!("  Events written:     {}", self.events_written),
        ];

        for (line, reason) in &self.malformed {
            lines.push(format!("  [MALFORMED] line {line}: {reason}"));
        }
        for (entry, cause) in &self.failed {
            lines.push(format!("  [FAILED] {entry}: {cause}"));
        }
        if let Some((entry, cause)) = &self.aborted {
            match entry {
                Some(entry) => lines.push(format!("  [ABORTED] at {entry}: {cause}")),
                None => lines.push(format!("  [ABORTED] {cause}")),
            }
        }
        if self.interrupted {
            lines.push("  [INTERRUPTED] shutdown requested; re-run to continue".to_string());
        }

        lines.join("\n")
    }
}
