//! Progress tracking for long-running extraction runs.
//!
//! Calculates completion percentage and remaining time over manifest entries,
//! and decides when a progress line is worth logging.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_RUN_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_PERCENTAGE_STEP: f64 = 10.0;

/// Progress tracking state for one run.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Entries that reached a terminal state.
    pub entries_done: u64,
    /// Entries planned for the run.
    pub total_entries: u64,
    /// Events written so far.
    pub events_written: u64,
    /// When the run started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between time-based updates.
    pub update_interval: Duration,
    /// Last reported completion percentage (0-100).
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create a new progress tracker with default intervals.
    pub fn new(total_entries: u64) -> Self {
        let now = Instant::now();
        Self {
            entries_done: 0,
            total_entries,
            events_written: 0,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            last_reported_percentage: 0.0,
            min_percentage_step: DEFAULT_PERCENTAGE_STEP,
        }
    }

    /// Count one finished entry.
    pub fn record_entry(&mut self, events: u64) {
        self.entries_done = self.entries_done.saturating_add(1);
        self.events_written = self.events_written.saturating_add(events);
    }

    /// Whether a progress update should be emitted based on time or percentage.
    pub fn should_emit_update(&self) -> bool {
        if self.entries_done == 0 {
            return false;
        }

        if self.percentage() - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }

        self.start_time.elapsed() >= MIN_RUN_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress log to reset timers and cached percentage.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        self.last_reported_percentage = self.percentage();
    }

    /// Completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_entries == 0 {
            return 100.0;
        }
        (self.entries_done as f64 / self.total_entries as f64) * 100.0
    }

    /// Estimate remaining time from the average time per finished entry.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.entries_done == 0 {
            return None;
        }
        let remaining = self.total_entries.saturating_sub(self.entries_done);
        if remaining == 0 {
            return None;
        }
        let per_entry = self.start_time.elapsed().as_secs_f64() / self.entries_done as f64;
        Some(Duration::from_secs_f64(per_entry * remaining as f64))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![
            format!(
                "[PROGRESS] {}/{} entries",
                self.entries_done, self.total_entries
            ),
            format!("- {:.1}% complete", self.percentage()),
            format!("({} events)", self.events_written),
        ];

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
