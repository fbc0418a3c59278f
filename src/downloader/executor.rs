//! Extraction executor: drives every manifest entry through fetch, aggregate
//! and publish, with resumability and a bounded worker pool.

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::aggregator::aggregate;
use crate::downloader::config::DEFAULT_CONCURRENCY;
use crate::downloader::job::{EntryOutcome, EntryState, RunSummary};
use crate::downloader::progress::ProgressState;
use crate::downloader::DownloadError;
use crate::fetcher::pagination::{fetch_all_pages, PaginationLimits};
use crate::fetcher::{EventSource, FetcherError};
use crate::manifest::{ManifestError, ManifestReader};
use crate::metrics::EntryMetrics;
use crate::output::ResultStore;
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use crate::ManifestEntry;

/// Orchestrates a whole manifest run
pub struct ExtractionExecutor {
    source: Arc<dyn EventSource>,
    store: Arc<dyn ResultStore>,
    concurrency: usize,
    limits: PaginationLimits,
    force: bool,
    shutdown: Option<SharedShutdown>,
    progress_bar: Option<ProgressBar>,
}

impl ExtractionExecutor {
    /// Create an executor over a page source and a result store
    pub fn new(source: Arc<dyn EventSource>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            source,
            store,
            concurrency: DEFAULT_CONCURRENCY,
            limits: PaginationLimits::default(),
            force: false,
            shutdown: None,
            progress_bar: None,
        }
    }

    /// Number of entries processed at once (at least 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Override stall window and page ceiling
    pub fn with_pagination_limits(mut self, limits: PaginationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Re-fetch entries even when a result is already published
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Advance `bar` by one for every finished entry
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress_bar = Some(bar);
        self
    }

    /// Run every entry of the manifest at `path`
    ///
    /// # Errors
    /// Returns [`DownloadError::ManifestUnreadable`] if the manifest cannot be
    /// opened or read. Every other problem is reported in the [`RunSummary`].
    pub async fn run_manifest(&self, path: impl AsRef<Path>) -> Result<RunSummary, DownloadError> {
        let path = path.as_ref();
        info!(manifest = %path.display(), "Reading manifest");
        let reader = ManifestReader::open(path)
            .map_err(|e| DownloadError::ManifestUnreadable(e.to_string()))?;
        self.run_entries(reader).await
    }

    /// Run already-parsed manifest items
    ///
    /// The whole sequence is read before the first request so an unreadable
    /// manifest never leaves a half-started run.
    pub async fn run_entries<I>(&self, items: I) -> Result<RunSummary, DownloadError>
    where
        I: IntoIterator<Item = Result<ManifestEntry, ManifestError>>,
    {
        let mut summary = RunSummary::default();
        let mut seen = HashSet::new();
        let mut planned = Vec::new();

        for item in items {
            summary.total_entries += 1;
            match item {
                Ok(entry) => {
                    if seen.insert(entry.key()) {
                        planned.push(entry);
                    } else {
                        debug!(entry = %entry, "Duplicate manifest entry, processing once");
                        summary.duplicates += 1;
                    }
                }
                Err(ManifestError::MalformedEntry { line, reason }) => {
                    warn!(line, reason = %reason, "Skipping malformed manifest line");
                    summary.malformed.push((line, reason));
                }
                Err(e @ ManifestError::Unreadable { .. }) => {
                    return Err(DownloadError::ManifestUnreadable(e.to_string()));
                }
            }
        }

        info!(
            entries = planned.len(),
            malformed = summary.malformed.len(),
            duplicates = summary.duplicates,
            concurrency = self.concurrency,
            "Starting extraction run"
        );

        if let Some(bar) = &self.progress_bar {
            bar.set_length(planned.len() as u64);
        }

        // Run-scoped token: carries the abort without cancelling the caller.
        let run_token = match &self.shutdown {
            Some(parent) => parent.child(),
            None => ShutdownCoordinator::shared(),
        };

        let mut progress = ProgressState::new(planned.len() as u64);
        let mut outcomes = stream::iter(planned)
            .map(|entry| {
                let token = Arc::clone(&run_token);
                async move { self.process_entry(entry, &token).await }
            })
            .buffer_unordered(self.concurrency);

        while let Some(outcome) = outcomes.next().await {
            let events = match &outcome {
                EntryOutcome::Done { events, .. } => *events,
                _ => 0,
            };
            progress.record_entry(events);
            summary.record(outcome);

            if let Some(bar) = &self.progress_bar {
                bar.inc(1);
                bar.set_message(format!("{} events", summary.events_written));
            } else if progress.should_emit_update() {
                info!("{}", progress.format_progress());
                progress.mark_emitted();
            }
        }

        summary.interrupted = self
            .shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested());

        if let Some(bar) = &self.progress_bar {
            bar.finish_and_clear();
        }

        if let Some((entry, cause)) = &summary.aborted {
            error!(
                entry = ?entry.as_ref().map(ToString::to_string),
                cause = %cause,
                not_processed = summary.not_processed,
                "Run aborted"
            );
        } else if summary.interrupted {
            warn!(
                not_processed = summary.not_processed,
                "Run interrupted by shutdown request"
            );
        }

        info!(
            succeeded = summary.succeeded.len(),
            skipped = summary.skipped_already_done.len(),
            failed = summary.failed.len(),
            malformed = summary.malformed.len(),
            events = summary.events_written,
            "Extraction run finished"
        );

        Ok(summary)
    }

    async fn process_entry(&self, entry: ManifestEntry, token: &ShutdownCoordinator) -> EntryOutcome {
        if token.is_shutdown_requested() {
            return EntryOutcome::NotProcessed(entry);
        }

        let span = info_span!(
            "entry",
            user_id = %entry.user_id,
            start = %entry.range_start,
            end = %entry.range_end
        );
        self.run_entry(entry, token).instrument(span).await
    }

    async fn run_entry(&self, entry: ManifestEntry, token: &ShutdownCoordinator) -> EntryOutcome {
        let key = entry.key();
        let metrics = EntryMetrics::start(&entry.user_id);

        if !self.force && self.store.exists(&key) {
            info!(state = %EntryState::Skipped, "Result already published");
            metrics.record_skipped();
            return EntryOutcome::Skipped(key);
        }

        debug!(state = %EntryState::Fetching, "Fetching pages");
        let pages = match fetch_all_pages(self.source.as_ref(), &entry, self.limits, Some(token)).await
        {
            Ok(pages) => pages,
            Err(FetcherError::Cancelled) => {
                info!(state = %EntryState::Aborted, "Stopped before completion, nothing published");
                return EntryOutcome::NotProcessed(entry);
            }
            Err(e) if e.is_run_fatal() => {
                error!(state = %EntryState::Aborted, error = %e, "Run-fatal error");
                token.request_shutdown();
                return EntryOutcome::Aborted {
                    entry,
                    cause: e.to_string(),
                };
            }
            Err(e) => {
                warn!(state = %EntryState::Failed, error = %e, "Entry failed");
                metrics.record_failure(&e.to_string());
                return EntryOutcome::Failed {
                    entry,
                    cause: e.to_string(),
                };
            }
        };

        debug!(state = %EntryState::Aggregating, pages = pages.len(), "Aggregating pages");
        let result = aggregate(&entry, pages);
        let events = result.events.len() as u64;
        let page_count = result.page_count;

        if token.is_shutdown_requested() {
            info!(state = %EntryState::Aborted, "Run halting, result not published");
            return EntryOutcome::NotProcessed(entry);
        }

        debug!(state = %EntryState::Writing, events, "Publishing result");
        let store = Arc::clone(&self.store);
        let written = tokio::task::spawn_blocking(move || store.write(&result)).await;

        match written {
            Ok(Ok(path)) => {
                info!(state = %EntryState::Done, events, path = %path.display(), "Entry done");
                metrics.record_success(events, page_count);
                EntryOutcome::Done { key, events, path }
            }
            Ok(Err(e)) => {
                warn!(state = %EntryState::Failed, error = %e, "Failed to publish result");
                metrics.record_failure(&e.to_string());
                EntryOutcome::Failed {
                    entry,
                    cause: format!("output error: {e}"),
                }
            }
            Err(e) => {
                warn!(state = %EntryState::Failed, error = %e, "Writer task failed");
                metrics.record_failure(&e.to_string());
                EntryOutcome::Failed {
                    entry,
                    cause: format!("write task failed: {e}"),
                }
            }
        }
    }
}
