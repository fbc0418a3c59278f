//! Page merging and event deduplication
//!
//! Pages are concatenated in the order they were received. Vendors re-deliver
//! events across page boundaries, so each event is reduced to a [`DedupKey`] and
//! only its first occurrence is kept.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::{AggregatedResult, Event, ManifestEntry, RawPage};

/// Identity of an event for duplicate detection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Vendor-assigned identity
    Vendor {
        /// Vendor event id
        event_id: String,
        /// Event time
        timestamp: DateTime<Utc>,
        /// Event name
        event_type: String,
    },
    /// Fallback when the vendor supplies no event id
    Composite {
        /// Owning user
        user_id: String,
        /// Event name
        event_type: String,
        /// Event time
        timestamp: DateTime<Utc>,
        /// Canonical serialization of the event properties
        properties: String,
    },
}

impl DedupKey {
    /// Key for `event`
    ///
    /// The vendor id is used exclusively when present; two events sharing it
    /// but differing in properties are still duplicates.
    pub fn of(event: &Event) -> Self {
        match &event.event_id {
            Some(event_id) => Self::Vendor {
                event_id: event_id.clone(),
                timestamp: event.timestamp,
                event_type: event.event_type.clone(),
            },
            None => Self::Composite {
                user_id: event.user_id.clone(),
                event_type: event.event_type.clone(),
                timestamp: event.timestamp,
                properties: canonical_json(&event.properties),
            },
        }
    }
}

/// Serialize properties with keys in sorted order at every depth
fn canonical_json(properties: &Map<String, Value>) -> String {
    // serde_json's default Map is a BTreeMap, so key order is already sorted.
    serde_json::to_string(properties).unwrap_or_default()
}

/// Incremental merger for one manifest entry
pub struct Aggregator {
    entry: ManifestEntry,
    seen: HashSet<DedupKey>,
    events: Vec<Event>,
    page_count: usize,
    duplicates: usize,
}

impl Aggregator {
    /// Start aggregating for `entry`
    pub fn new(entry: &ManifestEntry) -> Self {
        Self {
            entry: entry.clone(),
            seen: HashSet::new(),
            events: Vec::new(),
            page_count: 0,
            duplicates: 0,
        }
    }

    /// Append one page, dropping events already seen
    pub fn push_page(&mut self, page: RawPage) {
        self.page_count += 1;
        for event in page.events {
            if self.seen.insert(DedupKey::of(&event)) {
                self.events.push(event);
            } else {
                self.duplicates += 1;
            }
        }
    }

    /// Events kept so far
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no event has been kept yet
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Finish and produce the result
    pub fn finish(self) -> AggregatedResult {
        let result = AggregatedResult {
            user_id: self.entry.user_id,
            range_start: self.entry.range_start,
            range_end: self.entry.range_end,
            events: self.events,
            fetched_at: Utc::now(),
            page_count: self.page_count,
            duplicates_dropped: self.duplicates,
        };

        if result.is_empty() {
            info!(
                user_id = %result.user_id,
                pages = result.page_count,
                "No events in range"
            );
        } else {
            debug!(
                user_id = %result.user_id,
                events = result.events.len(),
                pages = result.page_count,
                duplicates = result.duplicates_dropped,
                "Aggregated pages"
            );
        }

        result
    }
}

/// Merge `pages` of `entry` into one result
pub fn aggregate(entry: &ManifestEntry, pages: impl IntoIterator<Item = RawPage>) -> AggregatedResult {
    let mut aggregator = Aggregator::new(entry);
    for page in pages {
        aggregator.push_page(page);
    }
    aggregator.finish()
}
