//! # Snapshot History
//!
//! Per-client ring of recently sent snapshots, used as delta bases once the
//! client acknowledges a tick.
//!
//! ```text
//! purge_until(t)           add(tick)
//!      │                       │
//!      ▼                       ▼
//!  [t-3] [t-2] [t-1] [t] ... [newest]      ticks strictly increasing
//! ```

use std::collections::VecDeque;
use std::time::Instant;

/// One stored snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Tick the snapshot was taken at.
    pub tick: i32,
    /// Wall time the snapshot was taken at, for latency measurement.
    pub tag_time: Instant,
    /// Serialized snapshot bytes.
    pub data: Vec<u8>,
}

impl HistoryEntry {
    /// Size of the serialized snapshot.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Snapshots ordered by tick.
#[derive(Clone, Debug, Default)]
pub struct SnapshotHistory {
    entries: VecDeque<HistoryEntry>,
}

impl SnapshotHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(160),
        }
    }

    /// Appends a snapshot.
    ///
    /// Returns false, storing nothing, unless `tick` is newer than every entry.
    pub fn add(&mut self, tick: i32, tag_time: Instant, data: Vec<u8>) -> bool {
        if self.entries.back().is_some_and(|last| last.tick >= tick) {
            return false;
        }
        self.entries.push_back(HistoryEntry { tick, tag_time, data });
        true
    }

    /// Looks up the snapshot of exactly `tick`.
    #[must_use]
    pub fn get(&self, tick: i32) -> Option<&HistoryEntry> {
        self.entries
            .binary_search_by_key(&tick, |entry| entry.tick)
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Removes every entry older than `tick`.
    pub fn purge_until(&mut self, tick: i32) {
        while self.entries.front().is_some_and(|entry| entry.tick < tick) {
            self.entries.pop_front();
        }
    }

    /// Removes every entry.
    pub fn purge_all(&mut self) {
        self.entries.clear();
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored ticks, oldest first.
    pub fn ticks(&self) -> impl Iterator<Item = i32> + '_ {
        self.entries.iter().map(|entry| entry.tick)
    }
}
