//! Log statistics.
//!
//! # Usage
//!
//! ```rust
//! use pagelog_core::{Log, LogConfig};
//!
//! let log = Log::open_in_memory(LogConfig::new().file_size(64).page_size(1024)).unwrap();
//! log.write(1, 0, b"hello").unwrap();
//!
//! let stats = log.stats().snapshot();
//! assert_eq!(stats.loggables_written, 1);
//! assert_eq!(stats.files_created, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing the activity of one log.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct LogStatistics {
    /// Records appended.
    loggables_written: AtomicU64,
    /// Records decoded.
    loggables_read: AtomicU64,
    /// Write sessions ended.
    sessions: AtomicU64,
    /// Complete pages handed to the flusher.
    pages_flushed: AtomicU64,
    /// Bytes that reached a block.
    bytes_written: AtomicU64,
    /// Bytes read from blocks.
    bytes_read: AtomicU64,
    /// Null bytes written as padding.
    padding_bytes: AtomicU64,
    files_created: AtomicU64,
    files_removed: AtomicU64,
    syncs: AtomicU64,
}

impl LogStatistics {
    /// Creates zeroed statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_loggable_written(&self) {
        self.loggables_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_loggable_read(&self) {
        self.loggables_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_page_flushed(&self) {
        self.pages_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_padding(&self, bytes: u64) {
        self.padding_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_file_created(&self) {
        self.files_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_file_removed(&self) {
        self.files_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of records appended.
    pub fn loggables_written(&self) -> u64 {
        self.loggables_written.load(Ordering::Relaxed)
    }

    /// Returns the number of records decoded.
    pub fn loggables_read(&self) -> u64 {
        self.loggables_read.load(Ordering::Relaxed)
    }

    /// Returns the number of files created.
    pub fn files_created(&self) -> u64 {
        self.files_created.load(Ordering::Relaxed)
    }

    /// Returns the number of syncs.
    pub fn syncs(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            loggables_written: self.loggables_written(),
            loggables_read: self.loggables_read(),
            sessions: self.sessions.load(Ordering::Relaxed),
            pages_flushed: self.pages_flushed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            padding_bytes: self.padding_bytes.load(Ordering::Relaxed),
            files_created: self.files_created(),
            files_removed: self.files_removed.load(Ordering::Relaxed),
            syncs: self.syncs(),
        }
    }
}

/// A point-in-time copy of [`LogStatistics`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Records appended.
    pub loggables_written: u64,
    /// Records decoded.
    pub loggables_read: u64,
    /// Write sessions ended.
    pub sessions: u64,
    /// Complete pages handed to the flusher.
    pub pages_flushed: u64,
    /// Bytes that reached a block.
    pub bytes_written: u64,
    /// Bytes read from blocks.
    pub bytes_read: u64,
    /// Null bytes written as padding.
    pub padding_bytes: u64,
    /// Files created.
    pub files_created: u64,
    /// Files removed.
    pub files_removed: u64,
    /// Syncs performed.
    pub syncs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = LogStatistics::new();
        stats.record_loggable_written();
        stats.record_loggable_written();
        stats.record_bytes_written(100);
        stats.record_file_created();
        stats.record_padding(7);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.loggables_written, 2);
        assert_eq!(snapshot.bytes_written, 100);
        assert_eq!(snapshot.files_created, 1);
        assert_eq!(snapshot.padding_bytes, 7);
        assert_eq!(snapshot.syncs, 0);
    }

    #[test]
    fn snapshot_is_detached() {
        let stats = LogStatistics::new();
        let before = stats.snapshot();
        stats.record_sync();
        assert_eq!(before, StatsSnapshot::default());
        assert_eq!(stats.syncs(), 1);
    }
}
