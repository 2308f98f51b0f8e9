//! Test fixtures and log helpers.
//!
//! Provides convenience functions for setting up test logs with small
//! pages and files, so that page and file boundaries are crossed quickly.

use pagelog_core::{Log, LogConfig};
use pagelog_storage::{BlockStore, InMemoryBlockStore};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Page size used by [`small_config`].
pub const SMALL_PAGE_SIZE: usize = 1024;

/// File size in KiB used by [`small_config`].
pub const SMALL_FILE_SIZE_KIB: u64 = 4;

/// Configuration with 1 KiB pages and 4 KiB files.
pub fn small_config() -> LogConfig {
    LogConfig::new()
        .file_size(SMALL_FILE_SIZE_KIB)
        .page_size(SMALL_PAGE_SIZE)
        .memory_usage(1 << 20)
}

/// Installs a `tracing` subscriber honoring `RUST_LOG`, once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

enum Backing {
    Memory(Arc<InMemoryBlockStore>),
    File(TempDir),
}

/// A test log with automatic cleanup.
///
/// The log can be closed, crashed and reopened on the same storage.
pub struct TestLog {
    /// The log instance.
    pub log: Option<Log>,
    config: LogConfig,
    backing: Backing,
}

impl TestLog {
    /// Creates a log on a fresh in-memory store.
    pub fn memory(config: LogConfig) -> Self {
        init_tracing();
        let store = Arc::new(InMemoryBlockStore::new());
        let log = Log::open(Arc::clone(&store) as Arc<dyn BlockStore>, config.clone())
            .expect("Failed to open in-memory log");
        Self {
            log: Some(log),
            config,
            backing: Backing::Memory(store),
        }
    }

    /// Creates a log in a temporary directory.
    pub fn file(config: LogConfig) -> Self {
        init_tracing();
        let dir = TempDir::new().expect("Failed to create temp directory");
        let log = Log::open_dir(dir.path(), config.clone()).expect("Failed to open file log");
        Self {
            log: Some(log),
            config,
            backing: Backing::File(dir),
        }
    }

    /// Returns the open log.
    pub fn log(&self) -> &Log {
        self.log.as_ref().expect("log is not open")
    }

    /// Returns the in-memory store, if any.
    pub fn memory_store(&self) -> Option<&Arc<InMemoryBlockStore>> {
        match &self.backing {
            Backing::Memory(store) => Some(store),
            Backing::File(_) => None,
        }
    }

    /// Returns the log directory if file-based.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.backing {
            Backing::Memory(_) => None,
            Backing::File(dir) => Some(dir.path().to_path_buf()),
        }
    }

    /// Closes the log cleanly and opens it again.
    pub fn reopen(&mut self) -> &Log {
        if let Some(log) = self.log.take() {
            log.close().expect("Failed to close log");
        }
        self.open_again(self.config.clone())
    }

    /// Reopens the log with another configuration.
    pub fn reopen_with(&mut self, config: LogConfig) -> &Log {
        if let Some(log) = self.log.take() {
            log.close().expect("Failed to close log");
        }
        self.config = config.clone();
        self.open_again(config)
    }

    /// Simulates a crash: storage is frozen as it is now, the running log is
    /// discarded, and a new log is opened on the frozen copy.
    ///
    /// Only in-memory logs can crash.
    pub fn crash_and_reopen(&mut self) -> &Log {
        let Backing::Memory(store) = &self.backing else {
            panic!("only in-memory logs can simulate a crash");
        };
        let frozen = Arc::new(store.duplicate());
        self.backing = Backing::Memory(Arc::clone(&frozen));
        // The old log writes its close marker to the discarded store.
        drop(self.log.take());
        self.open_again(self.config.clone())
    }

    fn open_again(&mut self, config: LogConfig) -> &Log {
        let log = match &self.backing {
            Backing::Memory(store) => {
                Log::open(Arc::clone(store) as Arc<dyn BlockStore>, config)
            }
            Backing::File(dir) => Log::open_dir(dir.path(), config),
        }
        .expect("Failed to reopen log");
        self.log.insert(log)
    }
}

impl std::ops::Deref for TestLog {
    type Target = Log;

    fn deref(&self) -> &Self::Target {
        self.log()
    }
}

/// Runs a test with a temporary in-memory log using [`small_config`].
///
/// # Example
///
/// ```rust
/// use pagelog_testkit::with_temp_log;
///
/// with_temp_log(|log| {
///     let address = log.write(1, 0, b"data").unwrap();
///     assert_eq!(log.read(address).unwrap().loggable_type(), 1);
/// });
/// ```
pub fn with_temp_log<F, R>(f: F) -> R
where
    F: FnOnce(&Log) -> R,
{
    let test_log = TestLog::memory(small_config());
    f(test_log.log())
}

/// Runs a test with a temporary file-based log using [`small_config`].
pub fn with_file_log<F, R>(f: F) -> R
where
    F: FnOnce(&Log, &Path) -> R,
{
    let test_log = TestLog::file(small_config());
    let path = test_log.path().expect("File log should have a path");
    f(test_log.log(), &path)
}

/// Deterministic payload of `len` bytes derived from `seed`.
pub fn payload(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_log_reopen() {
        let mut test_log = TestLog::memory(small_config());
        let address = test_log.write(1, 0, b"persisted").unwrap();

        let log = test_log.reopen();
        let data = log.read(address).unwrap().data().to_bytes().unwrap();
        assert_eq!(data.as_ref(), b"persisted");
    }

    #[test]
    fn test_file_log_reopen() {
        let mut test_log = TestLog::file(small_config());
        let addresses: Vec<u64> = (0..20)
            .map(|i| test_log.write(1, i, &payload(i.into(), 300)).unwrap())
            .collect();

        let log = test_log.reopen();
        for (i, &address) in addresses.iter().enumerate() {
            let loggable = log.read(address).unwrap();
            assert_eq!(loggable.structure_id(), i as u32);
            assert_eq!(
                loggable.data().to_bytes().unwrap().as_ref(),
                payload(i as u64, 300).as_slice()
            );
        }
    }

    #[test]
    fn test_with_file_log_sees_directory() {
        with_file_log(|log, path| {
            log.write(1, 0, b"x").unwrap();
            log.sync().unwrap();
            assert!(path.join("LOCK").exists());
        });
    }

    #[test]
    fn test_payload_is_deterministic() {
        assert_eq!(payload(7, 32), payload(7, 32));
        assert_ne!(payload(7, 32), payload(8, 32));
    }
}
