//! Log configuration.

use crate::cache::SharedPageCache;
use crate::crypto::CipherConfig;
use crate::error::{LogError, LogResult};
use crate::geometry::LogGeometry;
use crate::writer::WriteExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cache budget used when neither a byte count nor a percentage is set.
pub const DEFAULT_CACHE_MEMORY: u64 = 64 * 1024 * 1024;

/// Memory assumed when the total system memory cannot be determined.
const FALLBACK_SYSTEM_MEMORY: u64 = 1024 * 1024 * 1024;

/// Configuration for opening a log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// File size in KiB; a multiple of the page size.
    pub file_size: u64,

    /// Page size in bytes; a power of two.
    pub page_size: usize,

    /// Cache budget in bytes.
    pub memory_usage: Option<u64>,

    /// Cache budget as a percentage of system memory.
    pub memory_usage_percentage: Option<u8>,

    /// Cache shared with other logs, instead of a private one.
    pub shared_cache: Option<Arc<SharedPageCache>>,

    /// Whether cache lookups skip a contended cache instead of waiting.
    pub non_blocking_cache: bool,

    /// Whether evicted pages stay reachable while readers hold them.
    pub cache_use_soft_references: bool,

    /// Number of cache generations.
    pub cache_generation_count: usize,

    /// Longest time between syncs of the current file.
    pub sync_period: Duration,

    /// Whether every write session ends with a sync.
    pub durable_write: bool,

    /// Whether full files are made read-only.
    pub full_file_read_only: bool,

    /// Page encryption; `None` stores plaintext.
    pub cipher: Option<CipherConfig>,

    /// Whether opening a non-empty directory is an error.
    pub clean_directory_expected: bool,

    /// Whether an unrecoverable log is erased instead of failing the open.
    pub clear_invalid_log: bool,

    /// Whether the newest pages are loaded into the cache at open.
    pub warmup: bool,

    /// Whether pages carry hash trailers. Disable only for legacy logs.
    pub checksums: bool,

    /// How long to wait for the directory lock.
    pub lock_timeout: Duration,

    /// Format version of the layer above, stored in the metadata.
    pub environment_format_version: u32,

    /// Page flush executor shared with other logs.
    pub write_executor: Option<WriteExecutor>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_size: 8192,      // 8 MB
            page_size: 64 * 1024, // 64 KB
            memory_usage: None,
            memory_usage_percentage: None,
            shared_cache: None,
            non_blocking_cache: false,
            cache_use_soft_references: false,
            cache_generation_count: 2,
            sync_period: Duration::from_secs(10),
            durable_write: false,
            full_file_read_only: true,
            cipher: None,
            clean_directory_expected: false,
            clear_invalid_log: false,
            warmup: false,
            checksums: true,
            lock_timeout: Duration::ZERO,
            environment_format_version: 0,
            write_executor: None,
        }
    }
}

impl LogConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the file size in KiB.
    #[must_use]
    pub const fn file_size(mut self, kib: u64) -> Self {
        self.file_size = kib;
        self
    }

    /// Sets the page size in bytes.
    #[must_use]
    pub const fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Sets the cache budget in bytes.
    #[must_use]
    pub const fn memory_usage(mut self, bytes: u64) -> Self {
        self.memory_usage = Some(bytes);
        self
    }

    /// Sets the cache budget as a percentage of system memory.
    #[must_use]
    pub const fn memory_usage_percentage(mut self, percent: u8) -> Self {
        self.memory_usage_percentage = Some(percent);
        self
    }

    /// Uses a cache shared with other logs.
    #[must_use]
    pub fn shared_cache(mut self, cache: Arc<SharedPageCache>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    /// Sets whether cache lookups skip a contended cache.
    #[must_use]
    pub const fn non_blocking_cache(mut self, value: bool) -> Self {
        self.non_blocking_cache = value;
        self
    }

    /// Sets whether evicted pages stay reachable while held.
    #[must_use]
    pub const fn cache_use_soft_references(mut self, value: bool) -> Self {
        self.cache_use_soft_references = value;
        self
    }

    /// Sets the number of cache generations.
    #[must_use]
    pub const fn cache_generation_count(mut self, count: usize) -> Self {
        self.cache_generation_count = count;
        self
    }

    /// Sets the sync period.
    #[must_use]
    pub const fn sync_period(mut self, period: Duration) -> Self {
        self.sync_period = period;
        self
    }

    /// Sets whether every write session ends with a sync.
    #[must_use]
    pub const fn durable_write(mut self, value: bool) -> Self {
        self.durable_write = value;
        self
    }

    /// Sets whether full files are made read-only.
    #[must_use]
    pub const fn full_file_read_only(mut self, value: bool) -> Self {
        self.full_file_read_only = value;
        self
    }

    /// Enables page encryption.
    #[must_use]
    pub fn cipher(mut self, cipher: CipherConfig) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Sets whether the directory must be empty at open.
    #[must_use]
    pub const fn clean_directory_expected(mut self, value: bool) -> Self {
        self.clean_directory_expected = value;
        self
    }

    /// Sets whether an unrecoverable log is erased at open.
    #[must_use]
    pub const fn clear_invalid_log(mut self, value: bool) -> Self {
        self.clear_invalid_log = value;
        self
    }

    /// Sets whether the cache is warmed up at open.
    #[must_use]
    pub const fn warmup(mut self, value: bool) -> Self {
        self.warmup = value;
        self
    }

    /// Sets whether pages carry hash trailers.
    #[must_use]
    pub const fn checksums(mut self, value: bool) -> Self {
        self.checksums = value;
        self
    }

    /// Sets the directory lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the format version of the layer above.
    #[must_use]
    pub const fn environment_format_version(mut self, version: u32) -> Self {
        self.environment_format_version = version;
        self
    }

    /// Uses a page flush executor shared with other logs.
    #[must_use]
    pub fn write_executor(mut self, executor: WriteExecutor) -> Self {
        self.write_executor = Some(executor);
        self
    }

    /// Returns `true` if the log uses a shared cache.
    #[must_use]
    pub fn is_shared_cache(&self) -> bool {
        self.shared_cache.is_some()
    }

    /// File length in bytes.
    #[must_use]
    pub const fn file_length_bound(&self) -> u64 {
        self.file_size * 1024
    }

    /// Page and file layout described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] for inconsistent sizes.
    pub fn geometry(&self) -> LogResult<LogGeometry> {
        LogGeometry::new(self.page_size, self.file_length_bound(), self.checksums)
    }

    /// Checks the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> LogResult<()> {
        self.geometry()?;
        if self.memory_usage.is_some() && self.memory_usage_percentage.is_some() {
            return Err(LogError::invalid_config(
                "memory_usage and memory_usage_percentage are mutually exclusive",
            ));
        }
        if let Some(percent) = self.memory_usage_percentage {
            if percent == 0 || percent > 90 {
                return Err(LogError::invalid_config(format!(
                    "memory usage percentage {percent} must be within 1..=90"
                )));
            }
        }
        if self.cache_generation_count == 0 {
            return Err(LogError::invalid_config(
                "cache generation count must be positive",
            ));
        }
        if self.cipher.is_some() && !self.checksums {
            return Err(LogError::invalid_config(
                "encryption requires page checksums",
            ));
        }
        Ok(())
    }

    /// Cache budget in bytes after resolving percentages.
    #[must_use]
    pub fn cache_memory(&self) -> u64 {
        match (self.memory_usage, self.memory_usage_percentage) {
            (Some(bytes), _) => bytes,
            (None, Some(percent)) => total_system_memory() / 100 * u64::from(percent),
            (None, None) => DEFAULT_CACHE_MEMORY,
        }
    }
}

/// Total physical memory, or a fixed guess where it cannot be read.
fn total_system_memory() -> u64 {
    let detected = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|info| {
            info.lines()
                .find_map(|line| line.strip_prefix("MemTotal:"))
                .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
        })
        .map(|kib| kib * 1024);

    detected.unwrap_or_else(|| {
        debug!(
            fallback = FALLBACK_SYSTEM_MEMORY,
            "system memory unknown, using fallback"
        );
        FALLBACK_SYSTEM_MEMORY
    })
}
