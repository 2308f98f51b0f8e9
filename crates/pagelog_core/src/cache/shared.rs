//! Page cache shared by several logs.

use super::generations::GenerationalCache;
use super::Page;
use crate::config::LogConfig;
use crate::error::{LogError, LogResult};
use std::fmt;
use uuid::Uuid;

/// A page cache that several logs of one process can share.
///
/// Entries are keyed by the identity of the owning log and the page
/// address, so logs never see each other's pages. Every log attached to the
/// cache must use the same page size and soft-reference setting.
///
/// # Example
///
/// ```rust
/// use pagelog_core::{LogConfig, SharedPageCache};
/// use std::sync::Arc;
///
/// let config = LogConfig::new().page_size(4096).memory_usage(1 << 20);
/// let cache = Arc::new(SharedPageCache::for_config(&config).unwrap());
/// let config = config.shared_cache(Arc::clone(&cache));
/// assert!(config.is_shared_cache());
/// ```
pub struct SharedPageCache {
    cache: GenerationalCache<(Uuid, u64)>,
    page_size: usize,
    capacity: usize,
    soft_references: bool,
}

impl SharedPageCache {
    /// Creates a cache holding `memory_usage` bytes of `page_size` pages.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] if the page size is not a power
    /// of two.
    pub fn new(
        memory_usage: u64,
        page_size: usize,
        generation_count: usize,
        soft_references: bool,
        non_blocking: bool,
    ) -> LogResult<Self> {
        if !page_size.is_power_of_two() {
            return Err(LogError::invalid_config(format!(
                "shared cache page size {page_size} is not a power of two"
            )));
        }
        let capacity = super::capacity_in_pages(memory_usage, page_size, generation_count);
        Ok(Self {
            cache: GenerationalCache::new(
                capacity,
                generation_count,
                soft_references,
                non_blocking,
            ),
            page_size,
            capacity,
            soft_references,
        })
    }

    /// Creates a cache sized and tuned by the cache settings of `config`.
    ///
    /// # Errors
    ///
    /// Fails like [`LogConfig::validate`] and [`SharedPageCache::new`].
    pub fn for_config(config: &LogConfig) -> LogResult<Self> {
        config.validate()?;
        Self::new(
            config.cache_memory(),
            config.page_size,
            config.cache_generation_count,
            config.cache_use_soft_references,
            config.non_blocking_cache,
        )
    }

    /// Page size of every cached page.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Maximum number of strongly held pages.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of strongly held pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns `true` if no page is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of lookups served from the cache.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        self.cache.hit_rate()
    }

    /// Checks that a log with these settings may attach to the cache.
    pub(crate) fn check_compatible(&self, page_size: usize, soft_references: bool) -> LogResult<()> {
        if page_size != self.page_size {
            return Err(LogError::config_mismatch(format!(
                "log page size {page_size} differs from shared cache page size {}",
                self.page_size
            )));
        }
        if soft_references != self.soft_references {
            return Err(LogError::config_mismatch(
                "soft reference setting differs from the shared cache",
            ));
        }
        Ok(())
    }

    pub(crate) fn get(&self, identity: Uuid, page_address: u64) -> Option<Page> {
        self.cache.get(&(identity, page_address))
    }

    pub(crate) fn insert(&self, identity: Uuid, page_address: u64, page: Page) {
        self.cache.insert((identity, page_address), page);
    }

    pub(crate) fn remove(&self, identity: Uuid, page_address: u64) {
        self.cache.remove(&(identity, page_address));
    }

    /// Drops every page of one log.
    pub(crate) fn remove_log(&self, identity: Uuid) {
        self.cache.retain(|(owner, _)| *owner != identity);
    }
}

impl fmt::Debug for SharedPageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPageCache")
            .field("page_size", &self.page_size)
            .field("capacity", &self.capacity)
            .field("soft_references", &self.soft_references)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn logs_do_not_share_entries() {
        let cache = SharedPageCache::new(1 << 20, 1024, 2, false, false).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        cache.insert(a, 0, Arc::from(vec![1u8; 1024]));
        assert!(cache.get(a, 0).is_some());
        assert!(cache.get(b, 0).is_none());
    }

    #[test]
    fn remove_log_keeps_others() {
        let cache = SharedPageCache::new(1 << 20, 1024, 2, false, false).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.insert(a, 0, Arc::from(vec![1u8; 1024]));
        cache.insert(b, 0, Arc::from(vec![2u8; 1024]));

        cache.remove_log(a);
        assert!(cache.get(a, 0).is_none());
        assert_eq!(cache.get(b, 0).unwrap()[0], 2);
    }

    #[test]
    fn incompatible_settings_rejected() {
        let cache = SharedPageCache::new(1 << 20, 1024, 2, false, false).unwrap();
        assert!(cache.check_compatible(1024, false).is_ok());
        assert!(matches!(
            cache.check_compatible(2048, false),
            Err(LogError::ConfigMismatch { .. })
        ));
        assert!(matches!(
            cache.check_compatible(1024, true),
            Err(LogError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn capacity_from_memory() {
        let cache = SharedPageCache::new(64 * 1024, 1024, 2, false, false).unwrap();
        assert_eq!(cache.capacity(), 64);
        assert!(cache.is_empty());
    }
}
