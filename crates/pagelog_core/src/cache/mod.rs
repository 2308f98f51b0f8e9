//! Page caching.
//!
//! Every log reads complete pages through a [`LogPageCache`], which either
//! owns a private generational cache or points into a [`SharedPageCache`]
//! under a per-log identity. Partial pages are never cached.

mod generations;
mod shared;

pub use shared::SharedPageCache;

use crate::error::LogResult;
use generations::GenerationalCache;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Plaintext contents of one page.
pub type Page = Arc<[u8]>;

/// Number of pages `memory_usage` bytes can hold, never fewer than one per
/// generation.
pub(crate) fn capacity_in_pages(memory_usage: u64, page_size: usize, generation_count: usize) -> usize {
    let pages = usize::try_from(memory_usage / page_size as u64).unwrap_or(usize::MAX);
    pages.max(generation_count.max(1))
}

enum Backend {
    Separate(GenerationalCache<u64>),
    Shared(Arc<SharedPageCache>),
}

/// The page cache as seen by one log.
pub(crate) struct LogPageCache {
    backend: Backend,
    identity: RwLock<Uuid>,
}

impl LogPageCache {
    pub(crate) fn separate(
        capacity: usize,
        generation_count: usize,
        soft_references: bool,
        non_blocking: bool,
    ) -> Self {
        Self {
            backend: Backend::Separate(GenerationalCache::new(
                capacity,
                generation_count,
                soft_references,
                non_blocking,
            )),
            identity: RwLock::new(Uuid::new_v4()),
        }
    }

    pub(crate) fn shared(cache: Arc<SharedPageCache>) -> Self {
        Self {
            backend: Backend::Shared(cache),
            identity: RwLock::new(Uuid::new_v4()),
        }
    }

    pub(crate) fn identity(&self) -> Uuid {
        *self.identity.read()
    }

    pub(crate) fn is_shared(&self) -> bool {
        matches!(self.backend, Backend::Shared(_))
    }

    pub(crate) fn get(&self, page_address: u64) -> Option<Page> {
        match &self.backend {
            Backend::Separate(cache) => cache.get(&page_address),
            Backend::Shared(cache) => cache.get(self.identity(), page_address),
        }
    }

    /// Returns the cached page, or loads and caches it on a miss.
    pub(crate) fn get_page<F>(&self, page_address: u64, load: F) -> LogResult<Page>
    where
        F: FnOnce() -> LogResult<Page>,
    {
        if let Some(page) = self.get(page_address) {
            return Ok(page);
        }
        let page = load()?;
        self.insert(page_address, Arc::clone(&page));
        Ok(page)
    }

    pub(crate) fn insert(&self, page_address: u64, page: Page) {
        match &self.backend {
            Backend::Separate(cache) => cache.insert(page_address, page),
            Backend::Shared(cache) => cache.insert(self.identity(), page_address, page),
        }
    }

    pub(crate) fn remove(&self, page_address: u64) {
        match &self.backend {
            Backend::Separate(cache) => cache.remove(&page_address),
            Backend::Shared(cache) => cache.remove(self.identity(), page_address),
        }
    }

    /// Drops every cached page and starts a new identity.
    pub(crate) fn clear(&self) {
        let mut identity = self.identity.write();
        match &self.backend {
            Backend::Separate(cache) => cache.clear(),
            Backend::Shared(cache) => cache.remove_log(*identity),
        }
        *identity = Uuid::new_v4();
    }

    pub(crate) fn hit_rate(&self) -> f64 {
        match &self.backend {
            Backend::Separate(cache) => cache.hit_rate(),
            Backend::Shared(cache) => cache.hit_rate(),
        }
    }
}

impl Drop for LogPageCache {
    fn drop(&mut self) {
        if let Backend::Shared(cache) = &self.backend {
            cache.remove_log(*self.identity.get_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_down_with_floor() {
        assert_eq!(capacity_in_pages(10 * 1024, 1024, 2), 10);
        assert_eq!(capacity_in_pages(100, 1024, 2), 2);
    }

    #[test]
    fn get_page_loads_once() {
        let cache = LogPageCache::separate(8, 2, false, false);
        let page = cache.get_page(1024, || Ok(Arc::from(vec![1u8; 4]))).unwrap();
        assert_eq!(&page[..], &[1, 1, 1, 1]);
        let again = cache
            .get_page(1024, || panic!("page should come from the cache"))
            .unwrap();
        assert!(Arc::ptr_eq(&page, &again));
    }

    #[test]
    fn clear_renews_identity() {
        let cache = LogPageCache::separate(8, 2, false, false);
        let before = cache.identity();
        cache.insert(0, Arc::from(vec![0u8; 4]));
        cache.clear();
        assert_ne!(cache.identity(), before);
        assert!(cache.get(0).is_none());
    }

    #[test]
    fn shared_clear_forgets_old_pages() {
        let shared = Arc::new(SharedPageCache::new(1 << 16, 1024, 2, false, false).unwrap());
        let cache = LogPageCache::shared(Arc::clone(&shared));
        assert!(cache.is_shared());

        cache.insert(1024, Arc::from(vec![7u8; 1024]));
        assert!(cache.get(1024).is_some());
        cache.clear();
        assert!(cache.get(1024).is_none());
        assert!(shared.is_empty());
    }

    #[test]
    fn dropping_a_log_cache_releases_shared_pages() {
        let shared = Arc::new(SharedPageCache::new(1 << 16, 1024, 2, false, false).unwrap());
        {
            let cache = LogPageCache::shared(Arc::clone(&shared));
            cache.insert(0, Arc::from(vec![1u8; 1024]));
            assert_eq!(shared.len(), 1);
        }
        assert!(shared.is_empty());
    }
}
