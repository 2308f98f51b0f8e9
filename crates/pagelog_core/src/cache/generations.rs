//! Generational LRU shared by both cache flavours.
//!
//! Pages enter generation 0. A hit promotes a page one generation up; the
//! least recently used page of a full generation is demoted one generation
//! down, and falls out of the cache from generation 0. With soft references
//! enabled, fallen pages are remembered weakly and come back on a hit while
//! some reader still holds them.

use super::Page;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

struct Generations<K> {
    segments: Vec<LruCache<K, Page>>,
    weak: Option<HashMap<K, Weak<[u8]>>>,
    weak_limit: usize,
}

impl<K: Hash + Eq + Clone> Generations<K> {
    fn new(capacity: usize, generation_count: usize, soft_references: bool) -> Self {
        let generation_count = generation_count.max(1);
        let per_generation = (capacity / generation_count).max(1);
        let segments = (0..generation_count)
            .map(|_| LruCache::new(NonZeroUsize::new(per_generation).unwrap_or(NonZeroUsize::MIN)))
            .collect();
        Self {
            segments,
            weak: soft_references.then(HashMap::new),
            weak_limit: capacity.max(1),
        }
    }

    fn get(&mut self, key: &K) -> Option<Page> {
        let top = self.segments.len() - 1;
        for generation in 0..self.segments.len() {
            if let Some(page) = self.segments[generation].pop(key) {
                self.insert_at((generation + 1).min(top), key.clone(), Arc::clone(&page));
                return Some(page);
            }
        }

        let page = self.weak.as_mut()?.remove(key)?.upgrade()?;
        self.insert_at(0, key.clone(), Arc::clone(&page));
        Some(page)
    }

    fn insert(&mut self, key: K, page: Page) {
        self.remove(&key);
        self.insert_at(0, key, page);
    }

    fn insert_at(&mut self, generation: usize, key: K, page: Page) {
        let Some((evicted_key, evicted)) = self.segments[generation].push(key.clone(), page) else {
            return;
        };
        if evicted_key == key {
            return;
        }
        if generation > 0 {
            self.insert_at(generation - 1, evicted_key, evicted);
            return;
        }
        if let Some(weak) = self.weak.as_mut() {
            if weak.len() >= self.weak_limit {
                weak.retain(|_, page| page.strong_count() > 0);
            }
            weak.insert(evicted_key, Arc::downgrade(&evicted));
        }
    }

    fn remove(&mut self, key: &K) {
        for segment in &mut self.segments {
            segment.pop(key);
        }
        if let Some(weak) = self.weak.as_mut() {
            weak.remove(key);
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        for segment in &mut self.segments {
            let doomed: Vec<K> = segment
                .iter()
                .filter(|(k, _)| !keep(*k))
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                segment.pop(&key);
            }
        }
        if let Some(weak) = self.weak.as_mut() {
            weak.retain(|k, _| keep(k));
        }
    }

    fn clear(&mut self) {
        for segment in &mut self.segments {
            segment.clear();
        }
        if let Some(weak) = self.weak.as_mut() {
            weak.clear();
        }
    }

    fn len(&self) -> usize {
        self.segments.iter().map(LruCache::len).sum()
    }
}

/// Thread-safe generational page cache keyed by `K`.
pub(crate) struct GenerationalCache<K> {
    state: Mutex<Generations<K>>,
    non_blocking: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Hash + Eq + Clone> GenerationalCache<K> {
    pub(crate) fn new(
        capacity: usize,
        generation_count: usize,
        soft_references: bool,
        non_blocking: bool,
    ) -> Self {
        Self {
            state: Mutex::new(Generations::new(capacity, generation_count, soft_references)),
            non_blocking,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks a page up. In non-blocking mode a contended lock is a miss.
    pub(crate) fn get(&self, key: &K) -> Option<Page> {
        let found = if self.non_blocking {
            self.state.try_lock().and_then(|mut state| state.get(key))
        } else {
            self.state.lock().get(key)
        };
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Caches a page. In non-blocking mode the page is dropped on contention.
    pub(crate) fn insert(&self, key: K, page: Page) {
        if self.non_blocking {
            if let Some(mut state) = self.state.try_lock() {
                state.insert(key, page);
            }
        } else {
            self.state.lock().insert(key, page);
        }
    }

    pub(crate) fn remove(&self, key: &K) {
        self.state.lock().remove(key);
    }

    pub(crate) fn retain(&self, keep: impl FnMut(&K) -> bool) {
        self.state.lock().retain(keep);
    }

    pub(crate) fn clear(&self) {
        self.state.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub(crate) fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
