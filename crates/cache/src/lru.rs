//! Size-accounted LRU store shared by both cache tiers
//!
//! Entries are stamped from a logical clock on every insert and read. Reads
//! only take the shared lock and bump the stamp atomically; inserts, evictions
//! and removals take the exclusive lock, so a reader sees either the previous
//! entry or the complete new one.

use crate::key::{Backend, PageId, ResampleKey};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Errors produced by cache mutation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The entry cannot fit even after evicting every unpinned entry
    #[error("entry of {size} bytes does not fit in cache (capacity {capacity} bytes, {pinned} bytes pinned)")]
    CapacityExceeded {
        size: usize,
        capacity: usize,
        pinned: usize,
    },
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently in cache
    pub entry_count: usize,

    /// Sum of the byte sizes of all entries
    pub used_bytes: usize,

    /// Maximum bytes allowed
    pub capacity_bytes: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of entries evicted due to memory pressure
    pub evictions: u64,

    /// Number of puts rejected because the entry could not fit
    pub rejected: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.capacity_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.capacity_bytes as f64
        }
    }
}

/// Outcome of a successful insert
#[derive(Debug)]
pub(crate) struct Inserted<P> {
    /// Entries evicted to make room, least recently used first
    pub(crate) evicted: Vec<(ResampleKey, P)>,
    /// Previous payload stored under the same key
    pub(crate) replaced: Option<P>,
}

struct Entry<P> {
    payload: P,
    byte_size: usize,
    last_access: AtomicU64,
}

struct LruState<P> {
    entries: HashMap<ResampleKey, Entry<P>>,
    used_bytes: usize,
    capacity_bytes: usize,
    pinned: HashSet<ResampleKey>,

    /// Pages whose GPU-backend entries are pinned at any size
    pinned_sources: HashSet<PageId>,
}

impl<P> LruState<P> {
    /// Only the exact pinned renderings are protected; a pinned page at a
    /// stale size or algorithm is evictable like any other entry.
    fn is_pinned(&self, key: &ResampleKey) -> bool {
        self.pinned.contains(key)
            || (key.backend == Backend::Gpu && self.pinned_sources.contains(&key.page_id))
    }

    /// Unpinned entries, least recently used first, excluding `skip`
    fn eviction_candidates(&self, skip: Option<&ResampleKey>) -> Vec<(u64, ResampleKey, usize)> {
        let mut candidates: Vec<_> = self
            .entries
            .iter()
            .filter(|(key, _)| Some(*key) != skip && !self.is_pinned(key))
            .map(|(key, entry)| (entry.last_access.load(Ordering::Acquire), *key, entry.byte_size))
            .collect();
        candidates.sort_unstable_by_key(|(stamp, _, _)| *stamp);
        candidates
    }

    fn pinned_bytes(&self) -> usize {
        self.entries
            .iter()
            .filter(|(key, _)| self.is_pinned(key))
            .map(|(_, entry)| entry.byte_size)
            .sum()
    }

    fn remove(&mut self, key: &ResampleKey) -> Option<Entry<P>> {
        let entry = self.entries.remove(key)?;
        self.used_bytes -= entry.byte_size;
        Some(entry)
    }

    /// Pick the entries to evict so that `incoming` more bytes fit
    ///
    /// `replacing` is the key being overwritten; its bytes count as free.
    /// Returns `None` when the unpinned entries cannot free enough space.
    fn plan_eviction(&self, incoming: usize, replacing: Option<&ResampleKey>) -> Option<Vec<ResampleKey>> {
        if incoming > self.capacity_bytes {
            return None;
        }
        let replaced = replacing
            .and_then(|key| self.entries.get(key))
            .map_or(0, |entry| entry.byte_size);
        let mut used = self.used_bytes - replaced;
        let mut plan = Vec::new();
        if used + incoming <= self.capacity_bytes {
            return Some(plan);
        }
        for (_, key, size) in self.eviction_candidates(replacing) {
            plan.push(key);
            used -= size;
            if used + incoming <= self.capacity_bytes {
                return Some(plan);
            }
        }
        None
    }
}

/// Thread-safe LRU store keyed by [`ResampleKey`]
pub(crate) struct LruStore<P> {
    state: RwLock<LruState<P>>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    rejected: AtomicU64,
    label: &'static str,
}

impl<P: Clone> LruStore<P> {
    pub(crate) fn new(capacity_bytes: usize, label: &'static str) -> Self {
        Self {
            state: RwLock::new(LruState {
                entries: HashMap::new(),
                used_bytes: 0,
                capacity_bytes,
                pinned: HashSet::new(),
                pinned_sources: HashSet::new(),
            }),
            clock: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            label,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel)
    }

    pub(crate) fn get(&self, key: &ResampleKey) -> Option<P> {
        let state = self.state.read().unwrap();
        match state.entries.get(key) {
            Some(entry) => {
                entry.last_access.store(self.tick(), Ordering::Release);
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("[{}] hit {}", self.label, key);
                Some(entry.payload.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("[{}] miss {}", self.label, key);
                None
            }
        }
    }

    pub(crate) fn put(
        &self,
        key: ResampleKey,
        payload: P,
        byte_size: usize,
    ) -> Result<Inserted<P>, CacheError> {
        let mut state = self.state.write().unwrap();

        let Some(plan) = state.plan_eviction(byte_size, Some(&key)) else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            let err = CacheError::CapacityExceeded {
                size: byte_size,
                capacity: state.capacity_bytes,
                pinned: state.pinned_bytes(),
            };
            warn!("[{}] rejected {}: {}", self.label, key, err);
            return Err(err);
        };

        let evicted = self.apply_eviction(&mut state, plan);

        // If this exact key is already cached, its bytes are released first
        let replaced = state.remove(&key).map(|entry| entry.payload);
        state.used_bytes += byte_size;
        state.entries.insert(
            key,
            Entry {
                payload,
                byte_size,
                last_access: AtomicU64::new(self.tick()),
            },
        );
        debug!(
            "[{}] put {} ({} bytes, {}/{} used)",
            self.label, key, byte_size, state.used_bytes, state.capacity_bytes
        );

        Ok(Inserted { evicted, replaced })
    }

    pub(crate) fn evict_if_needed(&self, incoming: usize) -> Result<Vec<(ResampleKey, P)>, CacheError> {
        let mut state = self.state.write().unwrap();
        match state.plan_eviction(incoming, None) {
            Some(plan) => Ok(self.apply_eviction(&mut state, plan)),
            None => Err(CacheError::CapacityExceeded {
                size: incoming,
                capacity: state.capacity_bytes,
                pinned: state.pinned_bytes(),
            }),
        }
    }

    fn apply_eviction(&self, state: &mut LruState<P>, plan: Vec<ResampleKey>) -> Vec<(ResampleKey, P)> {
        let mut evicted = Vec::with_capacity(plan.len());
        for key in plan {
            if let Some(entry) = state.remove(&key) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("[{}] evicted {}", self.label, key);
                evicted.push((key, entry.payload));
            }
        }
        evicted
    }

    pub(crate) fn contains(&self, key: &ResampleKey) -> bool {
        self.state.read().unwrap().entries.contains_key(key)
    }

    pub(crate) fn peek(&self, key: &ResampleKey) -> Option<P> {
        self.state.read().unwrap().entries.get(key).map(|entry| entry.payload.clone())
    }

    pub(crate) fn remove(&self, key: &ResampleKey) -> Option<P> {
        self.state.write().unwrap().remove(key).map(|entry| entry.payload)
    }

    pub(crate) fn clear(&self) -> Vec<(ResampleKey, P)> {
        let mut state = self.state.write().unwrap();
        state.used_bytes = 0;
        state.entries.drain().map(|(key, entry)| (key, entry.payload)).collect()
    }

    pub(crate) fn set_capacity(&self, capacity_bytes: usize) -> Vec<(ResampleKey, P)> {
        let mut state = self.state.write().unwrap();
        state.capacity_bytes = capacity_bytes;

        let mut plan = Vec::new();
        let mut used = state.used_bytes;
        for (_, key, size) in state.eviction_candidates(None) {
            if used <= capacity_bytes {
                break;
            }
            plan.push(key);
            used -= size;
        }
        if used > capacity_bytes {
            warn!(
                "[{}] pinned entries keep usage at {} bytes above new capacity {}",
                self.label, used, capacity_bytes
            );
        }
        self.apply_eviction(&mut state, plan)
    }

    /// Replace the pinned set
    ///
    /// `keys` pin exactly one entry each. Every GPU-backend entry of a page in
    /// `sources` is pinned whatever its size.
    pub(crate) fn set_pinned<K, S>(&self, keys: K, sources: S)
    where
        K: IntoIterator<Item = ResampleKey>,
        S: IntoIterator<Item = PageId>,
    {
        let mut state = self.state.write().unwrap();
        state.pinned = keys.into_iter().collect();
        state.pinned_sources = sources.into_iter().collect();
    }

    pub(crate) fn pinned_keys(&self) -> Vec<ResampleKey> {
        let state = self.state.read().unwrap();
        let mut keys: Vec<_> = state.pinned.iter().copied().collect();
        keys.sort_unstable_by_key(|key| (key.page_id, key.target_width, key.target_height));
        keys
    }

    pub(crate) fn pinned_pages(&self) -> Vec<PageId> {
        let state = self.state.read().unwrap();
        let mut pages: Vec<_> = state.pinned.iter().map(|key| key.page_id).collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }

    /// Entry for `page_id` most suitable as a texture source
    ///
    /// GPU-backend entries hold the decoded page at source resolution, so
    /// they win; otherwise the largest raster is chosen. Recency is untouched.
    pub(crate) fn find_for_page(&self, page_id: PageId) -> Option<(ResampleKey, P)> {
        let state = self.state.read().unwrap();
        state
            .entries
            .iter()
            .filter(|(key, _)| key.page_id == page_id)
            .max_by_key(|(key, entry)| (key.backend == Backend::Gpu, entry.byte_size))
            .map(|(key, entry)| (*key, entry.payload.clone()))
    }

    pub(crate) fn keys(&self) -> Vec<ResampleKey> {
        self.state.read().unwrap().entries.keys().copied().collect()
    }

    /// Keys ordered from least to most recently used
    pub(crate) fn recency_order(&self) -> Vec<ResampleKey> {
        let state = self.state.read().unwrap();
        let mut stamped: Vec<_> = state
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_access.load(Ordering::Acquire), *key))
            .collect();
        stamped.sort_unstable_by_key(|(stamp, _)| *stamp);
        stamped.into_iter().map(|(_, key)| key).collect()
    }

    pub(crate) fn used_bytes(&self) -> usize {
        self.state.read().unwrap().used_bytes
    }

    pub(crate) fn capacity_bytes(&self) -> usize {
        self.state.read().unwrap().capacity_bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }

    /// Sum of entry sizes recomputed from scratch
    pub(crate) fn accounted_bytes(&self) -> usize {
        self.state.read().unwrap().entries.values().map(|entry| entry.byte_size).sum()
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let state = self.state.read().unwrap();
        CacheStats {
            entry_count: state.entries.len(),
            used_bytes: state.used_bytes,
            capacity_bytes: state.capacity_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
