//! Shared cache of decompressed blocks, keyed by logical block and version.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// A block is cached under its logical id and the version that was current
/// when it was read. Stale versions age out through normal LRU pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub lbid: u64,
    pub ver: u64,
}

/// Cache the reader pool loads into. Swappable so embedders can share one
/// cache across pools or disable caching entirely.
pub trait BlockCache: Send + Sync {
    /// Insert a batch of blocks, returning how many were stored.
    fn bulk_insert(&self, blocks: Vec<(CacheKey, Vec<u8>)>) -> usize;

    /// Fetch a block at an exact version.
    fn get(&self, key: CacheKey) -> Option<Vec<u8>>;

    fn contains(&self, key: CacheKey) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// LRU over `(lbid, ver)`, bounded by entry count.
pub struct LruBlockCache {
    inner: Mutex<LruCache<CacheKey, Vec<u8>>>,
}

impl LruBlockCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        LruBlockCache { inner: Mutex::new(LruCache::new(cap)) }
    }
}

impl BlockCache for LruBlockCache {
    fn bulk_insert(&self, blocks: Vec<(CacheKey, Vec<u8>)>) -> usize {
        let mut cache = self.inner.lock();
        let mut stored = 0;
        for (key, data) in blocks {
            cache.put(key, data);
            stored += 1;
        }
        stored
    }

    fn get(&self, key: CacheKey) -> Option<Vec<u8>> {
        self.inner.lock().get(&key).cloned()
    }

    fn contains(&self, key: CacheKey) -> bool {
        self.inner.lock().contains(&key)
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Discards everything. For pools whose callers always read through the
/// request payload.
pub struct NoopBlockCache;

impl BlockCache for NoopBlockCache {
    fn bulk_insert(&self, _blocks: Vec<(CacheKey, Vec<u8>)>) -> usize {
        0
    }

    fn get(&self, _key: CacheKey) -> Option<Vec<u8>> {
        None
    }

    fn contains(&self, _key: CacheKey) -> bool {
        false
    }

    fn len(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(lbid: u64, ver: u64) -> CacheKey {
        CacheKey { lbid, ver }
    }

    #[test]
    fn blocks_are_found_under_their_exact_version() {
        let cache = LruBlockCache::new(16);
        cache.bulk_insert(vec![(key(100, 5), vec![1, 2, 3])]);

        assert_eq!(cache.get(key(100, 5)), Some(vec![1, 2, 3]));
        assert_eq!(cache.get(key(100, 6)), None);
        assert_eq!(cache.get(key(101, 5)), None);
    }

    #[test]
    fn capacity_bounds_the_cache_lru_first() {
        let cache = LruBlockCache::new(2);
        cache.bulk_insert(vec![
            (key(1, 1), vec![1]),
            (key(2, 1), vec![2]),
        ]);
        // Touch 1 so 2 is the LRU victim.
        cache.get(key(1, 1));
        cache.bulk_insert(vec![(key(3, 1), vec![3])]);

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(key(1, 1)));
        assert!(!cache.contains(key(2, 1)));
        assert!(cache.contains(key(3, 1)));
    }

    #[test]
    fn bulk_insert_reports_the_stored_count() {
        let cache = LruBlockCache::new(8);
        let n = cache.bulk_insert(vec![
            (key(1, 1), vec![0u8; 4]),
            (key(2, 1), vec![0u8; 4]),
            (key(3, 1), vec![0u8; 4]),
        ]);
        assert_eq!(n, 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn zero_capacity_degrades_to_a_single_slot() {
        let cache = LruBlockCache::new(0);
        cache.bulk_insert(vec![(key(9, 9), vec![9])]);
        assert_eq!(cache.len(), 1);
    }
}
