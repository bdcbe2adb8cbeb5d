//! Cache of open segment file descriptors.
//!
//! Each entry carries its file, an access counter for eviction, a pin count,
//! and the parsed chunk header for compressed segments. Entries checked out
//! through an [`FdGuard`] are pinned and never evicted. Bulk invalidation
//! (`drop_all`, `purge`) takes the write side of a bracket lock that every
//! reader thread holds for reading while it services a request, so a purge
//! waits out in-flight reads instead of racing them.

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::warn;

use crate::chunks::{self, ChunkError, ChunkFileHeader};
use crate::config::IoConfig;
use crate::storage::{SegmentKey, SegmentStore};

/// Chunk header state cached with a descriptor. Refreshed when the file
/// mtime moves or a reader invalidates it after a failed fetch.
#[derive(Debug, Default, Clone)]
pub struct ChunkMeta {
    mtime: Option<SystemTime>,
    header: Option<ChunkFileHeader>,
    ptrs: Vec<(u64, u64)>,
}

#[derive(Debug)]
pub struct FdEntry {
    file: File,
    accesses: AtomicU64,
    in_use: AtomicI64,
    meta: Mutex<ChunkMeta>,
}

impl FdEntry {
    fn new(file: File) -> Self {
        FdEntry {
            file,
            accesses: AtomicU64::new(0),
            in_use: AtomicI64::new(0),
            meta: Mutex::new(ChunkMeta::default()),
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    fn in_use(&self) -> i64 {
        self.in_use.load(Ordering::Acquire)
    }
}

/// A checked-out descriptor. The entry stays pinned while the guard lives.
#[derive(Debug)]
pub struct FdGuard {
    entry: Arc<FdEntry>,
}

impl FdGuard {
    fn pin(entry: Arc<FdEntry>) -> Self {
        entry.accesses.fetch_add(1, Ordering::Relaxed);
        entry.in_use.fetch_add(1, Ordering::AcqRel);
        FdGuard { entry }
    }

    pub fn file(&self) -> &File {
        self.entry.file()
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        self.entry.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct FdCache {
    map: Mutex<FxHashMap<SegmentKey, Arc<FdEntry>>>,
    bracket: RwLock<()>,
    store: Arc<dyn SegmentStore>,
    max_open: usize,
    decrease: usize,
    open_retries: u32,
    open_retry_delay: Duration,
}

impl FdCache {
    pub fn new(store: Arc<dyn SegmentStore>, cfg: &IoConfig) -> Self {
        FdCache {
            map: Mutex::new(FxHashMap::default()),
            bracket: RwLock::new(()),
            store,
            max_open: cfg.effective_max_open_files(),
            decrease: cfg.effective_decrease(),
            open_retries: cfg.open_retries.max(1),
            open_retry_delay: Duration::from_millis(cfg.open_retry_delay_ms),
        }
    }

    /// Held for reading by every worker while it services a request, so
    /// `drop_all` and `purge` wait out in-flight reads.
    pub fn read_bracket(&self) -> RwLockReadGuard<'_, ()> {
        self.bracket.read()
    }

    /// Fetch or open the descriptor for `key`, pinning it. A miss opens the
    /// file under the map lock, evicting cold unpinned entries first if the
    /// cache is at capacity.
    pub fn checkout(&self, key: &SegmentKey) -> io::Result<FdGuard> {
        let mut map = self.map.lock();
        if let Some(entry) = map.get(key) {
            return Ok(FdGuard::pin(Arc::clone(entry)));
        }
        if map.len() >= self.max_open {
            self.evict(&mut map);
        }
        let path = self.store.segment_path(key);
        let file = self.open_with_retry(&path)?;
        let entry = Arc::new(FdEntry::new(file));
        map.insert(*key, Arc::clone(&entry));
        Ok(FdGuard::pin(entry))
    }

    /// Close up to `decrease` unpinned entries, coldest first.
    fn evict(&self, map: &mut FxHashMap<SegmentKey, Arc<FdEntry>>) {
        let mut victims: Vec<(u64, SegmentKey)> = map
            .iter()
            .filter(|(_, entry)| entry.in_use() <= 0)
            .map(|(key, entry)| (entry.accesses(), *key))
            .collect();
        victims.sort_unstable_by_key(|&(accesses, _)| accesses);
        for (_, key) in victims.into_iter().take(self.decrease) {
            map.remove(&key);
        }
    }

    fn open_with_retry(&self, path: &Path) -> io::Result<File> {
        let mut attempt = 0;
        loop {
            match self.store.open(path) {
                Ok(file) => return Ok(file),
                // A missing or malformed path will not heal; fail fast.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput
                    ) =>
                {
                    return Err(e)
                }
                Err(e) => {
                    attempt += 1;
                    if attempt == 1 {
                        warn!(path = %path.display(), error = %e, "segment open failed, retrying");
                    }
                    if attempt >= self.open_retries {
                        return Err(e);
                    }
                    thread::sleep(self.open_retry_delay);
                }
            }
        }
    }

    /// Chunk header and pointers for a checked-out compressed segment,
    /// re-reading them when the file has been rewritten since they were
    /// cached.
    pub fn chunk_meta(
        &self,
        guard: &FdGuard,
    ) -> Result<(ChunkFileHeader, Vec<(u64, u64)>), ChunkError> {
        let mut meta = guard.entry.meta.lock();
        let current = self.store.mtime(guard.file()).ok();
        match meta.header {
            Some(header) if current.is_some() && meta.mtime == current => {
                Ok((header, meta.ptrs.clone()))
            }
            _ => {
                let (header, ptrs) = chunks::read_chunk_pointers(guard.file())?;
                meta.mtime = current;
                meta.header = Some(header);
                meta.ptrs = ptrs.clone();
                Ok((header, ptrs))
            }
        }
    }

    /// Drop the cached header so the next `chunk_meta` re-reads the file.
    /// Readers call this between retries when pointers look stale.
    pub fn invalidate_meta(&self, guard: &FdGuard) {
        let mut meta = guard.entry.meta.lock();
        meta.mtime = None;
        meta.header = None;
        meta.ptrs.clear();
    }

    /// Close every cached descriptor. Waits for in-flight reads to finish.
    pub fn drop_all(&self) {
        let _bracket = self.bracket.write();
        self.map.lock().clear();
    }

    /// Close the descriptors for specific segments, returning how many were
    /// cached. Waits for in-flight reads to finish.
    pub fn purge(&self, keys: &[SegmentKey]) -> usize {
        let _bracket = self.bracket.write();
        let mut map = self.map.lock();
        keys.iter().filter(|key| map.remove(key).is_some()).count()
    }

    /// Close every descriptor belonging to the given columns.
    pub fn purge_oids(&self, oids: &[u32]) -> usize {
        let _bracket = self.bracket.write();
        let mut map = self.map.lock();
        let before = map.len();
        map.retain(|key, _| !oids.contains(&key.oid));
        before - map.len()
    }

    pub fn contains(&self, key: &SegmentKey) -> bool {
        self.map.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;
    use crate::types::CompressionKind;

    fn key(oid: u32) -> SegmentKey {
        SegmentKey { oid, dbroot: 1, partition: 0, segment: 0, compression: CompressionKind::None }
    }

    fn store_with_segments(dir: &Path, oids: &[u32]) -> Arc<LocalStore> {
        let store = Arc::new(LocalStore::new(dir));
        for &oid in oids {
            let path = store.ensure_dir(&key(oid)).unwrap();
            std::fs::write(&path, vec![oid as u8; 64]).unwrap();
        }
        store
    }

    #[test]
    fn checkout_caches_the_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_segments(dir.path(), &[10]);
        let cache = FdCache::new(store, &IoConfig::default());

        let a = cache.checkout(&key(10)).unwrap();
        let b = cache.checkout(&key(10)).unwrap();
        assert_eq!(cache.len(), 1);
        drop(a);
        drop(b);
    }

    #[test]
    fn missing_segments_fail_fast_without_retry_sleeps() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        let cfg = IoConfig::default().with_open_retries(5, 60_000);
        let cache = FdCache::new(store, &cfg);

        let started = std::time::Instant::now();
        let err = cache.checkout(&key(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn eviction_closes_the_coldest_unpinned_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_segments(dir.path(), &[1, 2, 3]);
        let cfg = IoConfig::default().with_max_open_files(2).with_decrease_open_files(1);
        let cache = FdCache::new(store, &cfg);

        drop(cache.checkout(&key(1)).unwrap());
        drop(cache.checkout(&key(2)).unwrap());
        // Re-touch 1 so 2 is the coldest.
        drop(cache.checkout(&key(1)).unwrap());

        drop(cache.checkout(&key(3)).unwrap());
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn pinned_entries_are_never_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_segments(dir.path(), &[1, 2, 3]);
        let cfg = IoConfig::default().with_max_open_files(2).with_decrease_open_files(2);
        let cache = FdCache::new(store, &cfg);

        let pinned = cache.checkout(&key(1)).unwrap();
        drop(cache.checkout(&key(2)).unwrap());
        drop(cache.checkout(&key(3)).unwrap());

        assert!(cache.contains(&key(1)));
        drop(pinned);
    }

    #[test]
    fn chunk_meta_parses_and_caches_compressed_headers() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        let mut k = key(50);
        k.compression = CompressionKind::Lz4;
        let path = store.ensure_dir(&k).unwrap();
        chunks::write_chunked_file(&path, CompressionKind::Lz4, 8, &vec![3u8; 20_000]).unwrap();

        let cache = FdCache::new(store, &IoConfig::default());
        let guard = cache.checkout(&k).unwrap();
        let (header, ptrs) = cache.chunk_meta(&guard).unwrap();
        assert_eq!(header.compression, CompressionKind::Lz4);
        assert_eq!(ptrs.len(), 1);

        // Second call serves from the cached copy.
        let (again, _) = cache.chunk_meta(&guard).unwrap();
        assert_eq!(again, header);
    }

    #[test]
    fn invalidate_forces_a_header_reread() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        let mut k = key(51);
        k.compression = CompressionKind::Lz4;
        let path = store.ensure_dir(&k).unwrap();
        chunks::write_chunked_file(&path, CompressionKind::Lz4, 8, &vec![1u8; 10_000]).unwrap();

        let cache = FdCache::new(store, &IoConfig::default());
        let guard = cache.checkout(&k).unwrap();
        let (_, ptrs) = cache.chunk_meta(&guard).unwrap();
        assert_eq!(ptrs.len(), 1);

        // Rewrite the file with more chunks, then invalidate.
        let bigger = vec![2u8; chunks::CHUNK_SPAN + 100];
        chunks::write_chunked_file(&path, CompressionKind::Lz4, 8, &bigger).unwrap();
        cache.invalidate_meta(&guard);
        let (_, ptrs) = cache.chunk_meta(&guard).unwrap();
        assert_eq!(ptrs.len(), 2);
    }

    #[test]
    fn purge_and_drop_all_empty_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_segments(dir.path(), &[1, 2, 3]);
        let cache = FdCache::new(store, &IoConfig::default());
        for oid in [1, 2, 3] {
            drop(cache.checkout(&key(oid)).unwrap());
        }

        assert_eq!(cache.purge(&[key(2)]), 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_oids(&[1]), 1);
        assert_eq!(cache.len(), 1);
        cache.drop_all();
        assert!(cache.is_empty());
    }
}
