//! The block reader pool.
//!
//! A fixed set of worker threads drains a shared request queue. Each request
//! is resolved to a segment file, read under a block range lock, versioned,
//! and loaded into the shared cache before the submitter is signalled. The
//! range lock is released before the completion signal, and errors travel
//! through the request status, never across the thread boundary.
//!
//! Transient failures on compressed reads (stale chunk pointers after a
//! rewrite, short reads, corrupt chunks) are retried with a linear backoff
//! and a refreshed header; persistent failures surface as `ReadError` or
//! `DecompressError` depending on what gave out.

use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{BlockCache, CacheKey};
use crate::chunks::{self, ChunkError, BLOCK_SIZE, CHUNK_BLOCKS, CHUNK_SPAN};
use crate::config::IoConfig;
use crate::fdcache::{FdCache, FdGuard};
use crate::request::{FileRequest, RequestQueue, RequestStatus};
use crate::resolver::{BlockLocation, BlockResolver, RangeLockGuard, ResolveError};
use crate::storage::{SegmentKey, SegmentStore};
use crate::types::CompressionKind;

pub struct IoManager {
    cfg: IoConfig,
    queue: Arc<RequestQueue>,
    fd_cache: Arc<FdCache>,
    /// Workers run for the life of the process; the handles are kept only
    /// so the pool owns its threads.
    _workers: Vec<JoinHandle<()>>,
}

struct WorkerCtx {
    cfg: IoConfig,
    queue: Arc<RequestQueue>,
    resolver: Arc<dyn BlockResolver>,
    cache: Arc<dyn BlockCache>,
    fd_cache: Arc<FdCache>,
}

impl IoManager {
    /// Spawn the reader pool. The thread count comes from the config,
    /// clamped to the supported range.
    pub fn start(
        cfg: IoConfig,
        resolver: Arc<dyn BlockResolver>,
        store: Arc<dyn SegmentStore>,
        cache: Arc<dyn BlockCache>,
    ) -> io::Result<IoManager> {
        let queue = Arc::new(RequestQueue::new());
        let fd_cache = Arc::new(FdCache::new(store, &cfg));
        let threads = cfg.effective_reader_threads();
        info!(threads, "starting block reader pool");

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let ctx = WorkerCtx {
                cfg: cfg.clone(),
                queue: Arc::clone(&queue),
                resolver: Arc::clone(&resolver),
                cache: Arc::clone(&cache),
                fd_cache: Arc::clone(&fd_cache),
            };
            let handle = thread::Builder::new()
                .name(format!("iom-reader-{i}"))
                .spawn(move || worker_loop(ctx))?;
            workers.push(handle);
        }
        Ok(IoManager { cfg, queue, fd_cache, _workers: workers })
    }

    pub fn submit(&self, req: Arc<FileRequest>) {
        self.queue.push(req);
    }

    /// Split a block range into requests of at most `blocks_per_read` and
    /// submit them all, returning the handles to wait on.
    pub fn submit_range(
        &self,
        first_lbid: u64,
        ver: u64,
        block_count: usize,
        compression: CompressionKind,
    ) -> Vec<Arc<FileRequest>> {
        let per_read = self.cfg.blocks_per_read.max(1);
        let mut reqs = Vec::new();
        let mut lbid = first_lbid;
        let mut remaining = block_count;
        while remaining > 0 {
            let take = remaining.min(per_read);
            let req = Arc::new(
                FileRequest::new(lbid, ver, take).with_compression(compression),
            );
            self.queue.push(Arc::clone(&req));
            reqs.push(req);
            lbid += take as u64;
            remaining -= take;
        }
        reqs
    }

    /// Descriptor cache, for segment invalidation entry points.
    pub fn fd_cache(&self) -> &Arc<FdCache> {
        &self.fd_cache
    }

    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }
}

fn worker_loop(ctx: WorkerCtx) {
    loop {
        let req = ctx.queue.pop();
        // Held for the whole request so descriptor purges wait us out.
        let _bracket = ctx.fd_cache.read_bracket();
        process_request(&ctx, &req);
    }
}

fn process_request(ctx: &WorkerCtx, req: &FileRequest) {
    if ctx.cfg.trace_io {
        debug!(lbid = req.lbid, ver = req.ver, blocks = req.block_count, "picked up read request");
    }
    if req.block_count == 0 {
        req.complete_ok(0, 0, None);
        return;
    }

    let loc = match ctx.resolver.lookup_local(req.lbid, req.ver, req.versioned) {
        Ok(loc) => loc,
        Err(e) => {
            let status = match e {
                ResolveError::SnapshotTooOld { .. } => RequestStatus::SnapshotTooOld,
                ResolveError::Lookup(_) => RequestStatus::LookupError,
            };
            req.complete_error(status, e.to_string());
            return;
        }
    };

    let range_lock = RangeLockGuard::acquire(Arc::clone(&ctx.resolver), req.lbid, req.block_count);
    let outcome = read_and_cache(ctx, req, loc);
    drop(range_lock);

    match outcome {
        Ok((blocks_read, blocks_loaded, payload)) => {
            req.complete_ok(blocks_read, blocks_loaded, payload)
        }
        Err((status, message)) => {
            warn!(lbid = req.lbid, error = %message, "read request failed");
            req.complete_error(status, message);
        }
    }
}

/// Read the request's blocks, resolve their current versions and load the
/// cache. Runs entirely under the caller's range lock.
fn read_and_cache(
    ctx: &WorkerCtx,
    req: &FileRequest,
    loc: BlockLocation,
) -> Result<(usize, usize, Option<Vec<u8>>), (RequestStatus, String)> {
    let key = SegmentKey {
        oid: loc.oid,
        dbroot: loc.dbroot,
        partition: loc.partition,
        segment: loc.segment,
        compression: req.compression,
    };
    let fd = ctx.fd_cache.checkout(&key).map_err(|e| open_failure(&key, e))?;

    let blocks = if req.compression.is_compressed() {
        read_compressed_blocks(ctx, req, &fd, &key, loc)?
    } else {
        read_direct_blocks(&fd, loc, req.block_count)?
    };
    drop(fd);

    let payload = if req.block_count == 1 { blocks.first().cloned() } else { None };
    let blocks_read = blocks.len();
    let mut blocks_loaded = 0;

    if req.use_cache {
        let lbids: Vec<u64> = (0..blocks_read as u64).map(|i| req.lbid + i).collect();
        let versions = ctx
            .resolver
            .block_versions(&lbids)
            .map_err(|e| (RequestStatus::LookupError, e.to_string()))?;
        // Blocks a writer holds locked are in flight; caching them would pin
        // a version that is about to change.
        let entries: Vec<(CacheKey, Vec<u8>)> = lbids
            .iter()
            .zip(versions)
            .zip(blocks)
            .filter(|((_, version), _)| !version.locked)
            .map(|((&lbid, version), data)| (CacheKey { lbid, ver: version.ver }, data))
            .collect();
        blocks_loaded = ctx.cache.bulk_insert(entries);
    }
    Ok((blocks_read, blocks_loaded, payload))
}

fn open_failure(key: &SegmentKey, e: io::Error) -> (RequestStatus, String) {
    let detail = match e.kind() {
        io::ErrorKind::NotFound => "segment file missing",
        io::ErrorKind::InvalidInput => "segment path rejected",
        _ => "segment open failed",
    };
    (
        RequestStatus::OpenError,
        format!(
            "{detail} for oid {} dbroot {} partition {} segment {}: {e}",
            key.oid, key.dbroot, key.partition, key.segment
        ),
    )
}

fn read_direct_blocks(
    fd: &FdGuard,
    loc: BlockLocation,
    count: usize,
) -> Result<Vec<Vec<u8>>, (RequestStatus, String)> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let block = loc.block_offset + i as u64;
        let offset = block * BLOCK_SIZE as u64;
        let mut buf = vec![0u8; BLOCK_SIZE];
        // Early EOF on an uncompressed segment will not heal; no retry.
        fd.file().read_exact_at(&mut buf, offset).map_err(|e| {
            (
                RequestStatus::ReadError,
                format!("read of block {block} at offset {offset} failed: {e}"),
            )
        })?;
        out.push(buf);
    }
    Ok(out)
}

fn read_compressed_blocks(
    ctx: &WorkerCtx,
    req: &FileRequest,
    fd: &FdGuard,
    key: &SegmentKey,
    loc: BlockLocation,
) -> Result<Vec<Vec<u8>>, (RequestStatus, String)> {
    let mut out = Vec::with_capacity(req.block_count);
    let mut chunk: Vec<u8> = Vec::new();
    let mut chunk_idx: Option<usize> = None;

    for i in 0..req.block_count {
        let block = loc.block_offset + i as u64;
        let ci = chunks::chunk_index_for_block(block);
        if chunk_idx != Some(ci) {
            // Everything this request still needs from chunk `ci` must be
            // covered by the decompressed bytes, or the fetch retries.
            let in_chunk = CHUNK_BLOCKS - (block as usize % CHUNK_BLOCKS);
            let take = (req.block_count - i).min(in_chunk);
            let last = block + take as u64 - 1;
            let needed = chunks::block_offset_in_chunk(last) + BLOCK_SIZE;
            chunk = fetch_chunk(ctx, fd, key, ci, needed)?;
            chunk_idx = Some(ci);
        }
        let start = chunks::block_offset_in_chunk(block);
        let slice = chunk.get(start..start + BLOCK_SIZE).ok_or_else(|| {
            (
                RequestStatus::ReadError,
                format!("block {block} extends past the {} bytes of chunk {ci}", chunk.len()),
            )
        })?;
        out.push(slice.to_vec());
    }
    Ok(out)
}

/// Fetch and decompress one chunk, retrying transient failures with a linear
/// backoff and a header refresh between attempts.
fn fetch_chunk(
    ctx: &WorkerCtx,
    fd: &FdGuard,
    key: &SegmentKey,
    ci: usize,
    needed: usize,
) -> Result<Vec<u8>, (RequestStatus, String)> {
    let max_retries = ctx.cfg.max_transient_retries;
    let mut attempt: u32 = 0;
    loop {
        match try_fetch_chunk(ctx, fd, key, ci, needed) {
            Ok(chunk) => {
                if attempt > 0 {
                    info!(oid = key.oid, chunk = ci, attempts = attempt + 1,
                        "chunk read succeeded after retry");
                }
                return Ok(chunk);
            }
            Err(e) => {
                attempt += 1;
                if attempt == 1 {
                    warn!(oid = key.oid, chunk = ci, error = %e,
                        "transient chunk read failure, retrying");
                }
                if attempt > max_retries {
                    let status = match e {
                        ChunkError::ChecksumMismatch { .. }
                        | ChunkError::Decode(_)
                        | ChunkError::BadCodecMagic { .. } => RequestStatus::DecompressError,
                        _ => RequestStatus::ReadError,
                    };
                    return Err((
                        status,
                        format!("chunk {ci} of oid {}: {e} ({attempt} attempts)", key.oid),
                    ));
                }
                thread::sleep(Duration::from_micros(
                    ctx.cfg.retry_backoff_us.saturating_mul(attempt as u64),
                ));
                ctx.fd_cache.invalidate_meta(fd);
            }
        }
    }
}

fn try_fetch_chunk(
    ctx: &WorkerCtx,
    fd: &FdGuard,
    key: &SegmentKey,
    ci: usize,
    needed: usize,
) -> Result<Vec<u8>, ChunkError> {
    let (_, ptrs) = ctx.fd_cache.chunk_meta(fd)?;
    let &(offset, len) = ptrs.get(ci).ok_or_else(|| {
        ChunkError::BadPointers(format!(
            "chunk {ci} is beyond the {}-entry pointer area",
            ptrs.len()
        ))
    })?;
    if len as usize > 2 * CHUNK_SPAN {
        return Err(ChunkError::BadPointers(format!(
            "chunk {ci} claims an implausible {len} bytes"
        )));
    }
    let mut raw = vec![0u8; len as usize];
    fd.file().read_exact_at(&mut raw, offset)?;
    let chunk = chunks::decompress_chunk(key.compression, &raw)?;
    if chunk.len() < needed {
        return Err(ChunkError::Decode(format!(
            "chunk {ci} decompressed to {} bytes, {needed} required",
            chunk.len()
        )));
    }
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruBlockCache;
    use crate::resolver::{Extent, ExtentMapResolver};
    use crate::storage::LocalStore;

    fn pool_over(
        dir: &std::path::Path,
        cfg: IoConfig,
    ) -> (IoManager, Arc<ExtentMapResolver>, Arc<LocalStore>, Arc<LruBlockCache>) {
        let resolver = Arc::new(ExtentMapResolver::new());
        let store = Arc::new(LocalStore::new(dir));
        let cache = Arc::new(LruBlockCache::new(1024));
        let pool = IoManager::start(
            cfg,
            Arc::clone(&resolver) as Arc<dyn BlockResolver>,
            Arc::clone(&store) as Arc<dyn SegmentStore>,
            Arc::clone(&cache) as Arc<dyn BlockCache>,
        )
        .unwrap();
        (pool, resolver, store, cache)
    }

    #[test]
    fn submit_range_splits_on_the_configured_read_size() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = IoConfig::default().with_reader_threads(1).with_blocks_per_read(16);
        let (pool, _resolver, _store, _cache) = pool_over(dir.path(), cfg);

        // No extents mapped: every request completes with a lookup error,
        // which is enough to observe the split.
        let reqs = pool.submit_range(1000, 1, 40, CompressionKind::None);
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[0].block_count, 16);
        assert_eq!(reqs[1].block_count, 16);
        assert_eq!(reqs[2].block_count, 8);
        assert_eq!(reqs[2].lbid, 1032);
        for req in &reqs {
            assert_eq!(req.wait(), RequestStatus::LookupError);
        }
    }

    #[test]
    fn single_block_reads_return_their_payload() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = IoConfig::default().with_reader_threads(2);
        let (pool, resolver, store, cache) = pool_over(dir.path(), cfg);

        let key = SegmentKey {
            oid: 900,
            dbroot: 1,
            partition: 0,
            segment: 0,
            compression: CompressionKind::None,
        };
        let path = store.ensure_dir(&key).unwrap();
        let mut data = vec![0u8; 4 * BLOCK_SIZE];
        data[2 * BLOCK_SIZE] = 0xaa;
        std::fs::write(&path, &data).unwrap();
        resolver.add_extent(Extent {
            start_lbid: 5000,
            block_count: 4,
            oid: 900,
            dbroot: 1,
            partition: 0,
            segment: 0,
            first_block: 0,
        });
        resolver.set_block_version(5002, 3, false);

        let req = Arc::new(FileRequest::new(5002, 1, 1));
        pool.submit(Arc::clone(&req));
        assert_eq!(req.wait(), RequestStatus::Ok);

        let payload = req.take_payload().unwrap();
        assert_eq!(payload.len(), BLOCK_SIZE);
        assert_eq!(payload[0], 0xaa);
        assert!(cache.contains(CacheKey { lbid: 5002, ver: 3 }));
    }
}
