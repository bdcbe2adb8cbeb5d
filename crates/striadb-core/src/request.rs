//! Block read requests and the queue feeding the reader pool.
//!
//! A [`FileRequest`] carries everything a worker needs to locate and read a
//! run of blocks, plus a completion latch the submitter waits on. Completion
//! happens exactly once: the status, message and counters are stored before
//! the condition variable fires, and any later attempt to complete the same
//! request is ignored.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::types::CompressionKind;

/// Outcome of a read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Not completed yet.
    Pending,
    /// All requested blocks were read.
    Ok,
    /// The logical block could not be resolved to a segment file.
    LookupError,
    /// The requested version predates the oldest snapshot still resolvable.
    SnapshotTooOld,
    /// The segment file could not be opened.
    OpenError,
    /// A block or chunk read failed after retries.
    ReadError,
    /// A chunk failed its checksum or could not be decompressed after retries.
    DecompressError,
}

#[derive(Debug)]
struct Completion {
    done: bool,
    status: RequestStatus,
    message: String,
    blocks_read: usize,
    blocks_loaded: usize,
    payload: Option<Vec<u8>>,
}

/// A request for `block_count` consecutive blocks starting at `lbid`, read
/// as of version `ver`.
#[derive(Debug)]
pub struct FileRequest {
    /// First logical block id of the run.
    pub lbid: u64,
    /// Snapshot version the caller is reading at.
    pub ver: u64,
    /// Transaction id of the caller, for version resolution.
    pub txn: u64,
    /// Whether version substitution may apply to this read.
    pub versioned: bool,
    /// Compression of the backing segment file.
    pub compression: CompressionKind,
    /// Number of consecutive blocks to read.
    pub block_count: usize,
    /// Insert the blocks into the shared cache on success.
    pub use_cache: bool,
    state: Mutex<Completion>,
    ready: Condvar,
}

impl FileRequest {
    pub fn new(lbid: u64, ver: u64, block_count: usize) -> Self {
        FileRequest {
            lbid,
            ver,
            txn: 0,
            versioned: false,
            compression: CompressionKind::None,
            block_count,
            use_cache: true,
            state: Mutex::new(Completion {
                done: false,
                status: RequestStatus::Pending,
                message: String::new(),
                blocks_read: 0,
                blocks_loaded: 0,
                payload: None,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn with_txn(mut self, txn: u64) -> Self {
        self.txn = txn;
        self
    }

    pub fn with_versioned(mut self, versioned: bool) -> Self {
        self.versioned = versioned;
        self
    }

    pub fn with_compression(mut self, compression: CompressionKind) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Mark the request successful. The payload carries the block data for
    /// single-block reads; multi-block reads deliver through the cache.
    pub fn complete_ok(&self, blocks_read: usize, blocks_loaded: usize, payload: Option<Vec<u8>>) {
        let mut c = self.state.lock();
        if c.done {
            return;
        }
        c.status = RequestStatus::Ok;
        c.blocks_read = blocks_read;
        c.blocks_loaded = blocks_loaded;
        c.payload = payload;
        c.done = true;
        drop(c);
        self.ready.notify_all();
    }

    /// Mark the request failed. The first completion wins.
    pub fn complete_error(&self, status: RequestStatus, message: String) {
        let mut c = self.state.lock();
        if c.done {
            return;
        }
        c.status = status;
        c.message = message;
        c.done = true;
        drop(c);
        self.ready.notify_all();
    }

    /// Block until the request completes, then return its status.
    pub fn wait(&self) -> RequestStatus {
        let mut c = self.state.lock();
        while !c.done {
            self.ready.wait(&mut c);
        }
        c.status
    }

    pub fn status(&self) -> RequestStatus {
        self.state.lock().status
    }

    pub fn message(&self) -> String {
        self.state.lock().message.clone()
    }

    pub fn blocks_read(&self) -> usize {
        self.state.lock().blocks_read
    }

    pub fn blocks_loaded(&self) -> usize {
        self.state.lock().blocks_loaded
    }

    /// Take the single-block payload, leaving `None` behind.
    pub fn take_payload(&self) -> Option<Vec<u8>> {
        self.state.lock().payload.take()
    }
}

/// Unbounded FIFO of pending requests. Producers push, reader threads block
/// on `pop` until work arrives.
pub struct RequestQueue {
    inner: Mutex<VecDeque<Arc<FileRequest>>>,
    available: Condvar,
}

impl RequestQueue {
    pub fn new() -> Self {
        RequestQueue {
            inner: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, req: Arc<FileRequest>) {
        self.inner.lock().push_back(req);
        self.available.notify_one();
    }

    /// Block until a request is available.
    pub fn pop(&self) -> Arc<FileRequest> {
        let mut q = self.inner.lock();
        loop {
            if let Some(req) = q.pop_front() {
                return req;
            }
            self.available.wait(&mut q);
        }
    }

    pub fn try_pop(&self) -> Option<Arc<FileRequest>> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_after_completion_from_another_thread() {
        let req = Arc::new(FileRequest::new(100, 7, 4));
        let waiter = Arc::clone(&req);
        let handle = thread::spawn(move || waiter.wait());

        thread::sleep(Duration::from_millis(20));
        req.complete_ok(4, 4, None);

        assert_eq!(handle.join().unwrap(), RequestStatus::Ok);
        assert_eq!(req.blocks_read(), 4);
        assert_eq!(req.blocks_loaded(), 4);
    }

    #[test]
    fn first_completion_wins() {
        let req = FileRequest::new(1, 1, 1);
        req.complete_error(RequestStatus::ReadError, "short read".into());
        req.complete_ok(1, 1, Some(vec![0u8; 8]));

        assert_eq!(req.status(), RequestStatus::ReadError);
        assert_eq!(req.message(), "short read");
        assert!(req.take_payload().is_none());
    }

    #[test]
    fn status_is_visible_as_soon_as_wait_returns() {
        let req = Arc::new(FileRequest::new(55, 3, 1));
        let waiter = Arc::clone(&req);
        let handle = thread::spawn(move || {
            let status = waiter.wait();
            (status, waiter.message())
        });

        req.complete_error(RequestStatus::SnapshotTooOld, "version 3 below floor 9".into());
        let (status, message) = handle.join().unwrap();
        assert_eq!(status, RequestStatus::SnapshotTooOld);
        assert_eq!(message, "version 3 below floor 9");
    }

    #[test]
    fn queue_delivers_in_fifo_order_across_threads() {
        let queue = Arc::new(RequestQueue::new());
        let consumer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            let first = consumer.pop();
            let second = consumer.pop();
            (first.lbid, second.lbid)
        });

        thread::sleep(Duration::from_millis(10));
        queue.push(Arc::new(FileRequest::new(10, 1, 1)));
        queue.push(Arc::new(FileRequest::new(20, 1, 1)));

        assert_eq!(handle.join().unwrap(), (10, 20));
        assert!(queue.is_empty());
    }

    #[test]
    fn try_pop_does_not_block_on_an_empty_queue() {
        let queue = RequestQueue::new();
        assert!(queue.try_pop().is_none());
        queue.push(Arc::new(FileRequest::new(5, 1, 1)));
        assert_eq!(queue.try_pop().map(|r| r.lbid), Some(5));
    }
}
