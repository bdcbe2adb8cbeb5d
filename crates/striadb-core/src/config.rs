//! Tuning knobs for the block reader pool and its caches.

use serde::{Deserialize, Serialize};

/// Hard ceiling on reader threads; requests beyond this are clamped.
pub const MAX_READER_THREADS: usize = 256;

/// Configuration for the I/O manager, the descriptor cache and the retry
/// policy. All fields have workable defaults; tests and embedders override
/// the ones they care about through the `with_*` builders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    /// Worker threads servicing the request queue. Clamped to 1..=256.
    pub reader_threads: usize,
    /// Blocks fetched per multi-block request when the caller does not say.
    pub blocks_per_read: usize,
    /// Descriptor cache capacity before eviction kicks in.
    pub max_open_files: usize,
    /// Descriptors closed per eviction sweep. Capped at 75% of the maximum.
    pub decrease_open_files: usize,
    /// Attempts to open a segment file before giving up.
    pub open_retries: u32,
    /// Delay between open attempts, in milliseconds.
    pub open_retry_delay_ms: u64,
    /// Ceiling on transient read retries (stale headers, short reads,
    /// corrupt chunks) for a single chunk fetch.
    pub max_transient_retries: u32,
    /// Base of the linear backoff between transient retries, in microseconds.
    /// Attempt n sleeps n times this long.
    pub retry_backoff_us: u64,
    /// Emit a debug line per request as it is picked up.
    pub trace_io: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            reader_threads: 8,
            blocks_per_read: 16,
            max_open_files: 16_384,
            decrease_open_files: 4_096,
            open_retries: 5,
            open_retry_delay_ms: 1_000,
            max_transient_retries: 30,
            retry_backoff_us: 5_000,
            trace_io: false,
        }
    }
}

impl IoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reader_threads(mut self, threads: usize) -> Self {
        self.reader_threads = threads;
        self
    }

    pub fn with_blocks_per_read(mut self, blocks: usize) -> Self {
        self.blocks_per_read = blocks;
        self
    }

    pub fn with_max_open_files(mut self, max: usize) -> Self {
        self.max_open_files = max;
        self
    }

    pub fn with_decrease_open_files(mut self, decrease: usize) -> Self {
        self.decrease_open_files = decrease;
        self
    }

    pub fn with_max_transient_retries(mut self, retries: u32) -> Self {
        self.max_transient_retries = retries;
        self
    }

    pub fn with_retry_backoff_us(mut self, backoff: u64) -> Self {
        self.retry_backoff_us = backoff;
        self
    }

    pub fn with_open_retries(mut self, retries: u32, delay_ms: u64) -> Self {
        self.open_retries = retries;
        self.open_retry_delay_ms = delay_ms;
        self
    }

    pub fn with_trace_io(mut self, trace: bool) -> Self {
        self.trace_io = trace;
        self
    }

    /// Reader thread count after clamping to the supported range.
    pub fn effective_reader_threads(&self) -> usize {
        self.reader_threads.clamp(1, MAX_READER_THREADS)
    }

    /// Descriptor cache capacity, never zero.
    pub fn effective_max_open_files(&self) -> usize {
        self.max_open_files.max(1)
    }

    /// Eviction sweep size, capped at three quarters of the capacity so a
    /// sweep can never empty the cache outright.
    pub fn effective_decrease(&self) -> usize {
        let cap = self.effective_max_open_files() * 3 / 4;
        self.decrease_open_files.clamp(1, cap.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_threads_clamp_to_the_supported_range() {
        assert_eq!(IoConfig::new().with_reader_threads(0).effective_reader_threads(), 1);
        assert_eq!(IoConfig::new().with_reader_threads(9_999).effective_reader_threads(), 256);
        assert_eq!(IoConfig::new().with_reader_threads(32).effective_reader_threads(), 32);
    }

    #[test]
    fn eviction_sweep_never_exceeds_three_quarters_of_capacity() {
        let cfg = IoConfig::new().with_max_open_files(100).with_decrease_open_files(90);
        assert_eq!(cfg.effective_decrease(), 75);

        let cfg = IoConfig::new().with_max_open_files(100).with_decrease_open_files(10);
        assert_eq!(cfg.effective_decrease(), 10);

        let cfg = IoConfig::new().with_max_open_files(1).with_decrease_open_files(0);
        assert_eq!(cfg.effective_decrease(), 1);
    }

    #[test]
    fn defaults_round_trip_through_serde() {
        let cfg = IoConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: IoConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_open_files, cfg.max_open_files);
        assert_eq!(back.retry_backoff_us, cfg.retry_backoff_us);
    }
}
