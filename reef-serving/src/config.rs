//! Fetcher configuration

use std::time::Duration;

/// Upper bound on fan-out workers regardless of core count.
pub const MAX_FAN_OUT_WORKERS: usize = 16;

/// Default overall fetch deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default TTL for cached serving info and join configs.
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(600);

/// Configuration for the top-level fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Maximum number of requests decoded/aggregated concurrently.
    ///
    /// This bounds CPU-side work per fetch call; the key-value fan-out
    /// itself is a single batched multi-get.
    ///
    /// Default: `min(available_parallelism, 16)`
    pub fan_out_workers: usize,

    /// Overall deadline per fetch call. On expiry every unfinished request
    /// resolves to a `Timeout` failure; partial progress is discarded.
    pub timeout: Duration,

    /// TTL for cached serving info entries (lazy expiry).
    pub serving_info_ttl: Duration,

    /// TTL for cached join configs and join codecs.
    pub join_ttl: Duration,

    /// Maximum entries held per metadata cache.
    pub metadata_cache_entries: u64,

    /// Log every response-logging failure instead of ~1%.
    pub debug_sampling: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        Self {
            fan_out_workers: parallelism.min(MAX_FAN_OUT_WORKERS).max(1),
            timeout: DEFAULT_TIMEOUT,
            serving_info_ttl: DEFAULT_METADATA_TTL,
            join_ttl: DEFAULT_METADATA_TTL,
            metadata_cache_entries: 10_000,
            debug_sampling: false,
        }
    }
}

impl FetcherConfig {
    /// Set the worker bound.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.fan_out_workers = workers.max(1);
        self
    }

    /// Set the overall fetch deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set both metadata TTLs.
    pub fn with_metadata_ttl(mut self, ttl: Duration) -> Self {
        self.serving_info_ttl = ttl;
        self.join_ttl = ttl;
        self
    }

    /// Enable per-failure sampler logging.
    pub fn with_debug_sampling(mut self) -> Self {
        self.debug_sampling = true;
        self
    }
}
