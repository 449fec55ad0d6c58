//! # Reef Serving
//!
//! The online feature-fetching core: given a batch of requests naming a
//! feature set and entity keys, return up-to-date feature values by
//! combining a periodically-uploaded batch snapshot with post-snapshot
//! streaming rows, aggregated at query time.
//!
//! ## Layers
//!
//! - `Fetcher`: entry point; owns caches, the worker pool and the deadline
//! - `JoinPlanner`: expands joins into group-by requests, dedups, prefixes
//! - `GroupByFetcher`: one batched key-value read per call, then per-request
//!   decode/aggregate on the worker pool
//! - `ServingInfoCache`: TTL cache of per-feature-set metadata with forced
//!   refresh when a batch value outruns the cached batch end
//! - `LoggingSampler`: deterministic response sub-sampling for auditing
//!
//! ## Failure model
//!
//! Failures are values. Each Response carries either the output column map
//! or a `FetchError`; a failure never poisons sibling requests, and the
//! top-level futures are infallible over the batch.
//!
//! ## Example
//!
//! ```ignore
//! use reef_serving::{Fetcher, FetcherConfig, Request};
//!
//! let fetcher = Fetcher::new(kv, FetcherConfig::default());
//! let responses = fetcher.fetch_join(vec![Request::new("checkout", keys)]).await;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod groupby;
pub mod join;
pub mod metadata;
pub mod request;
pub mod sampler;
pub mod serving_info;

pub use cache::{ServingInfoCache, TtlCache};
pub use config::FetcherConfig;
pub use error::FetchError;
pub use fetcher::Fetcher;
pub use groupby::GroupByFetcher;
pub use join::{JoinConfig, JoinPart, JoinPlanner};
pub use metadata::MetadataClient;
pub use request::{Request, Response};
pub use sampler::{
    sample_hash, should_sample, JoinCodec, LogSink, LoggableResponse, LoggingSampler,
    MemoryLogSink, SinkError,
};
pub use serving_info::{Accuracy, DataModel, GroupByMeta, ServingInfo};
