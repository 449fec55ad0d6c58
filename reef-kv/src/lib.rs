//! # Reef KV
//!
//! Key-value read interface consumed by the Reef online fetch path.
//!
//! This crate defines the `KvStore` trait that apps implement to plug a
//! key-value backend into the fetcher. The trait is deliberately narrow:
//! the fetch path only ever issues one batched `multi_get` per call, so
//! that is the whole surface.
//!
//! ## Implementations
//!
//! Apps provide their own implementations (Cassandra, Bigtable, Redis, ...).
//! This crate ships `MemoryKvStore`, an in-memory implementation used by
//! tests and in-process deployments.

pub mod dataset;
pub mod error;
pub mod store;

pub use dataset::{batch_dataset, sanitize, streaming_dataset, METADATA_DATASET};
pub use error::{Error, Result};
pub use store::{FailingKvStore, GetRequest, GetResponse, KvStore, MemoryKvStore, TimedValue};
