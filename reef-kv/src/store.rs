//! The `KvStore` trait and its in-memory implementation
//!
//! The fetch path consumes a key-value store through exactly one operation:
//! a batched `multi_get`. Each `GetRequest` names a dataset and an opaque
//! key, and may scope the read to values stored at or after a timestamp
//! (used for streaming-range reads). The store returns, per request, ALL
//! stored values passing the scope — the caller selects among them.
//!
//! ## Ordering
//!
//! `multi_get` returns responses in request order. Within a response, the
//! order of `TimedValue`s is not specified; callers must select by
//! timestamp, not position.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

/// A single key-value read.
///
/// `after_millis`, when present, requests only values whose storage
/// timestamp is `>= after_millis`. Identity (equality and hash) is over
/// `(dataset, key_bytes)` — the scope is a read option, not part of the key.
#[derive(Clone, Debug)]
pub struct GetRequest {
    /// Dataset (table) to read from
    pub dataset: String,
    /// Opaque binary key
    pub key_bytes: Vec<u8>,
    /// Optional inclusive lower bound on value timestamps
    pub after_millis: Option<i64>,
}

impl GetRequest {
    /// Create a point read over the full history of the key.
    pub fn new(dataset: impl Into<String>, key_bytes: Vec<u8>) -> Self {
        Self {
            dataset: dataset.into(),
            key_bytes,
            after_millis: None,
        }
    }

    /// Create a read scoped to values with `millis >= after_millis`.
    pub fn after(dataset: impl Into<String>, key_bytes: Vec<u8>, after_millis: i64) -> Self {
        Self {
            dataset: dataset.into(),
            key_bytes,
            after_millis: Some(after_millis),
        }
    }
}

impl PartialEq for GetRequest {
    fn eq(&self, other: &Self) -> bool {
        self.dataset == other.dataset && self.key_bytes == other.key_bytes
    }
}

impl Eq for GetRequest {}

impl Hash for GetRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dataset.hash(state);
        self.key_bytes.hash(state);
    }
}

/// One stored value and its storage timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedValue {
    /// Opaque stored blob
    pub bytes: Vec<u8>,
    /// Storage timestamp in epoch millis
    pub millis: i64,
}

impl TimedValue {
    /// Create a timed value
    pub fn new(bytes: Vec<u8>, millis: i64) -> Self {
        Self { bytes, millis }
    }
}

/// Result of one `GetRequest` inside a `multi_get`.
///
/// A per-key failure is carried in `values` so that one bad key does not
/// poison the rest of the batch.
#[derive(Clone, Debug)]
pub struct GetResponse {
    /// The request this response answers
    pub request: GetRequest,
    /// All values passing the request's scope, or a per-key failure
    pub values: Result<Vec<TimedValue>>,
}

/// Key-value store consumed by the fetch path
///
/// Implementations must return responses in request order and must apply
/// the `after_millis` scope server-side where the backend supports it
/// (clients filter defensively either way).
#[async_trait]
pub trait KvStore: Debug + Send + Sync {
    /// Issue a batched read; one response per request, in request order.
    ///
    /// An `Err` here means the batch failed wholesale. Per-key failures are
    /// reported inside the corresponding `GetResponse`.
    async fn multi_get(&self, requests: Vec<GetRequest>) -> Result<Vec<GetResponse>>;
}

/// A simple in-memory key-value store
///
/// Stores every version written for a key (the fetch path's max-timestamp
/// selection is exercised against real multi-version data). Uses interior
/// mutability so tests can seed data through a shared handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    data: Arc<RwLock<HashMap<String, HashMap<Vec<u8>, Vec<TimedValue>>>>>,
}

impl MemoryKvStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value version for `(dataset, key)`. Tests seed data through
    /// a shared clone of the store, so this writes through `&self`.
    pub fn put(&self, dataset: impl Into<String>, key: Vec<u8>, bytes: Vec<u8>, millis: i64) {
        self.data
            .write()
            .expect("RwLock poisoned")
            .entry(dataset.into())
            .or_default()
            .entry(key)
            .or_default()
            .push(TimedValue::new(bytes, millis));
    }

    /// Number of value versions stored for `(dataset, key)`.
    pub fn version_count(&self, dataset: &str, key: &[u8]) -> usize {
        self.data
            .read()
            .expect("RwLock poisoned")
            .get(dataset)
            .and_then(|d| d.get(key))
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn multi_get(&self, requests: Vec<GetRequest>) -> Result<Vec<GetResponse>> {
        let data = self.data.read().expect("RwLock poisoned");
        let responses = requests
            .into_iter()
            .map(|request| {
                let values = data
                    .get(&request.dataset)
                    .and_then(|d| d.get(&request.key_bytes))
                    .map(|versions| {
                        versions
                            .iter()
                            .filter(|v| match request.after_millis {
                                Some(after) => v.millis >= after,
                                None => true,
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                GetResponse {
                    request,
                    values: Ok(values),
                }
            })
            .collect();
        Ok(responses)
    }
}

/// A store that fails every multi-get; for exercising wholesale-failure paths.
#[derive(Debug, Clone, Default)]
pub struct FailingKvStore;

#[async_trait]
impl KvStore for FailingKvStore {
    async fn multi_get(&self, _requests: Vec<GetRequest>) -> Result<Vec<GetResponse>> {
        Err(Error::store("injected failure"))
    }
}
