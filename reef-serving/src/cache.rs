//! TTL caches with single-flight loads and forced refresh
//!
//! `TtlCache` is the shared structure behind the serving-info cache, the
//! join-config cache and the join-codec cache: a `moka` cache (TTL expiry
//! is lazy, checked at access) plus a `dashmap` of in-flight loads so that
//! concurrent misses for one key share a single load.
//!
//! Load failures are returned to the caller and never cached — the next
//! access retries immediately. A forced refresh that fails retains the
//! previous entry; whether to proceed with the stale entry is the caller's
//! call.

use crate::error::FetchError;
use crate::metadata::MetadataClient;
use crate::serving_info::ServingInfo;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// In-flight loads are published through a `watch` channel. The map holds
/// only the receiving half: the loading task owns the sender, so if that
/// task is dropped mid-load the channel closes on its own and waiters know
/// to take over. No cleanup hook is needed on the loader side.
type InFlightWatch<V> = tokio::sync::watch::Receiver<Option<Result<V, FetchError>>>;

/// String-keyed TTL cache with single-flight load dedup.
pub struct TtlCache<V: Clone + Send + Sync + 'static> {
    cache: moka::sync::Cache<String, V>,
    in_flight: DashMap<String, InFlightWatch<V>>,
}

impl<V: Clone + Send + Sync + 'static> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("entry_count", &self.cache.entry_count())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    /// Create a cache with per-entry TTL and a max entry count.
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        Self {
            cache: moka::sync::Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_entries)
                .build(),
            in_flight: DashMap::new(),
        }
    }

    /// Get the cached entry, or load and cache it.
    ///
    /// Concurrent callers for the same key share one load. A failed load is
    /// handed to every waiter and not cached.
    pub async fn get_or_load<F, Fut>(&self, name: &str, load: F) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        if let Some(value) = self.cache.get(name) {
            return Ok(value);
        }

        // First miss for the key registers the watch and loads; later
        // misses find the receiver and wait on it instead.
        let mut loader_tx = None;
        let waiting = {
            use dashmap::mapref::entry::Entry;
            match self.in_flight.entry(name.to_string()) {
                Entry::Occupied(entry) => Some(entry.get().clone()),
                Entry::Vacant(entry) => {
                    let (tx, rx) = tokio::sync::watch::channel(None);
                    entry.insert(rx);
                    loader_tx = Some(tx);
                    None
                }
            }
        };

        if let Some(mut rx) = waiting {
            loop {
                if let Some(result) = rx.borrow().as_ref() {
                    return result.clone();
                }
                if rx.changed().await.is_ok() {
                    continue;
                }
                // The loading task went away. Its final value may still sit
                // in the channel; otherwise the registration is stale — drop
                // it (unless someone re-registered) and do the load here.
                if let Some(result) = rx.borrow().as_ref() {
                    return result.clone();
                }
                self.in_flight
                    .remove_if(name, |_, entry| entry.same_channel(&rx));
                break;
            }
        }

        let result = load().await;
        if let Ok(value) = &result {
            self.cache.insert(name.to_string(), value.clone());
        }
        if let Some(tx) = loader_tx {
            // Waiters read the channel before the map: publish the result
            // first, unregister second, so nobody lands in the gap.
            let _ = tx.send(Some(result.clone()));
            self.in_flight.remove(name);
        }
        result
    }

    /// Entry as currently cached, without loading.
    pub fn peek(&self, name: &str) -> Option<V> {
        self.cache.get(name)
    }

    /// Replace an entry unconditionally.
    pub fn insert(&self, name: &str, value: V) {
        self.cache.insert(name.to_string(), value);
    }

    /// Drop an entry.
    pub fn invalidate(&self, name: &str) {
        self.cache.invalidate(name);
    }
}

/// The serving-info cache: TTL + single-flight + forced refresh.
///
/// `force` reloads unconditionally, with two guarantees on top of the
/// generic cache: a reload failure retains the previous entry, and a reload
/// whose `batch_end_millis` regressed is rejected (batch-end is
/// monotonically non-decreasing from the fetcher's point of view).
#[derive(Debug)]
pub struct ServingInfoCache {
    inner: TtlCache<Arc<ServingInfo>>,
    metadata: MetadataClient,
}

impl ServingInfoCache {
    /// Create a cache over a metadata client.
    pub fn new(metadata: MetadataClient, ttl: Duration, max_entries: u64) -> Self {
        Self {
            inner: TtlCache::new(ttl, max_entries),
            metadata,
        }
    }

    /// Cached entry, loading on miss.
    pub async fn get(&self, name: &str) -> Result<Arc<ServingInfo>, FetchError> {
        self.inner
            .get_or_load(name, || self.metadata.load_group_by(name))
            .await
    }

    /// Entry as currently cached, without loading.
    pub fn peek(&self, name: &str) -> Option<Arc<ServingInfo>> {
        self.inner.peek(name)
    }

    /// Unconditional reload.
    ///
    /// On reload failure the previous entry is retained and the failure is
    /// surfaced; the caller decides whether to proceed with the stale entry.
    pub async fn force(&self, name: &str) -> Result<Arc<ServingInfo>, FetchError> {
        let previous = self.inner.peek(name);
        let fresh = self.metadata.load_group_by(name).await?;
        if let Some(prev) = previous {
            if fresh.batch_end_millis() < prev.batch_end_millis() {
                warn!(
                    group_by = name,
                    cached = prev.batch_end_millis(),
                    reloaded = fresh.batch_end_millis(),
                    "refresh returned an older batch end; keeping cached serving info"
                );
                return Ok(prev);
            }
        }
        self.inner.insert(name, fresh.clone());
        Ok(fresh)
    }
}
