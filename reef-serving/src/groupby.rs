//! Group-by fetcher
//!
//! For each request: resolve serving info, encode keys (with the coercion
//! fallback), plan one batch read plus — for temporal feature sets — one
//! streaming-range read, issue a single batched multi-get over the union,
//! then decode and aggregate per request in parallel on the worker pool.
//!
//! Identical reads across the request batch are issued once; requests
//! locate their results by `(dataset, key)` identity. Every request gets an
//! independent outcome — a failure never poisons siblings.

use crate::cache::ServingInfoCache;
use crate::error::FetchError;
use crate::request::{now_millis, Request, Response};
use crate::serving_info::ServingInfo;
use reef_codec::{coerce_keys, IrCodec, Value};
use reef_kv::{GetRequest, GetResponse, KvStore, TimedValue};
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// One planned request: resolved serving info plus slots into the shared
/// multi-get.
struct Planned {
    info: Arc<ServingInfo>,
    batch_slot: usize,
    streaming_slot: Option<usize>,
}

/// Fetches group-by requests against the key-value store.
#[derive(Debug)]
pub struct GroupByFetcher {
    kv: Arc<dyn KvStore>,
    serving_info: Arc<ServingInfoCache>,
    workers: Arc<Semaphore>,
}

impl GroupByFetcher {
    /// Create a fetcher.
    pub fn new(
        kv: Arc<dyn KvStore>,
        serving_info: Arc<ServingInfoCache>,
        workers: Arc<Semaphore>,
    ) -> Self {
        Self {
            kv,
            serving_info,
            workers,
        }
    }

    /// The serving-info cache (shared with the join layer and sampler).
    pub fn serving_info(&self) -> &Arc<ServingInfoCache> {
        &self.serving_info
    }

    /// Fetch a batch of group-by requests. Infallible over the batch: every
    /// request resolves to a Response carrying values or a failure.
    pub async fn fetch(&self, requests: Vec<Request>) -> Vec<Response> {
        // Resolve serving info up front (the only per-request suspension
        // before the bulk read; cache hits return synchronously).
        let infos = futures::future::join_all(
            requests.iter().map(|r| self.serving_info.get(&r.name)),
        )
        .await;

        // Plan reads, coalescing identical (dataset, key) pairs.
        let mut kv_requests: Vec<GetRequest> = Vec::new();
        let mut slots: HashMap<GetRequest, usize> = HashMap::new();
        let mut plans: Vec<Result<Planned, FetchError>> = Vec::with_capacity(requests.len());

        for (request, info) in requests.iter().zip(infos) {
            plans.push(info.and_then(|info| {
                let key_bytes = encode_keys(&info, request)?;
                let batch_slot = intern(
                    &mut kv_requests,
                    &mut slots,
                    GetRequest::new(info.batch_dataset(), key_bytes.clone()),
                );
                let streaming_slot = info.is_temporal().then(|| {
                    intern(
                        &mut kv_requests,
                        &mut slots,
                        GetRequest::after(
                            info.streaming_dataset(),
                            key_bytes,
                            info.batch_end_millis(),
                        ),
                    )
                });
                Ok(Planned {
                    info,
                    batch_slot,
                    streaming_slot,
                })
            }));
        }

        // One batched read for the whole request batch.
        let kv_responses: Result<Vec<GetResponse>, FetchError> = if kv_requests.is_empty() {
            Ok(Vec::new())
        } else {
            self.kv
                .multi_get(kv_requests.clone())
                .await
                .map_err(FetchError::kv)
        };

        let kv_responses = match kv_responses {
            Ok(responses) => responses,
            Err(e) => {
                // Wholesale failure surfaces on every response; planning
                // failures keep their more specific error.
                return requests
                    .into_iter()
                    .zip(plans)
                    .map(|(request, plan)| match plan {
                        Err(planning) => Response::failed(request, planning),
                        Ok(_) => Response::failed(request, e.clone()),
                    })
                    .collect();
            }
        };

        // Locate results by request identity (stores may reorder), then
        // lay them out in slot order for the planned lookups.
        let by_identity: HashMap<&GetRequest, &GetResponse> =
            kv_responses.iter().map(|r| (&r.request, r)).collect();
        let ordered: Vec<Option<&GetResponse>> = kv_requests
            .iter()
            .map(|request| by_identity.get(request).copied())
            .collect();
        let kv_responses = &ordered;
        futures::future::join_all(requests.into_iter().zip(plans).map(|(request, plan)| {
            async move {
                let _permit = self
                    .workers
                    .acquire()
                    .await
                    .expect("worker semaphore closed");
                match plan {
                    Err(e) => Response::failed(request, e),
                    Ok(planned) => self.complete(request, planned, kv_responses).await,
                }
            }
        }))
        .await
    }

    /// Construct one response from its share of the multi-get.
    async fn complete(
        &self,
        request: Request,
        planned: Planned,
        kv_responses: &[Option<&GetResponse>],
    ) -> Response {
        let Planned {
            mut info,
            batch_slot,
            streaming_slot,
        } = planned;
        let name = request.name.clone();

        let Some(batch_response) = kv_responses.get(batch_slot).copied().flatten() else {
            return Response::failed(request, FetchError::BatchMissing(name));
        };
        let batch_values = match &batch_response.values {
            Ok(values) => values,
            Err(e) => return Response::failed(request, FetchError::kv(e)),
        };

        // Among multiple stored versions, only the newest is current.
        let newest = batch_values.iter().max_by_key(|v| v.millis);

        // A batch value newer than the cached batch end means the serving
        // info is stale: a fresh snapshot landed since we cached it.
        if let Some(value) = newest {
            if value.millis > info.batch_end_millis() {
                debug!(
                    group_by = %name,
                    batch_millis = value.millis,
                    cached_end = info.batch_end_millis(),
                    "batch value newer than cached serving info; forcing refresh"
                );
                match self.serving_info.force(&name).await {
                    Ok(fresh) => info = fresh,
                    Err(e) => warn!(
                        group_by = %name,
                        error = %e,
                        "forced refresh failed; proceeding with stale serving info"
                    ),
                }
            }
        }

        // A newest value older than the batch end is a stale bulk upload
        // that was never pruned; treat the batch input as absent.
        let batch_value = newest.filter(|v| v.millis >= info.batch_end_millis());

        let values = match (&info.meta.aggregations, info.is_temporal()) {
            (None, _) => no_agg_values(&info, batch_value),
            (Some(_), false) => snapshot_values(&info, batch_value),
            (Some(_), true) => {
                temporal_values(&info, &request, batch_value, streaming_slot, kv_responses)
            }
        };
        match values {
            Ok(values) => Response::ok(request, values),
            Err(e) => Response::failed(request, e),
        }
    }
}

/// Intern a read into the shared multi-get, coalescing duplicates.
fn intern(
    kv_requests: &mut Vec<GetRequest>,
    slots: &mut HashMap<GetRequest, usize>,
    request: GetRequest,
) -> usize {
    match slots.get(&request) {
        Some(&slot) => slot,
        None => {
            let slot = kv_requests.len();
            slots.insert(request.clone(), slot);
            kv_requests.push(request);
            slot
        }
    }
}

/// Encode entity keys, falling back to declared-type coercion.
fn encode_keys(info: &ServingInfo, request: &Request) -> Result<Vec<u8>, FetchError> {
    let primary = match info.key_codec.encode_map(&request.keys) {
        Ok(bytes) => return Ok(bytes),
        Err(e) => e,
    };
    let encode_keys_error = |fallback: &dyn std::fmt::Display| FetchError::EncodeKeys {
        name: request.name.clone(),
        primary: primary.to_string(),
        fallback: fallback.to_string(),
    };
    let coerced = coerce_keys(&request.keys, info.key_codec.schema())
        .map_err(|e| encode_keys_error(&e))?;
    info.key_codec
        .encode_map(&coerced)
        .map_err(|e| encode_keys_error(&e))
}

/// Output map with every column null (no batch snapshot yet for a
/// non-temporal feature set).
fn null_values(info: &ServingInfo) -> FxHashMap<String, Value> {
    info.output_codec
        .schema()
        .field_names()
        .map(|name| (name.to_string(), Value::Null))
        .collect()
}

/// No-agg path: raw selection, decoded with the selected codec.
fn no_agg_values(
    info: &ServingInfo,
    batch_value: Option<&TimedValue>,
) -> Result<FxHashMap<String, Value>, FetchError> {
    match batch_value {
        Some(value) => info
            .selected_codec
            .decode_map(&value.bytes)
            .map_err(|e| FetchError::decode(info.name(), e)),
        None => Ok(null_values(info)),
    }
}

/// Snapshot path: the batch pipeline stored finalized outputs.
fn snapshot_values(
    info: &ServingInfo,
    batch_value: Option<&TimedValue>,
) -> Result<FxHashMap<String, Value>, FetchError> {
    match batch_value {
        Some(value) => info
            .output_codec
            .decode_map(&value.bytes)
            .map_err(|e| FetchError::decode(info.name(), e)),
        None => Ok(null_values(info)),
    }
}

/// Temporal path: batch IR merged with streaming rows at query time.
fn temporal_values(
    info: &ServingInfo,
    request: &Request,
    batch_value: Option<&TimedValue>,
    streaming_slot: Option<usize>,
    kv_responses: &[Option<&GetResponse>],
) -> Result<FxHashMap<String, Value>, FetchError> {
    let aggregator = info
        .aggregator
        .as_ref()
        .expect("temporal path requires an aggregator");

    let batch_ir = batch_value
        .map(|value| {
            let mut ir =
                IrCodec::decode(&value.bytes).map_err(|e| FetchError::decode(info.name(), e))?;
            aggregator
                .denormalize(&mut ir)
                .map_err(|e| FetchError::decode(info.name(), e))?;
            Ok::<_, FetchError>(ir)
        })
        .transpose()?;

    let streaming_values: &[TimedValue] = match streaming_slot {
        Some(slot) => {
            let response = kv_responses
                .get(slot)
                .copied()
                .flatten()
                .ok_or_else(|| FetchError::kv("streaming response missing"))?;
            match &response.values {
                Ok(values) => values,
                Err(e) => return Err(FetchError::kv(e)),
            }
        }
        None => &[],
    };

    // Post-snapshot rows only; anything older is covered by the batch IR.
    let batch_end = info.batch_end_millis();
    let is_mutation = info.is_mutation_source();
    let rows = streaming_values
        .iter()
        .filter(|v| v.millis >= batch_end)
        .map(|v| {
            if is_mutation {
                info.mutation_codec.decode(&v.bytes)
            } else {
                info.selected_codec.decode_event(&v.bytes, v.millis)
            }
        });

    let query_millis = request.at_millis.unwrap_or_else(now_millis);
    let outputs = aggregator
        .lambda_aggregate_finalized(batch_ir.as_ref(), rows, query_millis, is_mutation)
        .map_err(|e| match e {
            reef_sawtooth::Error::Decode(inner) => FetchError::decode(info.name(), inner),
            other => FetchError::aggregate(info.name(), other),
        })?;

    Ok(aggregator
        .output_schema()
        .field_names()
        .map(str::to_string)
        .zip(outputs)
        .collect())
}
