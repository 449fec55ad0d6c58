//! Response logging sampler
//!
//! After each successful join fetch, responses are sub-sampled
//! deterministically and re-encoded for auditing: the request keys with the
//! join's unified key codec, the merged values with the concatenated
//! prefixed value codec. Sampled pairs are handed to a caller-installed
//! sink, fire-and-forget.
//!
//! ## Sampling decision
//!
//! The decision must be reproducible offline, so it is documented here
//! precisely: take the request's key values in join-declared key order,
//! concatenate their tagged binary encodings, SHA-256 the bytes, read the
//! first four digest bytes as a little-endian `i32` h, and sample when
//! `abs(h) % 100_000 <= floor(sample_percent * 1000)`. Equal key tuples
//! and equal `sample_percent` decide identically in every process.
//!
//! Logging failures never fail the fetch; they increment a counter
//! (`failure_count`) and log roughly one warning per hundred failures
//! unless debug sampling is on.

use crate::cache::{ServingInfoCache, TtlCache};
use crate::error::FetchError;
use crate::join::JoinConfig;
use crate::request::{now_millis, Response};
use async_trait::async_trait;
use reef_codec::{coerce_keys, row::write_value, Field, RowCodec, Schema, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// One sampled response, re-encoded for the audit stream.
#[derive(Clone, Debug)]
pub struct LoggableResponse {
    /// Request keys encoded with the join's unified key codec
    pub key_bytes: Vec<u8>,
    /// Merged values encoded with the join's value codec; `None` when the
    /// response was a failure
    pub value_bytes: Option<Vec<u8>>,
    /// Join name
    pub join_name: String,
    /// The request's query time, or the wall clock at sampling
    pub at_millis: i64,
}

/// Sink write failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("log sink error: {0}")]
pub struct SinkError(pub String);

/// Caller-installed destination for sampled responses.
#[async_trait]
pub trait LogSink: Debug + Send + Sync {
    /// Accept one sampled response.
    async fn emit(&self, response: LoggableResponse) -> Result<(), SinkError>;
}

/// An in-memory sink collecting emissions; for tests.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    emitted: Mutex<Vec<LoggableResponse>>,
}

impl MemoryLogSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything emitted so far
    pub fn emitted(&self) -> Vec<LoggableResponse> {
        self.emitted.lock().expect("Mutex poisoned").clone()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn emit(&self, response: LoggableResponse) -> Result<(), SinkError> {
        self.emitted.lock().expect("Mutex poisoned").push(response);
        Ok(())
    }
}

/// The unified codec pair for one join's audit stream.
#[derive(Clone, Debug)]
pub struct JoinCodec {
    /// Union key schema across parts, left names, first-appearance order
    pub key_codec: RowCodec,
    /// Concatenated prefixed part output schemas
    pub value_codec: RowCodec,
}

/// Build a join's codec pair from its parts' serving info.
pub(crate) async fn build_join_codec(
    serving_info: &ServingInfoCache,
    config: &JoinConfig,
) -> Result<Arc<JoinCodec>, FetchError> {
    let mut key_fields: Vec<Field> = Vec::new();
    let mut value_fields: Vec<Field> = Vec::new();

    for part in &config.join_parts {
        let info = serving_info.get(&part.group_by).await?;

        // Right key fields translate back to their left names.
        let right_to_left: HashMap<&String, &String> =
            part.key_mapping.iter().map(|(l, r)| (r, l)).collect();
        for field in &info.key_codec.schema().fields {
            let left = right_to_left
                .get(&field.name)
                .map(|l| (*l).clone())
                .unwrap_or_else(|| field.name.clone());
            if !key_fields.iter().any(|f| f.name == left) {
                key_fields.push(Field::new(left, field.data_type.clone()));
            }
        }

        value_fields.extend(
            info.output_codec
                .schema()
                .prefixed(&part.full_prefix())
                .fields,
        );
    }

    Ok(Arc::new(JoinCodec {
        key_codec: RowCodec::new(Schema::new(key_fields)),
        value_codec: RowCodec::new(Schema::new(value_fields)),
    }))
}

/// Order-preserving sampling hash over key values.
pub fn sample_hash(key_values: &[Value]) -> i32 {
    let mut buf = Vec::with_capacity(key_values.len() * 16);
    for value in key_values {
        write_value(&mut buf, value);
    }
    let digest = Sha256::digest(&buf);
    i32::from_le_bytes(digest[..4].try_into().expect("digest is 32 bytes"))
}

/// The sampling decision for a hash and a percent.
pub fn should_sample(hash: i32, sample_percent: f64) -> bool {
    if sample_percent <= 0.0 {
        return false;
    }
    let threshold = (sample_percent * 1000.0).floor() as i64;
    (hash as i64).abs() % 100_000 <= threshold
}

/// Samples and emits join responses.
#[derive(Debug)]
pub struct LoggingSampler {
    sink: Arc<dyn LogSink>,
    serving_info: Arc<ServingInfoCache>,
    codecs: TtlCache<Arc<JoinCodec>>,
    failures: Arc<AtomicU64>,
    debug_sampling: bool,
}

impl LoggingSampler {
    /// Create a sampler over a sink.
    pub fn new(
        sink: Arc<dyn LogSink>,
        serving_info: Arc<ServingInfoCache>,
        codec_ttl: Duration,
        max_entries: u64,
        debug_sampling: bool,
    ) -> Self {
        Self {
            sink,
            serving_info,
            codecs: TtlCache::new(codec_ttl, max_entries),
            failures: Arc::new(AtomicU64::new(0)),
            debug_sampling,
        }
    }

    /// Number of logging failures since startup.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Consider one join response for the audit stream.
    pub async fn process(&self, config: &JoinConfig, response: &Response) {
        if config.sample_percent <= 0.0 {
            return;
        }
        let codec = match self
            .codecs
            .get_or_load(&config.name, || {
                build_join_codec(&self.serving_info, config)
            })
            .await
        {
            Ok(codec) => codec,
            Err(e) => {
                self.record_failure(&e);
                return;
            }
        };

        let key_values: Vec<Value> = codec
            .key_codec
            .schema()
            .field_names()
            .map(|name| {
                response
                    .request
                    .keys
                    .get(name)
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect();
        if !should_sample(sample_hash(&key_values), config.sample_percent) {
            return;
        }

        let key_bytes = match encode_keys(&codec.key_codec, &response.request.keys) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.record_failure(&e);
                return;
            }
        };
        let value_bytes = match &response.values {
            Ok(values) => {
                let row: BTreeMap<String, Value> =
                    values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                match codec.value_codec.encode_map(&row) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        self.record_failure(&e);
                        return;
                    }
                }
            }
            Err(_) => None,
        };

        let loggable = LoggableResponse {
            key_bytes,
            value_bytes,
            join_name: config.name.clone(),
            at_millis: response.request.at_millis.unwrap_or_else(now_millis),
        };

        let sink = self.sink.clone();
        let failures = self.failures.clone();
        let debug_sampling = self.debug_sampling;
        tokio::spawn(async move {
            if let Err(e) = sink.emit(loggable).await {
                note_failure(&failures, debug_sampling, &e);
            }
        });
    }

    fn record_failure(&self, err: &dyn std::fmt::Display) {
        note_failure(&self.failures, self.debug_sampling, err);
    }
}

/// Coerce loosely-typed request keys to the key schema, then encode.
fn encode_keys(
    key_codec: &RowCodec,
    keys: &BTreeMap<String, Value>,
) -> Result<Vec<u8>, FetchError> {
    let coerced = coerce_keys(keys, key_codec.schema())
        .map_err(|e| FetchError::decode("join keys", e))?;
    key_codec
        .encode_map(&coerced)
        .map_err(|e| FetchError::decode("join keys", e))
}

fn note_failure(failures: &AtomicU64, debug_sampling: bool, err: &dyn std::fmt::Display) {
    let total = failures.fetch_add(1, Ordering::Relaxed) + 1;
    if debug_sampling || total % 100 == 1 {
        warn!(total, "response logging failed: {}", err);
    }
}
