//! End-to-end fetch scenarios against the in-memory key-value store.
//!
//! Covers the serving paths (no-agg, snapshot, temporal), staleness
//! handling, join planning with dedup and degraded parts, failure
//! independence, timeouts, and the logging sampler round-trip.

use async_trait::async_trait;
use reef_codec::{
    BatchIr, DataType, Field, Hop, HopSeries, IrCodec, MutationCodec, Partial, RowCodec, Schema,
    Value,
};
use reef_kv::{
    dataset, GetRequest, GetResponse, KvStore, MemoryKvStore, METADATA_DATASET,
};
use reef_sawtooth::{Aggregation, Operation, Window};
use reef_serving::metadata::{group_by_key, join_key};
use reef_serving::{
    Accuracy, DataModel, FetchError, Fetcher, FetcherConfig, GroupByMeta, JoinConfig, JoinPart,
    MemoryLogSink, Request,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn schema(fields: &[(&str, DataType)]) -> Schema {
    Schema::new(
        fields
            .iter()
            .map(|(name, dt)| Field::new(*name, dt.clone()))
            .collect(),
    )
}

fn keys(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn user_key_schema() -> Schema {
    schema(&[("user_id", DataType::String)])
}

fn encode_user_key(user: &str) -> Vec<u8> {
    RowCodec::new(user_key_schema())
        .encode_map(&keys(&[("user_id", Value::String(user.into()))]))
        .unwrap()
}

fn seed_group_by(kv: &MemoryKvStore, meta: &GroupByMeta, version_millis: i64) {
    kv.put(
        METADATA_DATASET,
        group_by_key(&meta.name),
        serde_json::to_vec(meta).unwrap(),
        version_millis,
    );
}

fn seed_join(kv: &MemoryKvStore, config: &JoinConfig) {
    kv.put(
        METADATA_DATASET,
        join_key(&config.name),
        serde_json::to_vec(config).unwrap(),
        1,
    );
}

/// Snapshot-accurate feature set summing `amount`, outputs pre-finalized.
fn purchases_sum_meta() -> GroupByMeta {
    GroupByMeta {
        name: "purchases_sum".into(),
        data_model: DataModel::Events,
        accuracy: Accuracy::Snapshot,
        key_schema: user_key_schema(),
        selected_schema: schema(&[("amount", DataType::Long)]),
        aggregations: Some(vec![Aggregation {
            input_column: "amount".into(),
            operation: Operation::Sum,
            window: None,
            k: None,
        }]),
        batch_end_millis: 2000,
    }
}

fn seed_purchases_sum(kv: &MemoryKvStore) {
    let meta = purchases_sum_meta();
    seed_group_by(kv, &meta, 1);
    let output_codec = RowCodec::new(schema(&[("amount_sum", DataType::Long)]));
    kv.put(
        dataset::batch_dataset(&meta.name),
        encode_user_key("u1"),
        output_codec.encode_values(&[Value::Long(55)]).unwrap(),
        2000,
    );
}

fn fetcher(kv: Arc<dyn KvStore>) -> Fetcher {
    Fetcher::new(kv, FetcherConfig::default())
}

// ============================================================================
// Serving paths
// ============================================================================

/// S1: no aggregations — raw selection decoded with the selected codec.
#[tokio::test]
async fn no_agg_returns_selected_columns() {
    let kv = MemoryKvStore::new();
    let meta = GroupByMeta {
        name: "user_profile".into(),
        data_model: DataModel::Events,
        accuracy: Accuracy::Snapshot,
        key_schema: user_key_schema(),
        selected_schema: schema(&[("age", DataType::Long), ("city", DataType::String)]),
        aggregations: None,
        batch_end_millis: 1600,
    };
    seed_group_by(&kv, &meta, 1);
    let selected = RowCodec::new(meta.selected_schema.clone());
    kv.put(
        "USER_PROFILE_BATCH",
        encode_user_key("u1"),
        selected
            .encode_values(&[Value::Long(30), Value::String("paris".into())])
            .unwrap(),
        1700,
    );

    let fetcher = fetcher(Arc::new(kv));
    let responses = fetcher
        .fetch_group_bys(vec![Request::new(
            "user_profile",
            keys(&[("user_id", Value::String("u1".into()))]),
        )])
        .await;

    let values = responses[0].values.as_ref().unwrap();
    assert_eq!(values["age"], Value::Long(30));
    assert_eq!(values["city"], Value::String("paris".into()));
    assert_eq!(values.len(), 2);
}

/// S2: snapshot accuracy — batch bytes decoded with the output codec.
#[tokio::test]
async fn snapshot_returns_finalized_outputs() {
    let kv = MemoryKvStore::new();
    seed_purchases_sum(&kv);

    let fetcher = fetcher(Arc::new(kv));
    let responses = fetcher
        .fetch_group_bys(vec![Request::new(
            "purchases_sum",
            keys(&[("user_id", Value::String("u1".into()))]),
        )])
        .await;

    let values = responses[0].values.as_ref().unwrap();
    assert_eq!(values["amount_sum"], Value::Long(55));
}

/// S3: temporal with an empty stream — the batch IR finalized at Q.
#[tokio::test]
async fn temporal_empty_stream_finalizes_batch_ir() {
    let kv = MemoryKvStore::new();
    let meta = GroupByMeta {
        name: "purchases_sum_t".into(),
        data_model: DataModel::Events,
        accuracy: Accuracy::Temporal,
        key_schema: user_key_schema(),
        selected_schema: schema(&[("amount", DataType::Long)]),
        aggregations: Some(vec![Aggregation {
            input_column: "amount".into(),
            operation: Operation::Sum,
            window: None,
            k: None,
        }]),
        batch_end_millis: 2000,
    };
    seed_group_by(&kv, &meta, 1);
    let ir = BatchIr {
        collapsed: vec![Partial::Long(55)],
        tail_hops: vec![],
    };
    kv.put(
        "PURCHASES_SUM_T_BATCH",
        encode_user_key("u1"),
        IrCodec::encode(&ir),
        2000,
    );

    let fetcher = fetcher(Arc::new(kv));
    let responses = fetcher
        .fetch_group_bys(vec![Request::new(
            "purchases_sum_t",
            keys(&[("user_id", Value::String("u1".into()))]),
        )
        .at(2500)])
        .await;

    let values = responses[0].values.as_ref().unwrap();
    assert_eq!(values["amount_sum"], Value::Long(55));
}

/// S4: entity mutations — one insert and one delete cancel out.
#[tokio::test]
async fn temporal_mutations_insert_then_delete() {
    let kv = MemoryKvStore::new();
    let meta = GroupByMeta {
        name: "inventory".into(),
        data_model: DataModel::Entities,
        accuracy: Accuracy::Temporal,
        key_schema: user_key_schema(),
        selected_schema: schema(&[("qty", DataType::Long)]),
        aggregations: Some(vec![Aggregation {
            input_column: "qty".into(),
            operation: Operation::Count,
            window: None,
            k: None,
        }]),
        batch_end_millis: 2000,
    };
    seed_group_by(&kv, &meta, 1);
    kv.put(
        "INVENTORY_BATCH",
        encode_user_key("u1"),
        IrCodec::encode(&BatchIr {
            collapsed: vec![Partial::Long(10)],
            tail_hops: vec![],
        }),
        2000,
    );
    let mutations = MutationCodec::new(meta.selected_schema.clone());
    kv.put(
        "INVENTORY_STREAMING",
        encode_user_key("u1"),
        mutations.encode(&[Value::Long(1)], 2100, false).unwrap(),
        2100,
    );
    kv.put(
        "INVENTORY_STREAMING",
        encode_user_key("u1"),
        mutations.encode(&[Value::Long(1)], 2300, true).unwrap(),
        2300,
    );

    let fetcher = fetcher(Arc::new(kv));
    let responses = fetcher
        .fetch_group_bys(vec![Request::new(
            "inventory",
            keys(&[("user_id", Value::String("u1".into()))]),
        )
        .at(2500)])
        .await;

    let values = responses[0].values.as_ref().unwrap();
    assert_eq!(values["qty_count"], Value::Long(10));
}

/// Windowed temporal: collapsed + in-window tail hops + streaming rows.
#[tokio::test]
async fn temporal_windowed_recomposition() {
    let five_minutes = 5 * 60 * 1000i64;
    let batch_end = 12 * five_minutes;
    let kv = MemoryKvStore::new();
    let meta = GroupByMeta {
        name: "txn_sum".into(),
        data_model: DataModel::Events,
        accuracy: Accuracy::Temporal,
        key_schema: user_key_schema(),
        selected_schema: schema(&[("amount", DataType::Long)]),
        aggregations: Some(vec![Aggregation {
            input_column: "amount".into(),
            operation: Operation::Sum,
            window: Some(Window::hours(1)),
            k: None,
        }]),
        batch_end_millis: batch_end,
    };
    seed_group_by(&kv, &meta, 1);
    let ir = BatchIr {
        collapsed: vec![Partial::Long(100)],
        tail_hops: vec![HopSeries {
            hop_millis: five_minutes,
            hops: vec![
                Hop {
                    start_millis: 2 * five_minutes,
                    partials: vec![Partial::Long(5)],
                },
                Hop {
                    start_millis: 11 * five_minutes,
                    partials: vec![Partial::Long(20)],
                },
            ],
        }],
    };
    kv.put(
        "TXN_SUM_BATCH",
        encode_user_key("u1"),
        IrCodec::encode(&ir),
        batch_end,
    );
    let events = RowCodec::new(meta.selected_schema.clone());
    kv.put(
        "TXN_SUM_STREAMING",
        encode_user_key("u1"),
        events.encode_values(&[Value::Long(7)]).unwrap(),
        13 * five_minutes,
    );

    // Q = 75 min; window start = hop_floor(75min - 60min) = 15min. The hop
    // at 10 min has aged out; the one at 55 min and the streaming row count.
    let q = 15 * five_minutes;
    let fetcher = fetcher(Arc::new(kv));
    let responses = fetcher
        .fetch_group_bys(vec![Request::new(
            "txn_sum",
            keys(&[("user_id", Value::String("u1".into()))]),
        )
        .at(q)])
        .await;

    let values = responses[0].values.as_ref().unwrap();
    assert_eq!(values["amount_sum_1h"], Value::Long(100 + 20 + 7));
}

// ============================================================================
// Staleness
// ============================================================================

/// S5: a batch value newer than the cached batch end forces a metadata
/// refresh, and the refreshed serving info decodes the new payload.
#[tokio::test]
async fn stale_batch_forces_serving_info_refresh() {
    let kv = MemoryKvStore::new();
    let old_meta = GroupByMeta {
        name: "profile_v".into(),
        data_model: DataModel::Events,
        accuracy: Accuracy::Snapshot,
        key_schema: user_key_schema(),
        selected_schema: schema(&[("amount", DataType::Long)]),
        aggregations: None,
        batch_end_millis: 1500,
    };
    seed_group_by(&kv, &old_meta, 1);

    let fetcher = fetcher(Arc::new(kv.clone()));
    // Prime the cache with the old serving info.
    let _ = fetcher
        .fetch_group_bys(vec![Request::new(
            "profile_v",
            keys(&[("user_id", Value::String("u1".into()))]),
        )])
        .await;

    // A new snapshot lands: wider schema, newer batch end, newer payload.
    let new_meta = GroupByMeta {
        selected_schema: schema(&[("amount", DataType::Long), ("bonus", DataType::Long)]),
        batch_end_millis: 1800,
        ..old_meta
    };
    seed_group_by(&kv, &new_meta, 2);
    let wide = RowCodec::new(new_meta.selected_schema.clone());
    kv.put(
        "PROFILE_V_BATCH",
        encode_user_key("u1"),
        wide.encode_values(&[Value::Long(9), Value::Long(1)]).unwrap(),
        1800,
    );

    let responses = fetcher
        .fetch_group_bys(vec![Request::new(
            "profile_v",
            keys(&[("user_id", Value::String("u1".into()))]),
        )])
        .await;

    // Decoding succeeds only under the refreshed (two-field) serving info.
    let values = responses[0].values.as_ref().unwrap();
    assert_eq!(values["amount"], Value::Long(9));
    assert_eq!(values["bonus"], Value::Long(1));
}

/// Invariant 4: among multiple batch versions the newest wins, and a
/// newest value older than the batch end is treated as absent.
#[tokio::test]
async fn max_timestamp_selection_and_stale_discard() {
    let kv = MemoryKvStore::new();
    let meta = GroupByMeta {
        name: "versions".into(),
        data_model: DataModel::Events,
        accuracy: Accuracy::Snapshot,
        key_schema: user_key_schema(),
        selected_schema: schema(&[("v", DataType::Long)]),
        aggregations: None,
        batch_end_millis: 1000,
    };
    seed_group_by(&kv, &meta, 1);
    let codec = RowCodec::new(meta.selected_schema.clone());
    kv.put(
        "VERSIONS_BATCH",
        encode_user_key("u1"),
        codec.encode_values(&[Value::Long(1)]).unwrap(),
        1100,
    );
    kv.put(
        "VERSIONS_BATCH",
        encode_user_key("u1"),
        codec.encode_values(&[Value::Long(2)]).unwrap(),
        1200,
    );
    // Only stale versions exist for u2 — treated as no snapshot.
    kv.put(
        "VERSIONS_BATCH",
        encode_user_key("u2"),
        codec.encode_values(&[Value::Long(3)]).unwrap(),
        900,
    );

    let fetcher = fetcher(Arc::new(kv));
    let responses = fetcher
        .fetch_group_bys(vec![
            Request::new("versions", keys(&[("user_id", Value::String("u1".into()))])),
            Request::new("versions", keys(&[("user_id", Value::String("u2".into()))])),
        ])
        .await;

    assert_eq!(
        responses[0].values.as_ref().unwrap()["v"],
        Value::Long(2)
    );
    assert_eq!(
        responses[1].values.as_ref().unwrap()["v"],
        Value::Null
    );
}

/// Invariant 3: streaming values below the batch end never reach the
/// aggregator, even when the store ignores the read scope.
#[tokio::test]
async fn streaming_staleness_filter_is_client_side() {
    /// Forwards reads with the `after_millis` scope stripped.
    #[derive(Debug)]
    struct NoScopeKv(MemoryKvStore);

    #[async_trait]
    impl KvStore for NoScopeKv {
        async fn multi_get(
            &self,
            requests: Vec<GetRequest>,
        ) -> reef_kv::Result<Vec<GetResponse>> {
            let stripped = requests
                .iter()
                .map(|r| GetRequest::new(r.dataset.clone(), r.key_bytes.clone()))
                .collect();
            let responses = self.0.multi_get(stripped).await?;
            Ok(responses
                .into_iter()
                .zip(requests)
                .map(|(response, request)| GetResponse {
                    request,
                    values: response.values,
                })
                .collect())
        }
    }

    let kv = MemoryKvStore::new();
    let meta = GroupByMeta {
        name: "scoped".into(),
        data_model: DataModel::Events,
        accuracy: Accuracy::Temporal,
        key_schema: user_key_schema(),
        selected_schema: schema(&[("amount", DataType::Long)]),
        aggregations: Some(vec![Aggregation {
            input_column: "amount".into(),
            operation: Operation::Sum,
            window: None,
            k: None,
        }]),
        batch_end_millis: 2000,
    };
    seed_group_by(&kv, &meta, 1);
    let events = RowCodec::new(meta.selected_schema.clone());
    // Pre-snapshot row that a scope-honoring store would never return.
    kv.put(
        "SCOPED_STREAMING",
        encode_user_key("u1"),
        events.encode_values(&[Value::Long(999)]).unwrap(),
        100,
    );
    kv.put(
        "SCOPED_STREAMING",
        encode_user_key("u1"),
        events.encode_values(&[Value::Long(5)]).unwrap(),
        2100,
    );

    let fetcher = fetcher(Arc::new(NoScopeKv(kv)));
    let responses = fetcher
        .fetch_group_bys(vec![Request::new(
            "scoped",
            keys(&[("user_id", Value::String("u1".into()))]),
        )
        .at(2500)])
        .await;

    let values = responses[0].values.as_ref().unwrap();
    assert_eq!(values["amount_sum"], Value::Long(5));
}

// ============================================================================
// Joins
// ============================================================================

fn checkout_join() -> JoinConfig {
    JoinConfig {
        name: "checkout".into(),
        join_parts: vec![JoinPart {
            group_by: "purchases_sum".into(),
            prefix: None,
            key_mapping: [("user".to_string(), "user_id".to_string())].into(),
        }],
        sample_percent: 0.0,
    }
}

#[tokio::test]
async fn join_remaps_keys_and_prefixes_outputs() {
    let kv = MemoryKvStore::new();
    seed_purchases_sum(&kv);
    seed_join(&kv, &checkout_join());

    let fetcher = fetcher(Arc::new(kv));
    let responses = fetcher
        .fetch_join(vec![Request::new(
            "checkout",
            keys(&[("user", Value::String("u1".into()))]),
        )])
        .await;

    let values = responses[0].values.as_ref().unwrap();
    assert_eq!(values["purchases_sum_amount_sum"], Value::Long(55));
    assert_eq!(values.len(), 1);
}

/// S6: a part with no serving metadata degrades to an exception sentinel;
/// sibling requests are untouched.
#[tokio::test]
async fn join_part_failure_degrades_response() {
    let kv = MemoryKvStore::new();
    seed_purchases_sum(&kv);
    seed_join(&kv, &checkout_join());
    seed_join(
        &kv,
        &JoinConfig {
            name: "haunted".into(),
            join_parts: vec![JoinPart {
                group_by: "ghost".into(),
                prefix: None,
                key_mapping: BTreeMap::new(),
            }],
            sample_percent: 0.0,
        },
    );

    let fetcher = fetcher(Arc::new(kv));
    let responses = fetcher
        .fetch_join(vec![
            Request::new("checkout", keys(&[("user", Value::String("u1".into()))])),
            Request::new("haunted", keys(&[("user_id", Value::String("u2".into()))])),
            Request::new("checkout", keys(&[("user", Value::String("u1".into()))])),
        ])
        .await;

    for i in [0, 2] {
        let values = responses[i].values.as_ref().unwrap();
        assert_eq!(values["purchases_sum_amount_sum"], Value::Long(55));
    }
    let degraded = responses[1].values.as_ref().unwrap();
    let sentinel = degraded["ghost_exception"].as_str().unwrap();
    assert!(sentinel.contains("no serving metadata"));
}

#[tokio::test]
async fn join_with_missing_config_fails_that_request_only() {
    let kv = MemoryKvStore::new();
    seed_purchases_sum(&kv);
    seed_join(&kv, &checkout_join());

    let fetcher = fetcher(Arc::new(kv));
    let responses = fetcher
        .fetch_join(vec![
            Request::new("nonexistent", keys(&[("user", Value::String("u1".into()))])),
            Request::new("checkout", keys(&[("user", Value::String("u1".into()))])),
        ])
        .await;

    assert!(matches!(
        responses[0].values.as_ref().unwrap_err(),
        FetchError::MetadataMissing(_)
    ));
    assert!(responses[1].values.is_ok());
}

/// Invariant 5: at most one group-by request (and one batch read) per
/// distinct (group_by, keys, at_millis) across the join batch.
#[tokio::test]
async fn join_dedups_identical_group_by_requests() {
    /// Counts reads per dataset.
    #[derive(Debug)]
    struct CountingKv {
        inner: MemoryKvStore,
        reads: Arc<Mutex<HashMap<String, usize>>>,
    }

    #[async_trait]
    impl KvStore for CountingKv {
        async fn multi_get(
            &self,
            requests: Vec<GetRequest>,
        ) -> reef_kv::Result<Vec<GetResponse>> {
            {
                let mut reads = self.reads.lock().unwrap();
                for request in &requests {
                    *reads.entry(request.dataset.clone()).or_default() += 1;
                }
            }
            self.inner.multi_get(requests).await
        }
    }

    let kv = MemoryKvStore::new();
    seed_purchases_sum(&kv);
    // Two parts over the same group-by with the same keys, plus two
    // identical join requests in the batch.
    seed_join(
        &kv,
        &JoinConfig {
            name: "double".into(),
            join_parts: vec![
                JoinPart {
                    group_by: "purchases_sum".into(),
                    prefix: Some("a".into()),
                    key_mapping: [("user".to_string(), "user_id".to_string())].into(),
                },
                JoinPart {
                    group_by: "purchases_sum".into(),
                    prefix: Some("b".into()),
                    key_mapping: [("user".to_string(), "user_id".to_string())].into(),
                },
            ],
            sample_percent: 0.0,
        },
    );

    let reads = Arc::new(Mutex::new(HashMap::new()));
    let counting = CountingKv {
        inner: kv,
        reads: reads.clone(),
    };
    let fetcher = fetcher(Arc::new(counting));

    let request = Request::new("double", keys(&[("user", Value::String("u1".into()))]));
    let responses = fetcher.fetch_join(vec![request.clone(), request]).await;

    for response in &responses {
        let values = response.values.as_ref().unwrap();
        assert_eq!(values["a_purchases_sum_amount_sum"], Value::Long(55));
        assert_eq!(values["b_purchases_sum_amount_sum"], Value::Long(55));
    }
    // Both parts of both requests collapse to a single batch read.
    assert_eq!(reads.lock().unwrap()["PURCHASES_SUM_BATCH"], 1);
}

// ============================================================================
// Failure semantics
// ============================================================================

/// Invariant 6: a failing request does not alter its siblings' outcomes.
#[tokio::test]
async fn group_by_failures_are_independent() {
    let kv = MemoryKvStore::new();
    seed_purchases_sum(&kv);

    let fetcher = fetcher(Arc::new(kv));
    let good = Request::new("purchases_sum", keys(&[("user_id", Value::String("u1".into()))]));
    let bad = Request::new("no_such_gb", keys(&[("user_id", Value::String("u1".into()))]));

    let alone = fetcher.fetch_group_bys(vec![good.clone()]).await;
    let mixed = fetcher
        .fetch_group_bys(vec![good.clone(), bad, good])
        .await;

    assert!(matches!(
        mixed[1].values.as_ref().unwrap_err(),
        FetchError::MetadataMissing(_)
    ));
    for i in [0, 2] {
        assert_eq!(
            mixed[i].values.as_ref().unwrap(),
            alone[0].values.as_ref().unwrap()
        );
    }
}

#[tokio::test]
async fn wholesale_kv_failure_fans_out() {
    let fetcher = fetcher(Arc::new(reef_kv::FailingKvStore));
    let responses = fetcher
        .fetch_group_bys(vec![Request::new(
            "anything",
            keys(&[("user_id", Value::String("u1".into()))]),
        )])
        .await;
    assert!(matches!(
        responses[0].values.as_ref().unwrap_err(),
        FetchError::KvStore(_)
    ));
}

#[tokio::test]
async fn deadline_converts_to_timeout_failures() {
    /// Sleeps past any test deadline.
    #[derive(Debug)]
    struct SlowKv;

    #[async_trait]
    impl KvStore for SlowKv {
        async fn multi_get(
            &self,
            _requests: Vec<GetRequest>,
        ) -> reef_kv::Result<Vec<GetResponse>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    let fetcher = Fetcher::new(
        Arc::new(SlowKv),
        FetcherConfig::default().with_timeout(Duration::from_millis(20)),
    );
    let responses = fetcher
        .fetch_group_bys(vec![
            Request::new("a", keys(&[("user_id", Value::String("u1".into()))])),
            Request::new("b", keys(&[("user_id", Value::String("u2".into()))])),
        ])
        .await;

    assert_eq!(responses.len(), 2);
    for response in responses {
        assert!(matches!(
            response.values.unwrap_err(),
            FetchError::Timeout(_)
        ));
    }
}

// ============================================================================
// Logging sampler
// ============================================================================

async fn wait_for_emissions(sink: &MemoryLogSink, expected: usize) {
    for _ in 0..100 {
        if sink.emitted().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {} emissions, saw {}",
        expected,
        sink.emitted().len()
    );
}

/// Invariant 8: decoding a sampled emission with the join codec reproduces
/// the key map and the value map.
#[tokio::test]
async fn sampled_response_round_trips() {
    let kv = MemoryKvStore::new();
    seed_purchases_sum(&kv);
    let mut join = checkout_join();
    join.sample_percent = 100.0;
    seed_join(&kv, &join);

    let sink = Arc::new(MemoryLogSink::new());
    let fetcher = Fetcher::new(Arc::new(kv), FetcherConfig::default())
        .with_log_sink(sink.clone());

    let responses = fetcher
        .fetch_join(vec![Request::new(
            "checkout",
            keys(&[("user", Value::String("u1".into()))]),
        )
        .at(3000)])
        .await;
    assert!(responses[0].values.is_ok());

    wait_for_emissions(&sink, 1).await;
    let emitted = sink.emitted();
    let logged = &emitted[0];
    assert_eq!(logged.join_name, "checkout");
    assert_eq!(logged.at_millis, 3000);

    // The documented unified codecs: key = left names, value = prefixed
    // part outputs.
    let key_codec = RowCodec::new(schema(&[("user", DataType::String)]));
    let decoded_keys = key_codec.decode_map(&logged.key_bytes).unwrap();
    assert_eq!(decoded_keys["user"], Value::String("u1".into()));

    let value_codec = RowCodec::new(schema(&[(
        "purchases_sum_amount_sum",
        DataType::Long,
    )]));
    let decoded_values = value_codec
        .decode_map(logged.value_bytes.as_ref().unwrap())
        .unwrap();
    assert_eq!(decoded_values["purchases_sum_amount_sum"], Value::Long(55));

    assert_eq!(fetcher.logging_failure_count(), 0);
}

/// Invariant 7 at the fetch level: percent 0 never samples, percent 100
/// samples every response, and repeated fetches decide identically.
#[tokio::test]
async fn sampling_is_deterministic_per_percent() {
    let kv = MemoryKvStore::new();
    seed_purchases_sum(&kv);
    let mut silent = checkout_join();
    silent.sample_percent = 0.0;
    seed_join(&kv, &silent);

    let sink = Arc::new(MemoryLogSink::new());
    let fetcher = Fetcher::new(Arc::new(kv), FetcherConfig::default())
        .with_log_sink(sink.clone());

    let request = Request::new("checkout", keys(&[("user", Value::String("u1".into()))]));
    for _ in 0..3 {
        let _ = fetcher.fetch_join(vec![request.clone()]).await;
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(sink.emitted().is_empty());
}
