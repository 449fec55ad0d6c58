//! Per-feature-set serving metadata
//!
//! A `GroupByMeta` is the JSON document the metadata dataset stores per
//! feature set. `ServingInfo` is its resolved, cache-resident form: the
//! document plus the codec set and (for aggregating feature sets) the
//! planned aggregator. Resolution happens once per load; fetches share the
//! resolved entry read-only.

use crate::error::FetchError;
use reef_codec::{MutationCodec, RowCodec, Schema};
use reef_kv::dataset;
use reef_sawtooth::{Aggregation, SawtoothAggregator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How fresh served values are.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    /// Serve the last batch value as-is
    Snapshot,
    /// Merge the batch IR with post-snapshot streaming rows at query time
    Temporal,
}

/// Shape of the underlying source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataModel {
    /// Append-only event rows
    Events,
    /// Mutable entities; streaming rows are mutations with before-images
    Entities,
}

/// The stored metadata document for one feature set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupByMeta {
    /// Feature-set name
    pub name: String,
    /// Source shape
    pub data_model: DataModel,
    /// Inferred serving accuracy
    pub accuracy: Accuracy,
    /// Entity-key schema
    pub key_schema: Schema,
    /// Selected (input) column schema
    pub selected_schema: Schema,
    /// Configured aggregations; `None` means raw selection (no-agg)
    #[serde(default)]
    pub aggregations: Option<Vec<Aggregation>>,
    /// Inclusive upper bound of the batch snapshot, epoch millis
    pub batch_end_millis: i64,
}

/// Resolved serving metadata: document + codecs + aggregator.
#[derive(Clone, Debug)]
pub struct ServingInfo {
    /// The stored document
    pub meta: GroupByMeta,
    /// Encodes entity keys into key-value keys
    pub key_codec: RowCodec,
    /// Decodes streaming event payloads and no-agg batch values
    pub selected_codec: RowCodec,
    /// Decodes entity mutation payloads
    pub mutation_codec: MutationCodec,
    /// Planned aggregator; `None` for no-agg feature sets
    pub aggregator: Option<Arc<SawtoothAggregator>>,
    /// Decodes snapshot outputs; names the Response key set
    pub output_codec: RowCodec,
}

impl ServingInfo {
    /// Resolve a stored document into serving form.
    pub fn resolve(meta: GroupByMeta) -> Result<Self, FetchError> {
        let key_codec = RowCodec::new(meta.key_schema.clone());
        let selected_codec = RowCodec::new(meta.selected_schema.clone());
        let mutation_codec = MutationCodec::new(meta.selected_schema.clone());

        let aggregator = match &meta.aggregations {
            Some(aggs) => Some(Arc::new(
                SawtoothAggregator::new(aggs, &meta.selected_schema)
                    .map_err(|e| FetchError::aggregate(&meta.name, e))?,
            )),
            None => None,
        };
        let output_schema = match &aggregator {
            Some(agg) => agg.output_schema().clone(),
            None => meta.selected_schema.clone(),
        };
        let output_codec = RowCodec::new(output_schema);

        Ok(Self {
            meta,
            key_codec,
            selected_codec,
            mutation_codec,
            aggregator,
            output_codec,
        })
    }

    /// Feature-set name
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Batch snapshot upper bound
    pub fn batch_end_millis(&self) -> i64 {
        self.meta.batch_end_millis
    }

    /// True if a streaming read is issued for this feature set
    pub fn is_temporal(&self) -> bool {
        self.meta.accuracy == Accuracy::Temporal
    }

    /// True if streaming rows are entity mutations
    pub fn is_mutation_source(&self) -> bool {
        self.meta.data_model == DataModel::Entities
    }

    /// Batch dataset name
    pub fn batch_dataset(&self) -> String {
        dataset::batch_dataset(&self.meta.name)
    }

    /// Streaming dataset name
    pub fn streaming_dataset(&self) -> String {
        dataset::streaming_dataset(&self.meta.name)
    }
}
