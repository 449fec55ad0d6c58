//! Join planning and re-assembly
//!
//! A join composes feature sets over a shared set of entity keys. The
//! planner expands each join request into one group-by request per part
//! (re-mapping left-side key names to the part's right-side names), dedups
//! the expansion across the whole batch, fetches the union once, and
//! re-assembles per-part results under prefixed column names.
//!
//! A failed part degrades its join response instead of failing it: the
//! merged map carries a single `"<group_by>_exception"` entry with the
//! failure rendered as a string, next to the surviving parts' values.

use crate::error::FetchError;
use crate::groupby::GroupByFetcher;
use crate::request::{Request, RequestIdentity, Response};
use reef_codec::Value;
use reef_kv::dataset;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One underlying feature set of a join.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinPart {
    /// Group-by name
    pub group_by: String,
    /// Optional extra prefix distinguishing repeated uses of one group-by
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Left key name → right (group-by) key name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_mapping: BTreeMap<String, String>,
}

impl JoinPart {
    /// Full output prefix: `[prefix_]sanitized-group-by-name`.
    pub fn full_prefix(&self) -> String {
        let clean = dataset::sanitize(&self.group_by);
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, clean),
            None => clean,
        }
    }

    /// Re-map left-side keys into the part's group-by key names.
    ///
    /// Keys named in `key_mapping` are renamed; the rest pass through. The
    /// group-by's key codec picks the fields it needs and ignores extras.
    pub fn remap_keys(&self, left: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        left.iter()
            .map(|(name, value)| {
                let right = self.key_mapping.get(name).unwrap_or(name);
                (right.clone(), value.clone())
            })
            .collect()
    }
}

/// The stored metadata document for one join.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Join name
    pub name: String,
    /// Composed feature sets
    pub join_parts: Vec<JoinPart>,
    /// Fraction of responses logged for auditing, in percent
    #[serde(default)]
    pub sample_percent: f64,
}

/// Expands join requests and re-assembles part responses.
#[derive(Debug)]
pub struct JoinPlanner {
    group_by: Arc<GroupByFetcher>,
}

impl JoinPlanner {
    /// Create a planner over a group-by fetcher.
    pub fn new(group_by: Arc<GroupByFetcher>) -> Self {
        Self { group_by }
    }

    /// Fetch a batch of join requests, each paired with its resolved config
    /// (or the config-resolution failure to attach).
    pub async fn fetch(
        &self,
        requests: Vec<(Request, Result<Arc<JoinConfig>, FetchError>)>,
    ) -> Vec<Response> {
        // Expand parts across the batch and dedup group-by requests: at
        // most one per distinct (group_by, keys, at_millis).
        let mut union: Vec<Request> = Vec::new();
        let mut identities: HashMap<RequestIdentity, usize> = HashMap::new();
        let mut plans: Vec<Vec<usize>> = Vec::with_capacity(requests.len());

        for (request, config) in &requests {
            let Ok(config) = config else {
                plans.push(Vec::new());
                continue;
            };
            let part_slots = config
                .join_parts
                .iter()
                .map(|part| {
                    let mut group_by_request =
                        Request::new(part.group_by.clone(), part.remap_keys(&request.keys));
                    group_by_request.at_millis = request.at_millis;

                    let identity = group_by_request.identity();
                    match identities.get(&identity) {
                        Some(&slot) => slot,
                        None => {
                            let slot = union.len();
                            identities.insert(identity, slot);
                            union.push(group_by_request);
                            slot
                        }
                    }
                })
                .collect();
            plans.push(part_slots);
        }

        // One group-by fetch over the deduped union.
        let part_responses = self.group_by.fetch(union).await;

        // Re-attach per join request.
        requests
            .into_iter()
            .zip(plans)
            .map(|((request, config), part_slots)| match config {
                Err(e) => Response::failed(request, e),
                Ok(config) => {
                    let values = assemble(&config, &part_slots, &part_responses);
                    Response::ok(request, values)
                }
            })
            .collect()
    }
}

/// Merge part responses under prefixed column names; failed parts become
/// `"<group_by>_exception"` sentinels.
fn assemble(
    config: &JoinConfig,
    part_slots: &[usize],
    part_responses: &[Response],
) -> FxHashMap<String, Value> {
    let mut merged = FxHashMap::default();
    for (part, slot) in config.join_parts.iter().zip(part_slots) {
        let prefix = part.full_prefix();
        match part_responses.get(*slot).map(|r| &r.values) {
            Some(Ok(values)) => {
                for (column, value) in values {
                    merged.insert(format!("{}_{}", prefix, column), value.clone());
                }
            }
            Some(Err(e)) => {
                merged.insert(
                    format!("{}_exception", part.group_by),
                    Value::String(e.to_string()),
                );
            }
            None => {
                merged.insert(
                    format!("{}_exception", part.group_by),
                    Value::String("group-by response missing from batch".to_string()),
                );
            }
        }
    }
    merged
}
