//! Metadata loading through the key-value interface
//!
//! Serving metadata lives in its own dataset as JSON documents: one
//! `group_by/<name>` document per feature set and one `join/<name>` per
//! join. Documents are versioned like any other value; the loader takes the
//! newest version.

use crate::error::FetchError;
use crate::join::JoinConfig;
use crate::serving_info::{GroupByMeta, ServingInfo};
use reef_kv::{GetRequest, KvStore, TimedValue, METADATA_DATASET};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Key of a feature set's metadata document.
pub fn group_by_key(name: &str) -> Vec<u8> {
    format!("group_by/{}", name).into_bytes()
}

/// Key of a join's metadata document.
pub fn join_key(name: &str) -> Vec<u8> {
    format!("join/{}", name).into_bytes()
}

/// Loads metadata documents from the metadata dataset.
#[derive(Clone, Debug)]
pub struct MetadataClient {
    kv: Arc<dyn KvStore>,
}

impl MetadataClient {
    /// Create a client over a key-value handle
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Load and resolve a feature set's serving info.
    pub async fn load_group_by(&self, name: &str) -> Result<Arc<ServingInfo>, FetchError> {
        let meta: GroupByMeta = self.load_document(name, group_by_key(name)).await?;
        Ok(Arc::new(ServingInfo::resolve(meta)?))
    }

    /// Load a join config.
    pub async fn load_join(&self, name: &str) -> Result<Arc<JoinConfig>, FetchError> {
        let config: JoinConfig = self.load_document(name, join_key(name)).await?;
        Ok(Arc::new(config))
    }

    async fn load_document<T: DeserializeOwned>(
        &self,
        name: &str,
        key: Vec<u8>,
    ) -> Result<T, FetchError> {
        let request = GetRequest::new(METADATA_DATASET, key);
        let mut responses = self
            .kv
            .multi_get(vec![request])
            .await
            .map_err(FetchError::kv)?;
        let response = responses
            .pop()
            .ok_or_else(|| FetchError::kv("empty multi-get response"))?;
        let values = response.values.map_err(FetchError::kv)?;
        let newest = values
            .into_iter()
            .max_by_key(|v: &TimedValue| v.millis)
            .ok_or_else(|| FetchError::MetadataMissing(name.to_string()))?;
        serde_json::from_slice(&newest.bytes).map_err(|e| FetchError::decode(name, e))
    }
}
