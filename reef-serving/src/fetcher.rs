//! Top-level fetcher
//!
//! `Fetcher` owns the serving-info cache, the join-config cache, the worker
//! pool and (optionally) the logging sampler, and exposes the two fetch
//! entry points. Both are infallible over the batch: every request resolves
//! to a Response, and the overall deadline converts unfinished work into
//! per-request `Timeout` failures.

use crate::cache::{ServingInfoCache, TtlCache};
use crate::config::FetcherConfig;
use crate::error::FetchError;
use crate::groupby::GroupByFetcher;
use crate::join::{JoinConfig, JoinPlanner};
use crate::metadata::MetadataClient;
use crate::request::{Request, Response};
use crate::sampler::{LogSink, LoggingSampler};
use reef_kv::KvStore;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// The online fetch entry point.
#[derive(Debug)]
pub struct Fetcher {
    config: FetcherConfig,
    metadata: MetadataClient,
    serving_info: Arc<ServingInfoCache>,
    group_by: Arc<GroupByFetcher>,
    planner: JoinPlanner,
    joins: TtlCache<Arc<JoinConfig>>,
    sampler: Option<LoggingSampler>,
}

impl Fetcher {
    /// Create a fetcher over a key-value handle.
    pub fn new(kv: Arc<dyn KvStore>, config: FetcherConfig) -> Self {
        let metadata = MetadataClient::new(kv.clone());
        let serving_info = Arc::new(ServingInfoCache::new(
            metadata.clone(),
            config.serving_info_ttl,
            config.metadata_cache_entries,
        ));
        let workers = Arc::new(Semaphore::new(config.fan_out_workers));
        let group_by = Arc::new(GroupByFetcher::new(kv, serving_info.clone(), workers));
        let planner = JoinPlanner::new(group_by.clone());
        let joins = TtlCache::new(config.join_ttl, config.metadata_cache_entries);
        Self {
            config,
            metadata,
            serving_info,
            group_by,
            planner,
            joins,
            sampler: None,
        }
    }

    /// Install a logging sink; sampled join responses are re-encoded and
    /// emitted to it.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sampler = Some(LoggingSampler::new(
            sink,
            self.serving_info.clone(),
            self.config.join_ttl,
            self.config.metadata_cache_entries,
            self.config.debug_sampling,
        ));
        self
    }

    /// Number of response-logging failures since startup.
    pub fn logging_failure_count(&self) -> u64 {
        self.sampler.as_ref().map_or(0, |s| s.failure_count())
    }

    /// Fetch a batch of group-by requests.
    pub async fn fetch_group_bys(&self, requests: Vec<Request>) -> Vec<Response> {
        let fallback = requests.clone();
        match tokio::time::timeout(self.config.timeout, self.group_by.fetch(requests)).await {
            Ok(responses) => responses,
            Err(_) => self.timeout_responses(fallback),
        }
    }

    /// Fetch a batch of join requests.
    pub async fn fetch_join(&self, requests: Vec<Request>) -> Vec<Response> {
        let fallback = requests.clone();
        match tokio::time::timeout(self.config.timeout, self.fetch_join_inner(requests)).await {
            Ok(responses) => responses,
            Err(_) => self.timeout_responses(fallback),
        }
    }

    async fn fetch_join_inner(&self, requests: Vec<Request>) -> Vec<Response> {
        // Resolve each distinct join config once.
        let names: BTreeSet<String> = requests.iter().map(|r| r.name.clone()).collect();
        let loaded = futures::future::join_all(names.iter().map(|name| {
            self.joins
                .get_or_load(name, || self.metadata.load_join(name))
        }))
        .await;
        let configs: HashMap<String, Result<Arc<JoinConfig>, FetchError>> =
            names.into_iter().zip(loaded).collect();

        let paired = requests
            .into_iter()
            .map(|request| {
                let config = configs
                    .get(&request.name)
                    .cloned()
                    .unwrap_or_else(|| Err(FetchError::MetadataMissing(request.name.clone())));
                (request, config)
            })
            .collect();

        let responses = self.planner.fetch(paired).await;

        if let Some(sampler) = &self.sampler {
            for response in &responses {
                if let Some(Ok(config)) = configs.get(&response.request.name) {
                    sampler.process(config, response).await;
                }
            }
        }
        responses
    }

    fn timeout_responses(&self, requests: Vec<Request>) -> Vec<Response> {
        requests
            .into_iter()
            .map(|request| Response::failed(request, FetchError::Timeout(self.config.timeout)))
            .collect()
    }
}
