//! JSON wiring file and the pipeline built from it.
//!
//! ```json
//! {
//!   "indexers": {
//!     "items": { "kind": "bulk", "path": "items.csv",
//!                "format": { "field_ids": [100, 101, 102], "inner_delimiter": ":" } },
//!     "users": { "kind": "remote", "addr": "10.0.0.7:8080" }
//!   },
//!   "contexts": [
//!     { "scope": 10,
//!       "endpoint": { "local": { "indexer": "users", "source_scope": 1,
//!                                "source_field": 200, "fields": [201] } } }
//!   ],
//!   "retrievals": [
//!     { "retrieval_id": 1,
//!       "endpoint": { "local": { "indexer": "items", "extract_scope": 10,
//!                                "extract_field": 102, "item_keys": [100] } } },
//!     { "retrieval_id": 2, "endpoint": { "remote": { "addr": "10.0.0.8:8080" } } }
//!   ],
//!   "request_num": 50
//! }
//! ```

use crate::context::{IndexerKv, KvContext, KvContextParams};
use crate::dispatch::{
    ContextService, IndexerClient, LocalContextClient, LocalIndexerClient, LocalRetrievalClient,
    RecommendService, RemoteContextClient, RemoteIndexerClient, RemoteRetrievalClient,
    RetrievalService,
};
use crate::recommender::{FailurePolicy, Recommender};
use crate::retrieval::{ContentBased, ContentBasedParams};
use anyhow::{anyhow, bail, Context as _, Result};
use recflow_core::persist::{load_index, IndexPaths};
use recflow_core::{build_from_path, BulkFormat, FieldId, HashIndex, ScopeId};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn default_max_results() -> usize { 100 }

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexerEndpoint {
    /// Snapshot directory written by the indexer CLI.
    Snapshot { path: PathBuf },
    /// Delimited file indexed at startup.
    Bulk { path: PathBuf, format: BulkFormat },
    /// Indexer served by another process. `name` defaults to this entry's name.
    Remote {
        addr: String,
        #[serde(default)]
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageEndpoint<T> {
    Local(T),
    Remote { addr: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct KvContextConfig {
    pub indexer: String,
    pub source_scope: ScopeId,
    pub source_field: FieldId,
    /// Key field of the lookup; the source field when absent.
    #[serde(default)]
    pub key_field: Option<FieldId>,
    pub fields: Vec<FieldId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBasedConfig {
    pub indexer: String,
    pub extract_scope: ScopeId,
    pub extract_field: FieldId,
    pub item_keys: Vec<FieldId>,
    #[serde(default)]
    pub filter_rules: BTreeMap<FieldId, String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextEntry {
    pub scope: ScopeId,
    pub endpoint: StageEndpoint<KvContextConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalEntry {
    pub retrieval_id: i32,
    pub endpoint: StageEndpoint<ContentBasedConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub indexers: BTreeMap<String, IndexerEndpoint>,
    /// Run in this order by the recommender.
    #[serde(default)]
    pub contexts: Vec<ContextEntry>,
    #[serde(default)]
    pub retrievals: Vec<RetrievalEntry>,
    /// Serves `/recommend` with this many items per reply when set.
    #[serde(default)]
    pub request_num: Option<usize>,
    #[serde(default)]
    pub strict: bool,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Stages hosted by this process plus the clients the recommender calls.
#[derive(Default)]
pub struct Pipeline {
    pub indexers: BTreeMap<String, Arc<HashIndex>>,
    pub contexts: BTreeMap<ScopeId, Arc<dyn ContextService>>,
    pub retrievals: BTreeMap<i32, Arc<dyn RetrievalService>>,
    pub recommender: Option<Arc<dyn RecommendService>>,
}

impl Pipeline {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut pipeline = Pipeline::default();
        let mut clients: BTreeMap<&str, Arc<dyn IndexerClient>> = BTreeMap::new();

        for (name, endpoint) in &config.indexers {
            let client: Arc<dyn IndexerClient> = match endpoint {
                IndexerEndpoint::Snapshot { path } => {
                    let index = Arc::new(load_index(&IndexPaths::new(path))?);
                    tracing::info!(
                        indexer = %name,
                        items = index.len(),
                        path = %path.display(),
                        "loaded snapshot"
                    );
                    pipeline.indexers.insert(name.clone(), Arc::clone(&index));
                    Arc::new(LocalIndexerClient::new(index))
                }
                IndexerEndpoint::Bulk { path, format } => {
                    let (index, _) = build_from_path(path, format)
                        .with_context(|| format!("indexing {}", path.display()))?;
                    let index = Arc::new(index);
                    pipeline.indexers.insert(name.clone(), Arc::clone(&index));
                    Arc::new(LocalIndexerClient::new(index))
                }
                IndexerEndpoint::Remote { addr, name: remote_name } => {
                    let remote_name = remote_name.as_deref().unwrap_or(name);
                    Arc::new(RemoteIndexerClient::connect(addr, remote_name))
                }
            };
            clients.insert(name.as_str(), client);
        }
        let indexer = |name: &str| -> Result<Arc<dyn IndexerClient>> {
            clients.get(name).cloned().ok_or_else(|| anyhow!("unknown indexer {name:?}"))
        };

        let policy = if config.strict { FailurePolicy::Strict } else { FailurePolicy::BestEffort };
        let mut recommender =
            Recommender::new(config.request_num.unwrap_or_default()).with_policy(policy);

        for entry in &config.contexts {
            match &entry.endpoint {
                StageEndpoint::Local(c) => {
                    let server: Arc<dyn ContextService> = Arc::new(KvContext::new(KvContextParams {
                        source: (c.source_scope, c.source_field),
                        key_field: c.key_field.unwrap_or(c.source_field),
                        fields: c.fields.clone(),
                        kv: Arc::new(IndexerKv::new(indexer(&c.indexer)?)),
                    }));
                    let client = Arc::new(LocalContextClient::new(Arc::clone(&server)));
                    recommender.add_context(entry.scope, client)?;
                    pipeline.contexts.insert(entry.scope, server);
                }
                StageEndpoint::Remote { addr } => {
                    let client = Arc::new(RemoteContextClient::connect(addr, entry.scope));
                    recommender.add_context(entry.scope, client)?;
                }
            }
        }

        let mut seen_retrievals = BTreeSet::new();
        for entry in &config.retrievals {
            if !seen_retrievals.insert(entry.retrieval_id) {
                bail!("retrieval {} is already wired", entry.retrieval_id);
            }
            match &entry.endpoint {
                StageEndpoint::Local(c) => {
                    if c.item_keys.is_empty() {
                        bail!("retrieval {} has no item_keys", entry.retrieval_id);
                    }
                    let server: Arc<dyn RetrievalService> = Arc::new(ContentBased::new(
                        entry.retrieval_id,
                        c.max_results,
                        ContentBasedParams {
                            indexer: indexer(&c.indexer)?,
                            extract_key: (c.extract_scope, c.extract_field),
                            item_keys: c.item_keys.clone(),
                            filter_rules: c.filter_rules.clone(),
                        },
                    ));
                    let client = Arc::new(LocalRetrievalClient::new(Arc::clone(&server)));
                    recommender.add_retrieval(client);
                    pipeline.retrievals.insert(entry.retrieval_id, server);
                }
                StageEndpoint::Remote { addr } => {
                    let client = Arc::new(RemoteRetrievalClient::connect(addr, entry.retrieval_id));
                    recommender.add_retrieval(client);
                }
            }
        }

        if config.request_num.is_some() {
            pipeline.recommender = Some(Arc::new(recommender));
        }
        tracing::info!(
            indexers = pipeline.indexers.len(),
            contexts = pipeline.contexts.len(),
            retrievals = pipeline.retrievals.len(),
            recommend = pipeline.recommender.is_some(),
            "pipeline wired"
        );
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn parse(value: Value) -> PipelineConfig {
        serde_json::from_value(value).unwrap()
    }

    fn remote() -> Value {
        json!({ "remote": { "addr": "127.0.0.1:9" } })
    }

    fn remote_indexer() -> Value {
        json!({ "kind": "remote", "addr": "127.0.0.1:9" })
    }

    fn local_context(indexer: &str) -> Value {
        json!({ "local": {
            "indexer": indexer, "source_scope": 1, "source_field": 2, "fields": [3]
        } })
    }

    #[test]
    fn parses_endpoints() {
        let config = parse(json!({
            "indexers": {
                "a": { "kind": "snapshot", "path": "/tmp/a" },
                "b": remote_indexer()
            },
            "contexts": [
                { "scope": 10, "endpoint": remote() },
                { "scope": 11, "endpoint": local_context("b") }
            ],
            "retrievals": [
                { "retrieval_id": 4, "endpoint": { "local": {
                    "indexer": "b", "extract_scope": 10, "extract_field": 5,
                    "item_keys": [6], "filter_rules": { "7": "x" }
                } } }
            ],
            "request_num": 20
        }));
        assert!(matches!(config.indexers["a"], IndexerEndpoint::Snapshot { .. }));
        assert!(matches!(config.contexts[0].endpoint, StageEndpoint::Remote { .. }));
        let StageEndpoint::Local(ctx) = &config.contexts[1].endpoint else {
            panic!("expected local context")
        };
        assert_eq!(ctx.key_field, None);
        let StageEndpoint::Local(ret) = &config.retrievals[0].endpoint else {
            panic!("expected local retrieval")
        };
        assert_eq!(ret.filter_rules[&7], "x");
        assert_eq!(ret.max_results, 100);
        assert_eq!(config.request_num, Some(20));
        assert!(!config.strict);
    }

    #[test]
    fn wires_remote_stages_without_serving_them() {
        let config = parse(json!({
            "indexers": { "b": remote_indexer() },
            "contexts": [ { "scope": 11, "endpoint": local_context("b") } ],
            "retrievals": [ { "retrieval_id": 4, "endpoint": remote() } ],
            "request_num": 5
        }));
        let pipeline = Pipeline::from_config(&config).unwrap();
        assert!(pipeline.indexers.is_empty());
        assert!(pipeline.contexts.contains_key(&11));
        assert!(pipeline.retrievals.is_empty());
        assert!(pipeline.recommender.is_some());
    }

    #[test]
    fn recommender_needs_request_num() {
        let config = parse(json!({
            "retrievals": [ { "retrieval_id": 4, "endpoint": remote() } ]
        }));
        assert!(Pipeline::from_config(&config).unwrap().recommender.is_none());
    }

    #[test]
    fn rejects_bad_wiring() {
        let unknown = parse(json!({
            "contexts": [ { "scope": 1, "endpoint": local_context("nope") } ]
        }));
        assert!(Pipeline::from_config(&unknown).is_err());

        let duplicate_scope = parse(json!({ "contexts": [
            { "scope": 1, "endpoint": remote() },
            { "scope": 1, "endpoint": remote() }
        ] }));
        assert!(Pipeline::from_config(&duplicate_scope).is_err());

        let duplicate_retrieval = parse(json!({ "retrievals": [
            { "retrieval_id": 2, "endpoint": remote() },
            { "retrieval_id": 2, "endpoint": remote() }
        ] }));
        assert!(Pipeline::from_config(&duplicate_retrieval).is_err());

        let no_keys = parse(json!({
            "indexers": { "b": remote_indexer() },
            "retrievals": [ { "retrieval_id": 4, "endpoint": { "local": {
                "indexer": "b", "extract_scope": 1, "extract_field": 2, "item_keys": []
            } } } ]
        }));
        assert!(Pipeline::from_config(&no_keys).is_err());
    }
}
