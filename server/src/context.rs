use crate::dispatch::{ContextService, IndexerClient};
use async_trait::async_trait;
use recflow_core::feature::{feature_map_to_string, FeatureKind};
use recflow_core::message::{ContextReply, ForwardRequest, RecRequest};
use recflow_core::{FeatureMap, FeatureStringFormat, FieldId, ScopeId, Status, StatusResult};
use std::sync::Arc;

/// Keyed feature lookup used by [`KvContext`].
#[async_trait]
pub trait KvSource: Send + Sync {
    async fn get_maps(
        &self,
        key_field: FieldId,
        keys: &[String],
        fields: &[FieldId],
    ) -> StatusResult<Vec<FeatureMap>>;

    /// Same lookup with every map rendered as text.
    async fn get_strings(
        &self,
        key_field: FieldId,
        keys: &[String],
        fields: &[FieldId],
        format: &FeatureStringFormat,
    ) -> StatusResult<Vec<String>> {
        let maps = self.get_maps(key_field, keys, fields).await?;
        Ok(maps.iter().map(|m| feature_map_to_string(m, format)).collect())
    }
}

/// [`KvSource`] backed by forward queries against an indexer.
pub struct IndexerKv {
    indexer: Arc<dyn IndexerClient>,
}

impl IndexerKv {
    pub fn new(indexer: Arc<dyn IndexerClient>) -> Self {
        Self { indexer }
    }
}

#[async_trait]
impl KvSource for IndexerKv {
    async fn get_maps(
        &self,
        key_field: FieldId,
        keys: &[String],
        fields: &[FieldId],
    ) -> StatusResult<Vec<FeatureMap>> {
        let req =
            ForwardRequest { key_field, keys: keys.to_vec(), requested_fields: fields.to_vec() };
        let reply = self.indexer.call_forward(&req).await?;
        Ok(reply.items.into_iter().map(|item| item.fields).collect())
    }
}

pub struct KvContextParams {
    /// (scope, field) of the request context holding the lookup key.
    pub source: (ScopeId, FieldId),
    pub key_field: FieldId,
    pub fields: Vec<FieldId>,
    pub kv: Arc<dyn KvSource>,
}

/// Looks up one key taken from the request and returns the stored fields
/// as context features.
pub struct KvContext {
    params: KvContextParams,
}

impl KvContext {
    pub fn new(params: KvContextParams) -> Self {
        Self { params }
    }

    fn seed_key(&self, req: &RecRequest) -> StatusResult<String> {
        let (scope, field) = self.params.source;
        let features = req
            .context
            .get(&scope)
            .ok_or_else(|| Status::cancelled(format!("request has no context scope {scope}")))?;
        let list = features
            .get(&field)
            .ok_or_else(|| Status::cancelled(format!("scope {scope} has no field {field}")))?;
        if !matches!(list.kind(), FeatureKind::Bytes | FeatureKind::Int) {
            return Err(Status::cancelled(format!("field {field} must hold bytes or ints")));
        }
        let mut keys = list.terms(&FeatureStringFormat::default());
        if keys.len() != 1 {
            return Err(Status::cancelled(format!("expected exactly one key, got {}", keys.len())));
        }
        Ok(keys.remove(0))
    }
}

#[async_trait]
impl ContextService for KvContext {
    async fn context(&self, req: &RecRequest) -> StatusResult<ContextReply> {
        let key = self.seed_key(req)?;
        let mut maps = self
            .params
            .kv
            .get_maps(self.params.key_field, std::slice::from_ref(&key), &self.params.fields)
            .await?;
        tracing::debug!(request_id = %req.request_id, %key, found = maps.len(), "context lookup");

        let mut reply =
            ContextReply { request_id: req.request_id.clone(), context: FeatureMap::new() };
        if !maps.is_empty() {
            reply.context = maps.swap_remove(0);
        }
        Ok(reply)
    }
}
