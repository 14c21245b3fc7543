use crate::dispatch::{IndexerClient, RetrievalService};
use async_trait::async_trait;
use recflow_core::message::{
    IndexerReply, InvertedRequest, ItemReply, RecItem, RecRequest, RetrievalInfo, SearchClause,
};
use recflow_core::{FeatureList, FeatureMap, FieldId, ScopeId, Status, StatusResult};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ContentBasedParams {
    pub indexer: Arc<dyn IndexerClient>,
    /// (scope, field) of the request context holding the seed values. The
    /// same field id is searched in the index.
    pub extract_key: (ScopeId, FieldId),
    /// Fields copied into each candidate's id.
    pub item_keys: Vec<FieldId>,
    /// Added to every generated clause.
    pub filter_rules: BTreeMap<FieldId, String>,
}

/// Retrieves items sharing a field value with the request.
pub struct ContentBased {
    retrieval_id: i32,
    request_num: usize,
    params: ContentBasedParams,
}

impl ContentBased {
    pub fn new(retrieval_id: i32, request_num: usize, params: ContentBasedParams) -> Self {
        Self { retrieval_id, request_num, params }
    }

    pub fn retrieval_id(&self) -> i32 {
        self.retrieval_id
    }

    /// One clause per seed value. A seed that is not a bytes list yields no
    /// clauses, so the search comes back empty.
    fn clauses(&self, seed: &FeatureList) -> Vec<SearchClause> {
        let Some(values) = seed.as_bytes() else {
            tracing::debug!(
                retrieval_id = self.retrieval_id,
                kind = ?seed.kind(),
                "seed is not a bytes list"
            );
            return Vec::new();
        };
        let field = self.params.extract_key.1;
        values
            .iter()
            .map(|value| {
                let mut clause = SearchClause::new().with_bytes(field, value.clone());
                for (filter_field, filter_value) in &self.params.filter_rules {
                    clause = clause.with_bytes(*filter_field, filter_value.clone());
                }
                clause
            })
            .collect()
    }

    fn candidates(&self, reply: IndexerReply) -> Vec<RecItem> {
        let num_items = reply.items.len();
        reply
            .items
            .into_iter()
            .filter_map(|item| {
                let item_id: FeatureMap = self
                    .params
                    .item_keys
                    .iter()
                    .filter_map(|key| item.fields.get(key).map(|list| (*key, list.clone())))
                    .collect();
                if item_id.is_empty() {
                    return None;
                }
                Some(RecItem {
                    item_id,
                    retrieval_infos: vec![RetrievalInfo {
                        retrieval_id: self.retrieval_id,
                        num_items,
                    }],
                })
            })
            .collect()
    }
}

#[async_trait]
impl RetrievalService for ContentBased {
    async fn retrieval(&self, req: &RecRequest) -> StatusResult<ItemReply> {
        let (scope, field) = self.params.extract_key;
        let seed = req
            .context
            .get(&scope)
            .ok_or_else(|| Status::cancelled(format!("request has no context scope {scope}")))?
            .get(&field)
            .ok_or_else(|| Status::cancelled(format!("scope {scope} has no field {field}")))?;

        let search = InvertedRequest {
            clauses: self.clauses(seed),
            max_results: self.request_num,
            requested_fields: self.params.item_keys.clone(),
        };
        let items = match self.params.indexer.call_inverted(&search).await {
            Ok(reply) => self.candidates(reply),
            Err(e) => {
                tracing::warn!(
                    retrieval_id = self.retrieval_id,
                    error = %e,
                    "inverted search failed"
                );
                Vec::new()
            }
        };
        tracing::debug!(
            request_id = %req.request_id,
            retrieval_id = self.retrieval_id,
            items = items.len(),
            "retrieved"
        );
        Ok(ItemReply { request_id: req.request_id.clone(), items })
    }
}
