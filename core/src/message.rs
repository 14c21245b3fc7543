//! Request and reply messages exchanged between stages.
//!
//! The same structs are passed by reference to co-located handlers and
//! serialized as JSON bodies for remote ones.

use crate::feature::{float_term, int_term, Context, FeatureMap, FieldId, IdWeight};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardRequest {
    pub key_field: FieldId,
    pub keys: Vec<String>,
    /// Empty means every field.
    #[serde(default)]
    pub requested_fields: Vec<FieldId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchValue {
    Bytes(String),
    Int(i64),
    Float(f32),
}

impl MatchValue {
    /// The literal posting term this value matches. An empty bytes value
    /// constrains nothing.
    pub fn term(&self) -> Option<String> {
        match self {
            MatchValue::Bytes(s) if s.is_empty() => None,
            MatchValue::Bytes(s) => Some(s.clone()),
            MatchValue::Int(i) => Some(int_term(*i)),
            MatchValue::Float(f) => Some(float_term(*f)),
        }
    }
}

/// One constraint inside a clause. Only `Match` narrows the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchItem {
    Match(MatchValue),
    Weighted(IdWeight),
    Unset,
}

impl SearchItem {
    pub fn bytes(value: impl Into<String>) -> Self {
        SearchItem::Match(MatchValue::Bytes(value.into()))
    }
}

/// A conjunction of field = value constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchClause {
    pub items: BTreeMap<FieldId, SearchItem>,
}

impl SearchClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: FieldId, item: SearchItem) -> Self {
        self.items.insert(field, item);
        self
    }

    pub fn with_bytes(self, field: FieldId, value: impl Into<String>) -> Self {
        self.with(field, SearchItem::bytes(value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvertedRequest {
    pub clauses: Vec<SearchClause>,
    pub max_results: usize,
    #[serde(default)]
    pub requested_fields: Vec<FieldId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexItem {
    pub fields: FeatureMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexerReply {
    pub items: Vec<IndexItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecRequest {
    pub request_id: String,
    #[serde(default)]
    pub context: Context,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextReply {
    pub request_id: String,
    #[serde(default)]
    pub context: FeatureMap,
}

/// Which retrieval produced an item and how many candidates it had.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalInfo {
    pub retrieval_id: i32,
    pub num_items: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecItem {
    pub item_id: FeatureMap,
    #[serde(default)]
    pub retrieval_infos: Vec<RetrievalInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemReply {
    pub request_id: String,
    #[serde(default)]
    pub items: Vec<RecItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_terms() {
        assert_eq!(MatchValue::Bytes(String::new()).term(), None);
        assert_eq!(MatchValue::Int(42).term().as_deref(), Some("42"));
        assert_eq!(MatchValue::Float(2.5).term().as_deref(), Some("2.500"));
    }

    #[test]
    fn clause_json_uses_string_field_keys() {
        let clause = SearchClause::new().with_bytes(101, "101_1");
        let json = serde_json::to_string(&clause).unwrap();
        assert_eq!(json, r#"{"items":{"101":{"match":{"bytes":"101_1"}}}}"#);
        let back: SearchClause = serde_json::from_str(&json).unwrap();
        assert_eq!(back, clause);
    }
}
