use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Caller-assigned semantic tag of a field. There is no built-in schema.
pub type FieldId = i32;
/// Identifies one scope of the request context.
pub type ScopeId = i32;

pub type FeatureMap = BTreeMap<FieldId, FeatureList>;
pub type Context = BTreeMap<ScopeId, FeatureMap>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightedId {
    IdBytes(String),
    IdInt(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdWeight {
    pub id: WeightedId,
    pub weight: f32,
}

/// A typed list of feature values. A scalar is a one-element list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureList {
    BytesList(Vec<String>),
    IntList(Vec<i64>),
    FloatList(Vec<f32>),
    WeightedList(Vec<IdWeight>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Bytes,
    Int,
    Float,
    Weighted,
}

/// Delimiters used when rendering features as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureStringFormat {
    pub between_delimiter: String,
    pub inner_delimiter: String,
    pub field_id_delimiter: String,
    pub weighted_id_delimiter: String,
}

impl Default for FeatureStringFormat {
    fn default() -> Self {
        Self {
            between_delimiter: "|".into(),
            inner_delimiter: ";".into(),
            field_id_delimiter: ":".into(),
            weighted_id_delimiter: "=".into(),
        }
    }
}

/// Text form of an integer, identical to how the builder stores numeric terms.
pub fn int_term(v: i64) -> String {
    v.to_string()
}

/// Floats always render with three decimals.
pub fn float_term(v: f32) -> String {
    format!("{v:.3}")
}

impl IdWeight {
    pub fn render(&self, format: &FeatureStringFormat) -> String {
        let id = match &self.id {
            WeightedId::IdBytes(s) => s.clone(),
            WeightedId::IdInt(i) => int_term(*i),
        };
        format!("{}{}{}", id, format.weighted_id_delimiter, float_term(self.weight))
    }
}

impl FeatureList {
    pub fn bytes<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FeatureList::BytesList(values.into_iter().map(Into::into).collect())
    }

    pub fn kind(&self) -> FeatureKind {
        match self {
            FeatureList::BytesList(_) => FeatureKind::Bytes,
            FeatureList::IntList(_) => FeatureKind::Int,
            FeatureList::FloatList(_) => FeatureKind::Float,
            FeatureList::WeightedList(_) => FeatureKind::Weighted,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FeatureList::BytesList(v) => v.len(),
            FeatureList::IntList(v) => v.len(),
            FeatureList::FloatList(v) => v.len(),
            FeatureList::WeightedList(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte values, if this is a bytes list.
    pub fn as_bytes(&self) -> Option<&[String]> {
        match self {
            FeatureList::BytesList(v) => Some(v),
            _ => None,
        }
    }

    /// Every value rendered as an index term.
    pub fn terms(&self, format: &FeatureStringFormat) -> Vec<String> {
        match self {
            FeatureList::BytesList(v) => v.clone(),
            FeatureList::IntList(v) => v.iter().map(|i| int_term(*i)).collect(),
            FeatureList::FloatList(v) => v.iter().map(|f| float_term(*f)).collect(),
            FeatureList::WeightedList(v) => v.iter().map(|w| w.render(format)).collect(),
        }
    }

    pub fn to_feature_string(&self, format: &FeatureStringFormat) -> String {
        self.terms(format).join(&format.inner_delimiter)
    }
}

/// Renders a whole map as `field:v1;v2|field:v1...` in field order.
pub fn feature_map_to_string(map: &FeatureMap, format: &FeatureStringFormat) -> String {
    map.iter()
        .map(|(field, list)| {
            format!("{}{}{}", field, format.field_id_delimiter, list.to_feature_string(format))
        })
        .collect::<Vec<_>>()
        .join(&format.between_delimiter)
}
