use crate::feature::FieldId;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Stored fields of one item, each an ordered list of non-empty values.
pub type Record = HashMap<FieldId, Vec<String>>;
/// term -> item keys in load order.
pub type Postings = HashMap<String, Vec<String>>;

/// Forward store plus the inverted store derived from it.
///
/// Built once by [`crate::builder::IndexBuilder`] and never mutated after,
/// so any number of readers may share it behind an `Arc`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HashIndex {
    key_field: FieldId,
    forward: HashMap<String, Record>,
    inverted: HashMap<FieldId, Postings>,
}

impl HashIndex {
    pub(crate) fn new(key_field: FieldId) -> Self {
        Self { key_field, ..Self::default() }
    }

    pub fn key_field(&self) -> FieldId {
        self.key_field
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn record(&self, key: &str) -> Option<&Record> {
        self.forward.get(key)
    }

    /// Postings of one field, `None` when no record ever carried it.
    pub fn postings(&self, field: FieldId) -> Option<&Postings> {
        self.inverted.get(&field)
    }

    /// Insert a record and index its terms. Returns false, leaving the index
    /// untouched, when the key is already present.
    pub(crate) fn insert(&mut self, key: String, record: Record) -> bool {
        let record = match self.forward.entry(key.clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => slot.insert(record),
        };
        for (field, values) in record.iter() {
            let postings = self.inverted.entry(*field).or_default();
            for value in values {
                postings.entry(value.clone()).or_default().push(key.clone());
            }
        }
        true
    }
}
