use crate::feature::{FeatureList, FieldId};
use crate::index::{HashIndex, Record};
use crate::message::{
    ForwardRequest, IndexItem, IndexerReply, InvertedRequest, SearchClause, SearchItem,
};
use crate::status::{Status, StatusResult};
use std::collections::HashSet;

/// Keys matched so far, deduplicated and kept in first-seen order.
struct KeyAccumulator<'a> {
    keys: Vec<&'a str>,
    seen: HashSet<&'a str>,
    cap: usize,
}

impl<'a> KeyAccumulator<'a> {
    fn new(cap: usize) -> Self {
        Self { keys: Vec::new(), seen: HashSet::new(), cap }
    }

    fn is_full(&self) -> bool {
        self.keys.len() >= self.cap
    }

    fn push(&mut self, key: &'a str) {
        if !self.is_full() && self.seen.insert(key) {
            self.keys.push(key);
        }
    }
}

impl HashIndex {
    /// Exact lookup of `keys`. Unknown keys are omitted; a request naming a
    /// different key field than this index was built with is cancelled.
    pub fn forward(&self, req: &ForwardRequest) -> StatusResult<IndexerReply> {
        if req.key_field != self.key_field() {
            return Err(Status::cancelled(format!(
                "key field {} does not match index key field {}",
                req.key_field,
                self.key_field()
            )));
        }
        let requested: HashSet<FieldId> = req.requested_fields.iter().copied().collect();
        let items = req
            .keys
            .iter()
            .filter_map(|key| self.record(key).map(|record| self.project(key, record, &requested)))
            .collect();
        Ok(IndexerReply { items })
    }

    /// Union over clauses of the intersection within each clause, capped at
    /// `max_results` keys. Clauses after the cap is reached are not evaluated.
    pub fn inverted(&self, req: &InvertedRequest) -> StatusResult<IndexerReply> {
        let mut acc = KeyAccumulator::new(req.max_results);
        for clause in &req.clauses {
            if acc.is_full() {
                break;
            }
            for key in self.intersect(clause) {
                acc.push(key);
                if acc.is_full() {
                    break;
                }
            }
        }
        tracing::debug!(clauses = req.clauses.len(), matched = acc.keys.len(), "inverted search");

        let requested: HashSet<FieldId> = req.requested_fields.iter().copied().collect();
        let items = acc
            .keys
            .into_iter()
            .filter_map(|key| self.record(key).map(|record| self.project(key, record, &requested)))
            .collect();
        Ok(IndexerReply { items })
    }

    /// Keys satisfying every matchable item of `clause`, in the order of the
    /// first constraining posting list. Empty when the clause names a field
    /// that was never indexed or any constraint has no postings.
    fn intersect(&self, clause: &SearchClause) -> Vec<&str> {
        let mut current: Option<Vec<&str>> = None;
        for (field, item) in &clause.items {
            let Some(postings) = self.postings(*field) else {
                return Vec::new();
            };
            let term = match item {
                SearchItem::Match(value) => match value.term() {
                    Some(term) => term,
                    None => continue,
                },
                SearchItem::Weighted(_) | SearchItem::Unset => continue,
            };
            let keys = match postings.get(&term) {
                Some(keys) if !keys.is_empty() => keys,
                _ => return Vec::new(),
            };
            let next: Vec<&str> = match current {
                None => keys.iter().map(String::as_str).collect(),
                Some(prev) => {
                    let allowed: HashSet<&str> = keys.iter().map(String::as_str).collect();
                    prev.into_iter().filter(|k| allowed.contains(k)).collect()
                }
            };
            if next.is_empty() {
                return next;
            }
            current = Some(next);
        }
        current.unwrap_or_default()
    }

    fn project(&self, key: &str, record: &Record, requested: &HashSet<FieldId>) -> IndexItem {
        let wanted = |field: &FieldId| requested.is_empty() || requested.contains(field);
        let mut item = IndexItem::default();
        for (field, values) in record.iter().filter(|(f, _)| wanted(*f)) {
            item.fields.insert(*field, FeatureList::BytesList(values.clone()));
        }
        // The key is not stored among the record fields, so it is added here.
        if wanted(&self.key_field()) {
            item.fields.insert(self.key_field(), FeatureList::bytes([key]));
        }
        item
    }
}
