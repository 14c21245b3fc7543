use recflow_core::message::{ForwardRequest, IndexerReply, InvertedRequest, SearchClause};
use recflow_core::persist::{load_index, load_meta, save_index, IndexPaths};
use recflow_core::{build_from_path, build_from_reader, BulkFormat, FeatureList, HashIndex};
use std::collections::BTreeSet;
use std::io::Cursor;
use tempfile::tempdir;

const ROWS: &str = "key1,101_1,102_1:102_2:102_3,103_1\n\
                    key2,101_2,102_3:102_4:102_5,103_2\n\
                    key3,101_2,102_1:102_2:102_5,103_1\n\
                    key4,101_1,102_3,103_2\n\
                    key5,101_2,102_2:102_4\n";

fn format() -> BulkFormat {
    BulkFormat::new(vec![100, 101, 102, 103]).with_inner(":")
}

fn build() -> HashIndex {
    build_from_reader(Cursor::new(ROWS), &format()).unwrap().0
}

fn key_set(reply: &IndexerReply) -> BTreeSet<String> {
    reply.items.iter().map(|i| i.fields[&100].as_bytes().unwrap()[0].clone()).collect()
}

fn set(keys: &[&str]) -> BTreeSet<String> {
    keys.iter().map(|s| s.to_string()).collect()
}

fn search(index: &HashIndex, clauses: Vec<SearchClause>, max_results: usize) -> BTreeSet<String> {
    let req = InvertedRequest { clauses, max_results, requested_fields: vec![] };
    key_set(&index.inverted(&req).unwrap())
}

#[test]
fn single_field_search_returns_matching_rows() {
    let index = build();
    let req = InvertedRequest {
        clauses: vec![SearchClause::new().with_bytes(101, "101_1")],
        max_results: 100,
        requested_fields: vec![],
    };
    let reply = index.inverted(&req).unwrap();
    assert_eq!(key_set(&reply), set(&["key1", "key4"]));
    for item in &reply.items {
        assert_eq!(item.fields[&101], FeatureList::bytes(["101_1"]));
    }
}

#[test]
fn forward_lookup_returns_stored_fields_plus_key() {
    let index = build();
    for key in ["key1", "key2", "key3", "key4", "key5"] {
        let req =
            ForwardRequest { key_field: 100, keys: vec![key.into()], requested_fields: vec![] };
        let reply = index.forward(&req).unwrap();
        assert_eq!(reply.items.len(), 1);
        let fields = &reply.items[0].fields;
        let record = index.record(key).unwrap();
        assert_eq!(fields.len(), record.len() + 1);
        assert_eq!(fields[&100], FeatureList::bytes([key]));
        for (field, values) in record {
            assert_eq!(fields[field], FeatureList::BytesList(values.clone()));
        }
    }
}

#[test]
fn clause_is_exact_intersection() {
    let index = build();
    // 102_2 -> {key1, key3, key5}; 103_1 -> {key1, key3}
    let clause = SearchClause::new().with_bytes(102, "102_2").with_bytes(103, "103_1");
    let got = search(&index, vec![clause], 100);
    assert_eq!(got, set(&["key1", "key3"]));
}

#[test]
fn disjoint_clauses_union() {
    let index = build();
    let c1 = SearchClause::new().with_bytes(101, "101_1");
    let c2 = SearchClause::new().with_bytes(101, "101_2");
    assert_eq!(search(&index, vec![c1, c2], 10), set(&["key1", "key2", "key3", "key4", "key5"]));
}

#[test]
fn shrinking_cap_keeps_subset() {
    let index = build();
    let clauses = vec![
        SearchClause::new().with_bytes(102, "102_2"),
        SearchClause::new().with_bytes(102, "102_4"),
        SearchClause::new().with_bytes(103, "103_2"),
    ];
    let full = search(&index, clauses.clone(), 100);
    for cap in 0..=full.len() {
        let got = search(&index, clauses.clone(), cap);
        assert!(got.len() <= cap);
        assert!(got.is_subset(&full));
    }
}

#[test]
fn snapshot_survives_reload() {
    let dir = tempdir().unwrap();
    let csv = dir.path().join("items.csv");
    std::fs::write(&csv, ROWS).unwrap();
    let (index, stats) = build_from_path(&csv, &format()).unwrap();
    assert_eq!(stats.inserted, 5);

    let paths = IndexPaths::new(dir.path().join("snapshot"));
    let meta = save_index(&paths, &index).unwrap();
    assert_eq!(meta.num_items, 5);
    assert_eq!(load_meta(&paths).unwrap().key_field, 100);

    let loaded = load_index(&paths).unwrap();
    let clauses = vec![SearchClause::new().with_bytes(102, "102_3")];
    assert_eq!(search(&loaded, clauses.clone(), 10), search(&index, clauses, 10));
}
