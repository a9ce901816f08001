use smolder::{
    Function, InMemoryMetaStore, InstantProfileMeta, IteratorTreeNode, LabelSet, Line, Location,
    MetaStore, Profile, ProfileStore, ProfileTree, StackSample, StoreConfig, Timestamp, ValueType,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

fn profile(ts: Timestamp, value: i64, stack: Vec<u64>) -> Profile {
    let mut tree = ProfileTree::new();
    tree.insert(StackSample::new(value, stack));
    Profile {
        tree,
        meta: InstantProfileMeta {
            period_type: ValueType::new("cpu", "nanoseconds"),
            sample_type: ValueType::new("samples", "count"),
            timestamp: ts,
            duration: 1_000_000_000,
            period: 100_000_000,
        },
    }
}

#[test]
fn concurrent_appenders_on_distinct_series() {
    let store = Arc::new(ProfileStore::new());

    let mut handles = Vec::new();
    for worker in 0..4u32 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let labels = LabelSet::from_pairs([("worker", worker.to_string().as_str())]);
            let app = store.appender(labels).unwrap();
            for ts in 1..=200 {
                app.append(&profile(ts, 1, vec![2, 1])).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.series_count().unwrap(), 4);
    for worker in 0..4u32 {
        let labels = LabelSet::from_pairs([("worker", worker.to_string().as_str())]);
        let series = store.get(&labels).unwrap().unwrap();
        assert_eq!(series.num_samples().unwrap(), 200);
        assert_eq!(series.max_time().unwrap(), 200);
    }
}

#[test]
fn readers_see_a_consistent_snapshot_while_writers_append() {
    let store = Arc::new(ProfileStore::new());
    let labels = LabelSet::from_pairs([("job", "api")]);
    let app = store.appender(labels.clone()).unwrap();

    let writer = {
        let app = app.clone();
        thread::spawn(move || {
            for ts in 1..=500 {
                app.append(&profile(ts, ts, vec![2, 1])).unwrap();
            }
        })
    };

    // Iterators built mid-write must yield a prefix of the series, never error.
    let series = store.get(&labels).unwrap().unwrap();
    for _ in 0..10 {
        let mut it = series.iterator().unwrap();
        let mut expected_ts = 1;
        while it.next() {
            assert_eq!(it.at().meta().timestamp, expected_ts);
            expected_ts += 1;
        }
        assert!(it.err().is_none());
    }

    writer.join().unwrap();

    let mut it = series.iterator().unwrap();
    let mut count = 0;
    while it.next() {
        count += 1;
    }
    assert!(it.err().is_none());
    assert_eq!(count, 500);
}

#[test]
fn truncation_and_appends_interleave_safely() {
    let config = StoreConfig {
        chunk_capacity: 20,
        ..Default::default()
    };
    let store = Arc::new(ProfileStore::with_config(config));
    let labels = LabelSet::from_pairs([("job", "api")]);
    let app = store.appender(labels.clone()).unwrap();

    for ts in 1..=100 {
        app.append(&profile(ts, 1, vec![2, 1])).unwrap();
    }
    let it_before = store.get(&labels).unwrap().unwrap().iterator().unwrap();

    assert!(store.truncate_before(50).unwrap() > 0);

    // The pre-truncation snapshot still reads every sample it observed.
    let mut it = it_before;
    let mut count = 0;
    while it.next() {
        count += 1;
    }
    assert!(it.err().is_none());
    assert_eq!(count, 100);

    for ts in 101..=120 {
        app.append(&profile(ts, 1, vec![2, 1])).unwrap();
    }
    let series = store.get(&labels).unwrap().unwrap();
    assert_eq!(series.max_time().unwrap(), 120);

    let mut it = series.iterator().unwrap();
    let mut first = None;
    let mut count = 0;
    while it.next() {
        first.get_or_insert(it.at().meta().timestamp);
        count += 1;
    }
    assert!(it.err().is_none());
    assert_eq!(first, Some(41));
    assert_eq!(count, 80);
}

fn leaf_location_ids(node: &IteratorTreeNode, out: &mut Vec<u64>) {
    if node.children().is_empty() && node.location_id() != 0 {
        out.push(node.location_id());
    }
    for child in node.children() {
        leaf_location_ids(child, out);
    }
}

#[test]
fn metastore_resolves_locations_referenced_by_profiles() {
    let meta_store = InMemoryMetaStore::new();
    meta_store
        .add_function(Function {
            id: 10,
            name: "handle_request".to_string(),
            system_name: "handle_request".to_string(),
            filename: "server.rs".to_string(),
            start_line: 12,
        })
        .unwrap();
    meta_store
        .add_location(Location {
            id: 2,
            mapping_id: 1,
            address: 0x1000,
            lines: vec![Line {
                function_id: 10,
                line: 14,
            }],
            is_folded: false,
        })
        .unwrap();

    let store = ProfileStore::new();
    let app = store
        .appender(LabelSet::from_pairs([("job", "api")]))
        .unwrap();
    app.append(&profile(1, 1, vec![2, 1])).unwrap();

    let series = app.series();
    let mut it = series.iterator().unwrap();
    assert!(it.next());

    let mut leaves = Vec::new();
    leaf_location_ids(it.at().tree_root(), &mut leaves);
    assert_eq!(leaves, vec![2]);

    let locations = meta_store.locations_by_ids(&leaves).unwrap();
    assert_eq!(locations.len(), 1);
    let functions = meta_store
        .functions_by_ids(&[locations[0].lines[0].function_id])
        .unwrap();
    assert_eq!(functions[0].name, "handle_request");
}

#[test]
fn label_payloads_are_shared_not_copied() {
    let store = ProfileStore::new();
    let app = store
        .appender(LabelSet::from_pairs([("job", "api")]))
        .unwrap();

    let mut labeled = StackSample::new(2, vec![4, 1]);
    labeled.labels = HashMap::from([("foo".to_string(), vec!["bar".into()])]);
    let mut tree = ProfileTree::new();
    tree.insert(labeled);
    app.append(&Profile {
        tree,
        meta: InstantProfileMeta {
            period_type: ValueType::new("cpu", "nanoseconds"),
            sample_type: ValueType::new("samples", "count"),
            timestamp: 1,
            duration: 0,
            period: 0,
        },
    })
    .unwrap();

    let series = app.series();
    let it_a = series.iterator().unwrap();
    let it_b = series.iterator().unwrap();

    let mut it_a = it_a;
    let mut it_b = it_b;
    assert!(it_a.next());
    assert!(it_b.next());

    let vals_a = it_a.at().tree_root().children()[0].children()[0].flat_values();
    let vals_b = it_b.at().tree_root().children()[0].children()[0].flat_values();
    let a = vals_a[0].labels.clone().expect("labels captured");
    let b = vals_b[0].labels.clone().expect("labels captured");
    assert!(Arc::ptr_eq(&a, &b));
}
