//! Event store behavior shared by both backends.

#![allow(unused_results)]

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use serde_json::json;
use swarm_store::{ConnectionConfig, Database, EventStore, NewEvent, ReadOptions};

fn backends() -> Vec<(&'static str, Database, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let file = Database::open(dir.path().join("events.db"), &ConnectionConfig::default()).unwrap();
    let memory = Database::in_memory(&ConnectionConfig::default()).unwrap();
    vec![("file", file, Some(dir)), ("memory", memory, None)]
}

#[test]
fn concurrent_appends_get_dense_unique_sequences() {
    for (name, db, _guard) in backends() {
        let store = Arc::new(EventStore::new(db));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..25)
                        .map(|i| {
                            store
                                .append("proj", &NewEvent::new("tick", json!({"w": worker, "i": i})))
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for seq in handle.join().unwrap() {
                assert!(seen.insert(seq), "{name}: duplicate sequence {seq}");
            }
        }
        assert_eq!(seen.len(), 200, "{name}");
        assert_eq!(seen.iter().copied().max(), Some(200), "{name}");

        let read = store.read("proj", &ReadOptions::default()).unwrap();
        let seqs: Vec<i64> = read.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, (1..=200).collect::<Vec<_>>(), "{name}");
    }
}

#[test]
fn two_handles_on_one_file_share_the_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let a = EventStore::new(Database::open(&path, &ConnectionConfig::default()).unwrap());
    let b = EventStore::new(Database::open(&path, &ConnectionConfig::default()).unwrap());

    assert_eq!(a.append("p", &NewEvent::new("x", json!({}))).unwrap(), 1);
    assert_eq!(b.append("p", &NewEvent::new("x", json!({}))).unwrap(), 2);
    assert_eq!(a.read("p", &ReadOptions::default()).unwrap().len(), 2);
}

#[test]
fn injection_strings_are_data() {
    for (name, db, _guard) in backends() {
        let store = EventStore::new(db.clone());
        let hostile = "p'; DELETE FROM events; --";
        let tables_before = db
            .query("SELECT COUNT(*) AS n FROM sqlite_master", &[])
            .unwrap()[0]
            .get::<i64>("n")
            .unwrap();

        store
            .append(hostile, &NewEvent::new("t\"; DROP TABLE cursors", json!({"q": "'"})))
            .unwrap();
        store.append("other", &NewEvent::new("t", json!({}))).unwrap();

        let read = store.read(hostile, &ReadOptions::default()).unwrap();
        assert_eq!(read.len(), 1, "{name}");
        assert_eq!(read[0].project_key, hostile);
        assert_eq!(read[0].event_type, "t\"; DROP TABLE cursors");
        assert_eq!(store.count("other").unwrap(), 1, "{name}");

        let tables_after = db
            .query("SELECT COUNT(*) AS n FROM sqlite_master", &[])
            .unwrap()[0]
            .get::<i64>("n")
            .unwrap();
        assert_eq!(tables_before, tables_after, "{name}");
    }
}
