//! Persistence Tests
//!
//! A store reopened from its directory continues from the last merged root.

use crate::{commit, long_at, test_config};
use arbordb::{CompactMode, NodeState, NodeStore, CONFIG_FILE_NAME};
use std::collections::BTreeMap;
use tempfile::TempDir;

#[test]
fn reopen_continues_from_last_root() {
    let dir = TempDir::new().unwrap();
    {
        let store = NodeStore::open_with_config(dir.path(), test_config()).unwrap();
        for i in 0..10i64 {
            commit(&store, |root| {
                root.child("counter").set_property("v", i);
            });
        }
        store.close().unwrap();
    }

    let store = NodeStore::open(dir.path()).unwrap();
    assert_eq!(long_at(&store.root(), &["counter"], "v"), Some(9));
    commit(&store, |root| {
        root.child("counter").set_property("v", 10i64);
    });
    assert_eq!(long_at(&store.root(), &["counter"], "v"), Some(10));
}

#[test]
fn reopen_after_compaction() {
    let dir = TempDir::new().unwrap();
    let token = {
        let store = NodeStore::open_with_config(dir.path(), test_config()).unwrap();
        commit(&store, |root| {
            root.child("a").set_property("v", 1i64);
        });
        let token = store.checkpoint(60_000, BTreeMap::new()).unwrap();
        commit(&store, |root| {
            root.child("a").set_property("v", 2i64);
            root.child("b");
        });
        store.compact(CompactMode::Full).unwrap();
        store.close().unwrap();
        token
    };

    let store = NodeStore::open(dir.path()).unwrap();
    assert_eq!(long_at(&store.root(), &["a"], "v"), Some(2));
    assert!(store.root().has_child_node("b"));
    assert_eq!(long_at(&store.retrieve(&token).unwrap(), &["a"], "v"), Some(1));
}

#[test]
fn config_is_written_once() {
    let dir = TempDir::new().unwrap();
    NodeStore::open_with_config(dir.path(), test_config())
        .unwrap()
        .close()
        .unwrap();
    assert!(dir.path().join(CONFIG_FILE_NAME).exists());

    let store = NodeStore::open(dir.path()).unwrap();
    assert_eq!(store.config().gc_interval_ms, 0);
}

#[test]
fn closed_store_rejects_merges() {
    let dir = TempDir::new().unwrap();
    let store = NodeStore::open_with_config(dir.path(), test_config()).unwrap();
    let builder = arbordb::NodeStateExt::builder(&store.root());
    builder.child("late");
    store.close().unwrap();
    assert!(store
        .merge(&builder, &arbordb::EmptyHook, arbordb::CommitInfo::empty())
        .is_err());
}
