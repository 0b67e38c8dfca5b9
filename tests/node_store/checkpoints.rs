//! Checkpoint Tests

use crate::{commit, long_at, memory_store};
use arbordb::{CompactMode, NodeState};
use std::collections::BTreeMap;

#[test]
fn checkpoint_pins_past_root() {
    let store = memory_store();
    commit(&store, |root| {
        root.child("a").set_property("v", 1i64);
    });
    let token = store.checkpoint(60_000, BTreeMap::new()).unwrap();
    commit(&store, |root| {
        root.child("a").set_property("v", 2i64);
    });

    let pinned = store.retrieve(&token).unwrap();
    assert_eq!(long_at(&pinned, &["a"], "v"), Some(1));
    assert_eq!(long_at(&store.root(), &["a"], "v"), Some(2));
}

#[test]
fn release_twice_reports_false() {
    let store = memory_store();
    let token = store.checkpoint(60_000, BTreeMap::new()).unwrap();
    assert!(store.release(&token).unwrap());
    assert!(!store.release(&token).unwrap());
    assert!(store.retrieve(&token).is_none());
    assert!(!store.release("no-such-checkpoint").unwrap());
}

#[test]
fn expired_checkpoint_is_gone() {
    let store = memory_store();
    let token = store.checkpoint(0, BTreeMap::new()).unwrap();
    assert!(store.retrieve(&token).is_none());
    assert!(store.checkpoint_info(&token).is_none());
    assert!(store.list_checkpoints().is_empty());
}

#[test]
fn info_is_listed() {
    let store = memory_store();
    let mut info = BTreeMap::new();
    info.insert("creator".to_string(), "indexer".to_string());
    let token = store.checkpoint(60_000, info.clone()).unwrap();

    let listed = store.list_checkpoints();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].token, token);
    assert_eq!(listed[0].info, info);
    assert!(listed[0].created_at().is_some());
    assert!(store.oldest_checkpoint_creation_timestamp() > 0);
}

#[test]
fn compaction_preserves_checkpoints() {
    let store = memory_store();
    let mut tokens = Vec::new();
    for i in 0..5i64 {
        commit(&store, |root| {
            root.child("a").set_property("v", i);
        });
        tokens.push(store.checkpoint(60_000, BTreeMap::new()).unwrap());
    }
    commit(&store, |root| {
        root.child("a").set_property("v", 99i64);
    });

    store.compact(CompactMode::Full).unwrap();

    for (i, token) in tokens.iter().enumerate() {
        let pinned = store.retrieve(token).unwrap();
        assert_eq!(long_at(&pinned, &["a"], "v"), Some(i as i64));
    }
    assert_eq!(long_at(&store.root(), &["a"], "v"), Some(99));
    assert!(store.root().exists());
}
