//! Garbage Collection Tests
//!
//! Collection passes through the store keep the head and every live
//! checkpoint readable, whatever the cleanup strategy.

use crate::{commit, long_at, test_config};
use arbordb::{CleanupType, CompactMode, CompactionStrategy, GcPhase, NodeStore, StoreConfig};
use std::collections::BTreeMap;
use std::time::Duration;

fn store_with(cleanup: CleanupType) -> std::sync::Arc<NodeStore> {
    NodeStore::in_memory(StoreConfig {
        compaction: CompactionStrategy::default().with_cleanup(cleanup, Duration::ZERO),
        ..test_config()
    })
    .unwrap()
}

fn churn(store: &NodeStore, rounds: i64) {
    for i in 0..rounds {
        commit(store, |root| {
            root.child("data").set_property("v", i);
            root.child("data").set_property("payload", "x".repeat(512));
        });
    }
}

#[test]
fn full_pass_reclaims_old_revisions() {
    let store = store_with(CleanupType::CleanAll);
    churn(&store, 40);

    let info = store.compact(CompactMode::Full).unwrap();
    assert!(info.did_compact());
    assert!(info.did_clean());
    assert!(info.reclaimed_bytes > 0);
    assert_eq!(long_at(&store.root(), &["data"], "v"), Some(39));
    assert_eq!(store.garbage_collector().phase(), GcPhase::Idle);
}

#[test]
fn commits_after_compaction_work() {
    let store = store_with(CleanupType::CleanAll);
    churn(&store, 10);
    store.compact(CompactMode::Full).unwrap();
    churn(&store, 10);
    store.compact(CompactMode::Full).unwrap();
    assert_eq!(long_at(&store.root(), &["data"], "v"), Some(9));
}

#[test]
fn every_cleanup_type_keeps_checkpoints() {
    for cleanup in [CleanupType::CleanAll, CleanupType::CleanOld, CleanupType::CleanNone] {
        let store = store_with(cleanup);
        churn(&store, 5);
        let token = store.checkpoint(60_000, BTreeMap::new()).unwrap();
        commit(&store, |root| {
            root.child("data").set_property("v", 100i64);
        });

        store.gc().unwrap();
        store.compact(CompactMode::Full).unwrap();

        let pinned = store.retrieve(&token).unwrap();
        assert_eq!(long_at(&pinned, &["data"], "v"), Some(4), "{}", cleanup.name());
        assert_eq!(long_at(&store.root(), &["data"], "v"), Some(100), "{}", cleanup.name());
    }
}

#[test]
fn gc_drops_released_checkpoints() {
    let store = store_with(CleanupType::CleanAll);
    churn(&store, 5);
    let token = store.checkpoint(60_000, BTreeMap::new()).unwrap();
    churn(&store, 5);
    store.release(&token).unwrap();

    let info = store.compact(CompactMode::Full).unwrap();
    assert!(info.did_clean());
    assert!(store.retrieve(&token).is_none());
}
