//! Node Store Integration Tests
//!
//! End-to-end scenarios through the public `arbordb` API:
//! merges and conflicts, checkpoints, observation, collection and reopening.

mod checkpoints;
mod collection;
mod concurrency;
mod observation;
mod persistence;

use arbordb::{
    CommitInfo, EmptyHook, NodeBuilder, NodeRef, NodeState, NodeStateExt, NodeStore, StoreConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration without background collection
pub fn test_config() -> StoreConfig {
    StoreConfig {
        gc_interval_ms: 0,
        ..StoreConfig::default()
    }
}

pub fn memory_store() -> Arc<NodeStore> {
    init_tracing();
    NodeStore::in_memory(test_config()).unwrap()
}

/// Route store logging to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Apply `f` to a builder of the current root and merge it
pub fn commit(store: &NodeStore, f: impl FnOnce(&NodeBuilder)) -> NodeRef {
    let builder = store.root().builder();
    f(&builder);
    store.merge(&builder, &EmptyHook, CommitInfo::empty()).unwrap()
}

pub fn long_at(node: &NodeRef, path: &[&str], name: &str) -> Option<i64> {
    let mut current = node.clone();
    for segment in path {
        current = current.child_node(segment);
    }
    current.property(name).and_then(|p| p.as_long())
}

/// Poll until `condition` holds, failing after ten seconds
pub fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
