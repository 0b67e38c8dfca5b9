//! Seeding a store with initial content
//!
//! [`InitialContentMigrator`] copies the (filtered) content of a seed store
//! into a target store exactly once. Completion is marked by a `:composite`
//! node below the target root. When several instances share one target, only
//! the initializing instance copies; the others wait, bounded by a timeout,
//! until the marker appears.

use crate::store::NodeStore;
use crate::observation::Observer;
use arbor_concurrency::{CommitInfo, EmptyHook};
use arbor_core::{
    empty_node, path, try_compare, ApplyDiff, Error, FilteringNodeState, LoggingReporter, NodeRef,
    NodeStateExt, PathFilter, ReportingNodeState, Result,
};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Marker node of an initialized target
pub const INITIALIZED_MARKER: &str = ":composite";

/// Node recording the checkpoints of the asynchronous indexers
pub const ASYNC_NODE: &str = ":async";

/// Names of the indexer lanes a checkpoint is created for
pub const ASYNC_LANES: [&str; 2] = ["fulltext-async", "async"];

const LOG_NODE_COPY: u64 = 10_000;

/// Copies seed content into a target store once
pub struct InitialContentMigrator {
    target: Arc<NodeStore>,
    seed: Arc<NodeStore>,
    include_paths: Vec<String>,
    exclude_paths: Vec<String>,
    excluded_fragments: Vec<String>,
    initializer: bool,
    wait_timeout: Duration,
}

impl InitialContentMigrator {
    /// Migrator copying all of `seed` into `target`
    pub fn new(target: Arc<NodeStore>, seed: Arc<NodeStore>) -> Self {
        Self {
            target,
            seed,
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            excluded_fragments: Vec::new(),
            initializer: true,
            wait_timeout: Duration::from_secs(60),
        }
    }

    /// Only copy these paths (and their ancestors)
    pub fn include_paths(mut self, paths: Vec<String>) -> Self {
        self.include_paths = paths;
        self
    }

    /// Do not copy these subtrees
    pub fn exclude_paths(mut self, paths: Vec<String>) -> Self {
        self.exclude_paths = paths;
        self
    }

    /// Do not copy nodes whose name contains any of these fragments
    pub fn excluded_fragments(mut self, fragments: Vec<String>) -> Self {
        self.excluded_fragments = fragments;
        self
    }

    /// Whether this instance copies (true) or waits for another instance
    pub fn initializer(mut self, initializer: bool) -> Self {
        self.initializer = initializer;
        self
    }

    /// Longest wait of a non-initializing instance
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// True if the target carries the completion marker
    pub fn is_target_initialized(&self) -> bool {
        self.target.root().has_child_node(INITIALIZED_MARKER)
    }

    /// Copy the seed unless the target is initialized already
    ///
    /// Returns true if this call copied the seed.
    pub fn migrate(&self) -> Result<bool> {
        if self.is_target_initialized() {
            info!(target: "arbor::store", "Target already initialized, not copying the seed");
            return Ok(false);
        }
        if self.initializer {
            self.do_migrate()?;
            Ok(true)
        } else {
            info!(target: "arbor::store", "Waiting for the target to be initialized");
            self.wait_for_initialization()?;
            Ok(false)
        }
    }

    fn seed_root(&self, reporter: Arc<LoggingReporter>) -> NodeRef {
        let filter = Arc::new(
            PathFilter::new(self.include_paths.clone(), self.exclude_paths.clone())
                .with_excluded_fragments(self.excluded_fragments.clone()),
        );
        let filtered = FilteringNodeState::wrap(path::ROOT, self.seed.root(), filter);
        ReportingNodeState::wrap(filtered, reporter)
    }

    fn do_migrate(&self) -> Result<()> {
        info!(
            target: "arbor::store",
            include = ?self.include_paths,
            exclude = ?self.exclude_paths,
            excluded_fragments = ?self.excluded_fragments,
            "Copying seed content"
        );

        let reporter = Arc::new(LoggingReporter::new("Copying", LOG_NODE_COPY, 0));
        let builder = self.target.root().builder();
        let mut apply = ApplyDiff::new(builder.clone());
        try_compare(path::ROOT, &empty_node(), &self.seed_root(reporter.clone()), &mut apply)?;
        self.target.merge(&builder, &EmptyHook, CommitInfo::empty())?;
        info!(
            target: "arbor::store",
            nodes = reporter.node_count(),
            properties = reporter.property_count(),
            "Seed content copied"
        );

        let mut lanes = Vec::with_capacity(ASYNC_LANES.len());
        for lane in ASYNC_LANES {
            let mut info = BTreeMap::new();
            info.insert("name".to_string(), lane.to_string());
            lanes.push((lane, self.target.checkpoint(u64::MAX, info)?));
        }

        let builder = self.target.root().builder();
        if let Some(existing) = builder.get_child(ASYNC_NODE) {
            existing.remove();
        }
        let async_node = builder.child(ASYNC_NODE);
        for (lane, token) in &lanes {
            async_node.set_property(lane, token.as_str());
        }
        self.target.merge(&builder, &EmptyHook, CommitInfo::empty())?;

        let builder = self.target.root().builder();
        builder.child(INITIALIZED_MARKER);
        self.target.merge(&builder, &EmptyHook, CommitInfo::empty())?;
        info!(target: "arbor::store", "Target initialized");
        Ok(())
    }

    fn wait_for_initialization(&self) -> Result<()> {
        let watch = Arc::new(InitializationWatch::default());
        let registration = self.target.add_observer(watch.clone())?;
        let deadline = Instant::now() + self.wait_timeout;
        let initialized = self.is_target_initialized() || watch.wait_until(deadline);
        registration.close();
        if initialized {
            Ok(())
        } else {
            Err(Error::InvalidOperation(format!(
                "target store not initialized within {:?}",
                self.wait_timeout
            )))
        }
    }
}

/// Signals once a root with the completion marker is published
#[derive(Default)]
struct InitializationWatch {
    done: Mutex<bool>,
    cond: Condvar,
}

impl InitializationWatch {
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut done = self.done.lock();
        while !*done {
            if self.cond.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }
}

impl Observer for InitializationWatch {
    fn content_changed(&self, _before: &NodeRef, after: &NodeRef, _info: &CommitInfo) {
        if after.has_child_node(INITIALIZED_MARKER) {
            *self.done.lock() = true;
            self.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    fn store() -> Arc<NodeStore> {
        NodeStore::in_memory(StoreConfig {
            gc_interval_ms: 0,
            ..StoreConfig::default()
        })
        .unwrap()
    }

    fn seed() -> Arc<NodeStore> {
        let seed = store();
        let builder = seed.root().builder();
        builder.child("apps").child("app").set_property("title", "seed");
        builder.child("libs").set_property("v", 1i64);
        builder.child("tmp").child("x");
        builder.child("content").child("data-oak:mount-seed");
        seed.merge(&builder, &EmptyHook, CommitInfo::empty()).unwrap();
        seed
    }

    #[test]
    fn test_migration_copies_filtered_seed() {
        let target = store();
        let migrator = InitialContentMigrator::new(target.clone(), seed())
            .exclude_paths(vec!["/tmp".to_string()])
            .excluded_fragments(vec![":mount-".to_string()]);
        assert!(migrator.migrate().unwrap());

        let root = target.root();
        assert_eq!(
            root.child_node("apps")
                .child_node("app")
                .property("title")
                .and_then(|p| p.as_str().map(str::to_string)),
            Some("seed".to_string())
        );
        assert!(root.has_child_node("libs"));
        assert!(!root.has_child_node("tmp"));
        assert!(root.has_child_node("content"));
        assert!(!root.child_node("content").has_child_node("data-oak:mount-seed"));
        assert!(root.has_child_node(INITIALIZED_MARKER));
    }

    #[test]
    fn test_async_checkpoints_are_recorded() {
        let target = store();
        InitialContentMigrator::new(target.clone(), seed()).migrate().unwrap();

        let async_node = target.root().child_node(ASYNC_NODE);
        for lane in ASYNC_LANES {
            let token = async_node
                .property(lane)
                .and_then(|p| p.as_str().map(str::to_string))
                .unwrap();
            let info = target.checkpoint_info(&token).unwrap();
            assert_eq!(info.get("name").map(String::as_str), Some(lane));
            assert!(target.retrieve(&token).unwrap().has_child_node("apps"));
        }
    }

    #[test]
    fn test_second_migration_is_noop() {
        let target = store();
        let seed = seed();
        assert!(InitialContentMigrator::new(target.clone(), seed.clone()).migrate().unwrap());
        assert!(!InitialContentMigrator::new(target.clone(), seed).migrate().unwrap());
        assert_eq!(target.checkpoints().len(), 2);
    }

    #[test]
    fn test_waiting_instance_times_out() {
        let migrator = InitialContentMigrator::new(store(), seed())
            .initializer(false)
            .wait_timeout(Duration::from_millis(50));
        let err = migrator.migrate().unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_waiting_instance_sees_initialization() {
        let target = store();
        let seed = seed();
        let waiter = InitialContentMigrator::new(target.clone(), seed.clone())
            .initializer(false)
            .wait_timeout(Duration::from_secs(10));
        let handle = std::thread::spawn(move || waiter.migrate());

        std::thread::sleep(Duration::from_millis(20));
        InitialContentMigrator::new(target, seed).migrate().unwrap();
        assert!(!handle.join().unwrap().unwrap());
    }
}
