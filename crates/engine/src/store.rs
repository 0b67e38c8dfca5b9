//! Segment-backed node store
//!
//! [`NodeStore`] is the entry point of the engine. It keeps the head of the
//! store, a *super root* whose `root` child is the visible tree and whose
//! `checkpoints` child pins checkpointed trees, and publishes new heads
//! through [`NodeStore::merge`].
//!
//! # Merge
//!
//! Merges are optimistic: a builder is edited against some root and merged
//! later. Under the commit lock the builder's changes are rebased onto the
//! current root, the commit hook runs, the result is persisted and the new
//! head published. Observers receive the transition before the lock is
//! released, so they see transitions in commit order.
//!
//! # Lifecycle
//!
//! ```text
//! open / in_memory --> merge / checkpoint / gc ... --> close (or drop)
//! ```

use crate::background::GcScheduler;
use crate::config::{ConfigError, StoreConfig, CONFIG_FILE_NAME};
use crate::observation::{
    ChangeDispatcher, EventFilter, EventListener, ObservationQueue, Observer, ObserverRegistration,
};
use arbor_concurrency::{rebase, CommitHook, CommitInfo};
use arbor_core::{empty_node, Error, GcGeneration, NodeBuilder, NodeRef, NodeStateExt, RecordId, Result};
use arbor_durability::compaction::Result as CompactionResult;
use arbor_durability::{CompactInfo, CompactMode, GarbageCollector, LoggingGcMonitor, Revisions};
use arbor_storage::{
    FileStore, MemoryStore, SegmentReader, SegmentStore, SegmentTracker, SegmentWriter, SweepInfo,
    WriterOptions,
};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Child of the super root holding the visible tree
pub const ROOT: &str = "root";

/// Child of the super root holding the checkpoints
pub const CHECKPOINTS: &str = "checkpoints";

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Io { source, .. } => Error::Io(source),
            other => Error::InvalidOperation(other.to_string()),
        }
    }
}

/// Versioned tree store on top of a segment store
pub struct NodeStore {
    config: StoreConfig,
    directory: Option<PathBuf>,
    store: Arc<dyn SegmentStore>,
    reader: Arc<SegmentReader>,
    writer: SegmentWriter,
    head: RwLock<NodeRef>,
    commit_lock: Mutex<()>,
    dispatcher: Arc<ChangeDispatcher>,
    gc: GarbageCollector,
    scheduler: Mutex<Option<GcScheduler>>,
    closed: AtomicBool,
}

impl NodeStore {
    /// Open the store in `directory` using its `arbor.toml`
    ///
    /// A default `arbor.toml` is written on first open.
    pub fn open(directory: impl AsRef<Path>) -> Result<Arc<Self>> {
        let config = StoreConfig::load_or_create(directory.as_ref())?;
        Self::open_with_config(directory, config)
    }

    /// Open the store in `directory` with an explicit configuration
    ///
    /// The configuration is written to `arbor.toml` so a later
    /// [`open`](NodeStore::open) picks it up.
    pub fn open_with_config(directory: impl AsRef<Path>, config: StoreConfig) -> Result<Arc<Self>> {
        let directory = directory.as_ref().to_path_buf();
        config.validate()?;
        std::fs::create_dir_all(&directory)?;
        config.write_to_file(&directory.join(CONFIG_FILE_NAME))?;

        let store: Arc<dyn SegmentStore> =
            Arc::new(FileStore::open(&directory, config.file_store_options())?);
        info!(target: "arbor::store", path = ?directory, "Opening node store");
        Self::build(store, config, Some(directory))
    }

    /// Store keeping all segments in memory
    pub fn in_memory(config: StoreConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Self::build(Arc::new(MemoryStore::new()), config, None)
    }

    /// Store over an existing segment store
    pub fn with_segment_store(store: Arc<dyn SegmentStore>, config: StoreConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Self::build(store, config, None)
    }

    fn build(
        store: Arc<dyn SegmentStore>,
        config: StoreConfig,
        directory: Option<PathBuf>,
    ) -> Result<Arc<Self>> {
        let reader = Arc::new(SegmentReader::new(store.clone(), Arc::new(SegmentTracker::new())));
        let writer = SegmentWriter::new(
            store.clone(),
            WriterOptions {
                generation: store.max_generation().uncompacted(),
                ..config.writer_options()
            },
        );

        let head_id = match store.journal_head()? {
            Some(id) => id,
            None => {
                let builder = empty_node().builder();
                builder.child(ROOT);
                builder.child(CHECKPOINTS);
                let id = writer.write_node(&builder.node_state())?;
                writer.flush()?;
                store.set_journal_head(id)?;
                debug!(target: "arbor::store", head = %id, "Initialized empty store");
                id
            }
        };
        let head = reader.node_state(head_id);
        head.load()?;

        let gc = GarbageCollector::new(
            reader.clone(),
            config.compaction.clone(),
            Arc::new(LoggingGcMonitor),
            config.max_segment_size,
        );
        let interval = config.gc_interval_ms;

        let node_store = Arc::new(Self {
            config,
            directory,
            store,
            reader,
            writer,
            head: RwLock::new(head),
            commit_lock: Mutex::new(()),
            dispatcher: Arc::new(ChangeDispatcher::new()),
            gc,
            scheduler: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        if interval > 0 {
            let scheduler =
                GcScheduler::start(Arc::downgrade(&node_store), Duration::from_millis(interval))?;
            *node_store.scheduler.lock() = Some(scheduler);
        }
        Ok(node_store)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Configuration the store was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Directory of a file-backed store
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Underlying segment store
    pub fn segment_store(&self) -> &Arc<dyn SegmentStore> {
        &self.store
    }

    /// Reader resolving record ids of this store
    pub fn reader(&self) -> &Arc<SegmentReader> {
        &self.reader
    }

    /// The garbage collector, e.g. to change its strategy or cancel a pass
    pub fn garbage_collector(&self) -> &GarbageCollector {
        &self.gc
    }

    /// The current root
    pub fn root(&self) -> NodeRef {
        self.head.read().child_node(ROOT)
    }

    /// The current super root
    pub fn super_root(&self) -> NodeRef {
        self.head.read().clone()
    }

    /// True once [`close`](NodeStore::close) was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidOperation("node store is closed".to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Commits
    // ========================================================================

    /// Merge the changes of `builder` into the current root
    ///
    /// The builder's changes relative to its base are rebased onto the
    /// current root; `Error::Conflict` is returned if both touched the same
    /// item. On success the builder is reset to the new root, which is
    /// returned.
    pub fn merge(&self, builder: &NodeBuilder, hook: &dyn CommitHook, info: CommitInfo) -> Result<NodeRef> {
        self.check_open()?;
        let base = builder.base_state();
        let ours = builder.try_node_state()?;

        let _guard = self.commit_lock.lock();
        let head = self.head.read().clone();
        let current = head.child_node(ROOT);
        let rebased = rebase(&base, &ours, &current)?;
        let candidate = hook.process_commit(&current, &rebased, &info)?;

        let super_root = head.builder();
        super_root.set_child_node(ROOT, candidate);
        let published = self.publish(&super_root.try_node_state()?)?;
        let after = published.child_node(ROOT);

        builder.reset(after.clone());
        self.dispatcher.content_changed(&current, &after, &info);
        debug!(
            target: "arbor::store",
            session = %info.session_id,
            head = ?published.record_id(),
            "Merged commit"
        );
        Ok(after)
    }

    /// Persist `super_root` and make it the head; requires the commit lock
    pub(crate) fn publish(&self, super_root: &NodeRef) -> Result<NodeRef> {
        let id = self.writer.write_node(super_root)?;
        self.writer.flush()?;
        let head = self.reader.node_state(id);
        head.load()?;
        self.store.set_journal_head(id)?;
        *self.head.write() = head.clone();
        Ok(head)
    }

    /// Run `f` on a builder of the super root and publish the result
    ///
    /// Observers are not notified: the visible root does not change.
    pub(crate) fn update_super_root<T>(&self, f: impl FnOnce(&NodeBuilder) -> Result<T>) -> Result<T> {
        self.check_open()?;
        let _guard = self.commit_lock.lock();
        let head = self.head.read().clone();
        let builder = head.builder();
        let value = f(&builder)?;
        if builder.is_modified() {
            self.publish(&builder.try_node_state()?)?;
        }
        Ok(value)
    }

    /// Flush buffered records to the segment store
    pub fn flush(&self) -> Result<()> {
        self.writer.flush()?;
        self.store.flush()
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Register an observer of root transitions
    ///
    /// The observer runs on its own thread behind a queue of
    /// `observer_queue_length` transitions.
    pub fn add_observer(&self, observer: Arc<dyn Observer>) -> Result<ObserverRegistration> {
        self.check_open()?;
        let registration = self
            .dispatcher
            .add_background_observer(observer, self.config.observer_queue_length)?;
        Ok(registration)
    }

    /// Register a listener receiving the events matching `filter`
    pub fn add_listener(
        &self,
        listener: Arc<dyn EventListener>,
        filter: EventFilter,
    ) -> Result<ObserverRegistration> {
        let filter = filter.with_default_node_type_property(&self.config.node_type_property);
        let queue = ObservationQueue::new(listener, filter, self.config.identifier_property.clone());
        self.add_observer(Arc::new(queue))
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Purge expired checkpoints and run a tail collection pass
    pub fn gc(&self) -> CompactionResult<CompactInfo> {
        self.check_open()?;
        let purged = self.purge_expired_checkpoints()?;
        if purged > 0 {
            debug!(target: "arbor::compaction", purged, "Purged expired checkpoints before collection");
        }
        self.gc.run(CompactMode::Tail, self)
    }

    /// Run a collection pass in `mode`
    pub fn compact(&self, mode: CompactMode) -> CompactionResult<CompactInfo> {
        self.check_open()?;
        self.gc.run(mode, self)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop background work, detach observers and close the segment store
    ///
    /// Idempotent. Operations on a closed store fail with
    /// `Error::InvalidOperation`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop();
        }
        self.gc.cancel();
        self.dispatcher.close();
        let _guard = self.commit_lock.lock();
        self.writer.flush()?;
        self.store.close()?;
        info!(target: "arbor::store", path = ?self.directory, "Node store closed");
        Ok(())
    }
}

impl Revisions for NodeStore {
    fn head(&self) -> Result<RecordId> {
        self.head
            .read()
            .record_id()
            .ok_or_else(|| Error::InvalidOperation("head is not persisted".to_string()))
    }

    fn swap_head(
        &self,
        generation: GcGeneration,
        update: &mut dyn FnMut(RecordId) -> CompactionResult<Option<RecordId>>,
    ) -> CompactionResult<bool> {
        let _guard = self.commit_lock.lock();
        let current = Revisions::head(self)?;
        let Some(new) = update(current)? else {
            return Ok(false);
        };
        self.store.set_journal_head(new)?;
        *self.head.write() = self.reader.node_state(new);
        self.writer.set_generation(generation.uncompacted())?;
        Ok(true)
    }

    fn locked(&self, f: &mut dyn FnMut() -> CompactionResult<SweepInfo>) -> CompactionResult<SweepInfo> {
        self.writer.flush()?;
        let _guard = self.commit_lock.lock();
        let info = f();
        self.writer.reset_caches();
        info
    }
}

impl Drop for NodeStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "arbor::store", error = %e, "Failed to close node store");
        }
    }
}
