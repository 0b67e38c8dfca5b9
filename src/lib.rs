//! ArborDB - Versioned tree storage engine
//!
//! ArborDB stores a tree of nodes with properties as immutable snapshots.
//! Every merge publishes a new root; old roots stay readable until the
//! garbage collector reclaims them.
//!
//! # Quick Start
//!
//! ```ignore
//! use arbordb::{CommitInfo, EmptyHook, NodeStateExt, NodeStore};
//!
//! let store = NodeStore::open("data")?;
//! let builder = store.root().builder();
//! builder.child("content").set_property("title", "hello");
//! store.merge(&builder, &EmptyHook, CommitInfo::empty())?;
//! ```
//!
//! # Architecture
//!
//! - `arbor-core`: snapshot model, builders and the diff engine
//! - `arbor-storage`: segments, record caches and tar archives
//! - `arbor-concurrency`: commit hooks and rebasing of stale builders
//! - `arbor-durability`: marking, compaction and sweeping
//! - `arbor-engine`: the node store, checkpoints and observation

pub use arbor_concurrency::{rebase, CommitHook, CommitInfo, CompositeHook, EmptyHook};
pub use arbor_core::{
    compare, empty_node, Error, NodeBuilder, NodeRef, NodeState, NodeStateDiff, NodeStateExt,
    PropertyState, PropertyType, PropertyValue, Result, Value,
};
pub use arbor_durability::{
    CleanupType, CompactInfo, CompactMode, CompactionError, CompactionStrategy, GcPhase,
};
pub use arbor_engine::{
    CheckpointInfo, ConfigError, Event, EventFilter, EventListener, EventType, FilterBuilder,
    InitialContentMigrator, NodeStore, Observer, ObserverRegistration, PropertyCondition,
    Selector, StoreConfig, CONFIG_FILE_NAME,
};
pub use arbor_storage::{FileStore, MemoryStore, SegmentStore};
