//! Core types and traits for ArborDB
//!
//! This crate defines the tree model every other crate builds on:
//! - SegmentId / RecordId / GcGeneration: identity of persisted records
//! - NodeState / NodeRef: immutable snapshot nodes
//! - NodeBuilder: copy-on-write staging of a new snapshot
//! - Diff engine: structural comparison of two snapshots
//! - Error: error type shared by the workspace

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod path;
pub mod state;
pub mod types;

pub use error::{Error, Result};
pub use state::{
    compare, diff_equals, empty_node, missing_node, node_at, same_state, try_compare, ApplyDiff,
    Blob, ChildNodeEntries, FilteringNodeState, LoggingReporter, MemoryNodeState, NodeBuilder,
    NodeRef, NodeState, NodeStateDiff, NodeStateExt, Properties, PropertyState, PropertyType,
    PropertyValue, Reporter, ReportingNodeState, Value,
};
pub use state::filtering::PathFilter;
pub use types::{now_millis, GcGeneration, RecordId, SegmentId};
