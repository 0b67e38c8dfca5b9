//! Immutable tree snapshots
//!
//! A snapshot is a tree of [`NodeState`]s shared through [`NodeRef`]. Nodes
//! never change once built; modifications go through a [`NodeBuilder`] that
//! materializes a new tree sharing every unchanged subtree with its base.

pub mod builder;
pub mod diff;
pub mod filtering;
pub mod memory;
pub mod property;
pub mod reporting;

use crate::error::Result;
use crate::path;
use crate::types::RecordId;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

pub use builder::NodeBuilder;
pub use diff::{compare, diff_equals, try_compare, ApplyDiff, NodeStateDiff};
pub use filtering::FilteringNodeState;
pub use memory::MemoryNodeState;
pub use property::{Blob, PropertyState, PropertyType, PropertyValue, Value};
pub use reporting::{LoggingReporter, Reporter, ReportingNodeState};

/// Shared handle to an immutable node
pub type NodeRef = Arc<dyn NodeState>;

/// Lazy sequence of properties; calling the accessor again restarts it
pub type Properties<'a> = Box<dyn Iterator<Item = PropertyState> + 'a>;

/// Lazy sequence of named children; calling the accessor again restarts it
pub type ChildNodeEntries<'a> = Box<dyn Iterator<Item = (String, NodeRef)> + 'a>;

/// Read access to one node of an immutable snapshot
///
/// Child lookups never fail: a missing child is returned as a node whose
/// [`exists`](NodeState::exists) is false.
///
/// Persisted nodes read their content on first access. A node whose content
/// cannot be read answers every accessor as if it were empty and reports
/// the failure from [`load`](NodeState::load); code that writes or merges
/// content must call `load` before trusting what the accessors return.
pub trait NodeState: Send + Sync + fmt::Debug {
    /// False for the placeholder returned for absent children
    fn exists(&self) -> bool;

    /// Read the content of this node, failing with the storage error if it
    /// cannot be read
    ///
    /// A successful load is kept; a failed one is retried on the next call.
    fn load(&self) -> Result<()> {
        Ok(())
    }

    /// Property by name
    fn property(&self, name: &str) -> Option<PropertyState>;

    /// All properties in storage order
    fn properties(&self) -> Properties<'_>;

    /// True if the named property is present
    fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// Number of properties
    fn property_count(&self) -> usize {
        self.properties().count()
    }

    /// True if the named child is present
    fn has_child_node(&self, name: &str) -> bool;

    /// Child by name, or a non-existent node
    fn child_node(&self, name: &str) -> NodeRef;

    /// Names of all children in order
    fn child_node_names(&self) -> Vec<String>;

    /// Children in order
    fn child_node_entries(&self) -> ChildNodeEntries<'_> {
        Box::new(self.child_node_names().into_iter().map(move |name| {
            let child = self.child_node(&name);
            (name, child)
        }))
    }

    /// Number of children
    fn child_node_count(&self) -> usize {
        self.child_node_names().len()
    }

    /// Record this node was read from, if it is persisted
    ///
    /// Two nodes with the same record id have identical content.
    fn record_id(&self) -> Option<RecordId> {
        None
    }
}

#[derive(Debug)]
struct EmptyNodeState {
    exists: bool,
}

impl NodeState for EmptyNodeState {
    fn exists(&self) -> bool {
        self.exists
    }

    fn property(&self, _name: &str) -> Option<PropertyState> {
        None
    }

    fn properties(&self) -> Properties<'_> {
        Box::new(std::iter::empty())
    }

    fn property_count(&self) -> usize {
        0
    }

    fn has_child_node(&self, _name: &str) -> bool {
        false
    }

    fn child_node(&self, _name: &str) -> NodeRef {
        missing_node()
    }

    fn child_node_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn child_node_count(&self) -> usize {
        0
    }
}

static EMPTY: Lazy<NodeRef> = Lazy::new(|| Arc::new(EmptyNodeState { exists: true }));
static MISSING: Lazy<NodeRef> = Lazy::new(|| Arc::new(EmptyNodeState { exists: false }));

/// An existing node without properties or children
pub fn empty_node() -> NodeRef {
    EMPTY.clone()
}

/// The placeholder for an absent node
pub fn missing_node() -> NodeRef {
    MISSING.clone()
}

/// True if two handles are known to hold identical content without
/// looking at it: same allocation or same persisted record.
pub fn same_state(a: &NodeRef, b: &NodeRef) -> bool {
    if Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const () {
        return true;
    }
    match (a.record_id(), b.record_id()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Node at an absolute path below `root`
pub fn node_at(root: &NodeRef, absolute: &str) -> NodeRef {
    let mut node = root.clone();
    for name in path::elements(absolute) {
        node = node.child_node(name);
        if !node.exists() {
            break;
        }
    }
    node
}

/// Convenience operations on node handles
pub trait NodeStateExt {
    /// Builder based on this node
    fn builder(&self) -> NodeBuilder;

    /// Report the changes from `base` to this node through `diff`
    ///
    /// Returns false if the diff aborted.
    fn compare_against_base_state(&self, base: &NodeRef, diff: &mut dyn NodeStateDiff) -> bool;

    /// Structural equality as defined by the diff engine
    fn equals(&self, other: &NodeRef) -> bool;
}

impl NodeStateExt for NodeRef {
    fn builder(&self) -> NodeBuilder {
        NodeBuilder::new(self.clone())
    }

    fn compare_against_base_state(&self, base: &NodeRef, diff: &mut dyn NodeStateDiff) -> bool {
        compare(path::ROOT, base, self, diff)
    }

    fn equals(&self, other: &NodeRef) -> bool {
        diff_equals(self, other)
    }
}
