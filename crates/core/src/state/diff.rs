//! Structural comparison of snapshots
//!
//! [`compare`] walks two snapshots and reports every difference to a
//! [`NodeStateDiff`] visitor. Subtrees that are known to be identical (same
//! allocation or same persisted record) are skipped without being read, so
//! the cost of a comparison is proportional to the size of the change.
//!
//! Order within one node: properties of the after state, then properties
//! deleted from the before state, then children of the after state (added or
//! changed), then deleted children, then a child reorder if any.

use super::builder::NodeBuilder;
use super::property::PropertyState;
use super::{missing_node, same_state, NodeRef};
use crate::error::Result;
use crate::path;
use rustc_hash::FxHashSet;

/// Visitor receiving the differences between two snapshots
///
/// Every callback gets the path of the node whose item changed. Returning
/// false from a property callback stops reporting the remaining items of
/// that node; returning false from a child callback skips that child's
/// subtree. Siblings are always visited.
pub trait NodeStateDiff {
    /// Property present only in the after state
    fn property_added(&mut self, _path: &str, _after: &PropertyState) -> bool {
        true
    }

    /// Property present in both states with different values
    fn property_changed(
        &mut self,
        _path: &str,
        _before: &PropertyState,
        _after: &PropertyState,
    ) -> bool {
        true
    }

    /// Property present only in the before state
    fn property_deleted(&mut self, _path: &str, _before: &PropertyState) -> bool {
        true
    }

    /// Child present only in the after state; true descends into it
    fn child_node_added(&mut self, _path: &str, _name: &str, _after: &NodeRef) -> bool {
        true
    }

    /// Child present in both states that may differ; true descends into it
    fn child_node_changed(
        &mut self,
        _path: &str,
        _name: &str,
        _before: &NodeRef,
        _after: &NodeRef,
    ) -> bool {
        true
    }

    /// Child present only in the before state; true descends into it
    fn child_node_deleted(&mut self, _path: &str, _name: &str, _before: &NodeRef) -> bool {
        true
    }

    /// Children are not in the order implied by the other callbacks
    ///
    /// Reported when surviving children changed their relative order, or
    /// when added children do not simply follow the surviving ones. Receives
    /// the complete child name lists of both states.
    fn child_order_changed(&mut self, _path: &str, _before: &[String], _after: &[String]) -> bool {
        true
    }
}

/// Compare `after` against `before`, reporting differences below `at`
///
/// Returns false if any callback cut the comparison short. A node that
/// cannot be read is logged and ends the comparison as if cut short; use
/// [`try_compare`] where the failure must reach the caller.
pub fn compare(at: &str, before: &NodeRef, after: &NodeRef, diff: &mut dyn NodeStateDiff) -> bool {
    match try_compare(at, before, after, diff) {
        Ok(complete) => complete,
        Err(e) => {
            tracing::error!(target: "arbor::store", path = at, error = %e, "Comparison aborted");
            false
        }
    }
}

/// Like [`compare`], failing with the storage error of the first node that
/// cannot be read
pub fn try_compare(
    at: &str,
    before: &NodeRef,
    after: &NodeRef,
    diff: &mut dyn NodeStateDiff,
) -> Result<bool> {
    if same_state(before, after) {
        return Ok(true);
    }
    before.load()?;
    after.load()?;
    Ok(compare_properties(at, before, after, diff) && compare_children(at, before, after, diff)?)
}

fn compare_properties(
    at: &str,
    before: &NodeRef,
    after: &NodeRef,
    diff: &mut dyn NodeStateDiff,
) -> bool {
    for property in after.properties() {
        let proceed = match before.property(property.name()) {
            None => diff.property_added(at, &property),
            Some(previous) if previous != property => {
                diff.property_changed(at, &previous, &property)
            }
            Some(_) => true,
        };
        if !proceed {
            return false;
        }
    }
    for previous in before.properties() {
        if !after.has_property(previous.name()) && !diff.property_deleted(at, &previous) {
            return false;
        }
    }
    true
}

fn compare_children(
    at: &str,
    before: &NodeRef,
    after: &NodeRef,
    diff: &mut dyn NodeStateDiff,
) -> Result<bool> {
    let mut complete = true;
    let before_names = before.child_node_names();
    let mut after_names = Vec::with_capacity(after.child_node_count());

    for (name, child) in after.child_node_entries() {
        let previous = before.child_node(&name);
        if !previous.exists() {
            if diff.child_node_added(at, &name, &child) {
                complete &= try_compare(&path::concat(at, &name), &missing_node(), &child, diff)?;
            } else {
                complete = false;
            }
        } else if !same_state(&previous, &child) {
            if diff.child_node_changed(at, &name, &previous, &child) {
                complete &= try_compare(&path::concat(at, &name), &previous, &child, diff)?;
            } else {
                complete = false;
            }
        }
        after_names.push(name);
    }

    for name in &before_names {
        if after.has_child_node(name) {
            continue;
        }
        let previous = before.child_node(name);
        if diff.child_node_deleted(at, name, &previous) {
            complete &= try_compare(&path::concat(at, name), &previous, &missing_node(), diff)?;
        } else {
            complete = false;
        }
    }

    if before_names != after_names {
        // Order a builder would produce: surviving children keep their
        // place, additions go to the end.
        let before_set: FxHashSet<&str> = before_names.iter().map(|n| n.as_str()).collect();
        let expected: Vec<&str> = before_names
            .iter()
            .map(|n| n.as_str())
            .filter(|n| after.has_child_node(n))
            .chain(
                after_names
                    .iter()
                    .map(|n| n.as_str())
                    .filter(|n| !before_set.contains(n)),
            )
            .collect();
        let reordered = expected.len() != after_names.len()
            || expected.iter().zip(&after_names).any(|(e, a)| *e != a.as_str());
        if reordered && !diff.child_order_changed(at, &before_names, &after_names) {
            complete = false;
        }
    }
    Ok(complete)
}

struct Equality {
    equal: bool,
}

impl NodeStateDiff for Equality {
    fn property_added(&mut self, _: &str, _: &PropertyState) -> bool {
        self.equal = false;
        false
    }

    fn property_changed(&mut self, _: &str, _: &PropertyState, _: &PropertyState) -> bool {
        self.equal = false;
        false
    }

    fn property_deleted(&mut self, _: &str, _: &PropertyState) -> bool {
        self.equal = false;
        false
    }

    fn child_node_added(&mut self, _: &str, _: &str, _: &NodeRef) -> bool {
        self.equal = false;
        false
    }

    fn child_node_changed(&mut self, _: &str, _: &str, _: &NodeRef, _: &NodeRef) -> bool {
        self.equal
    }

    fn child_node_deleted(&mut self, _: &str, _: &str, _: &NodeRef) -> bool {
        self.equal = false;
        false
    }

    fn child_order_changed(&mut self, _: &str, _: &[String], _: &[String]) -> bool {
        self.equal = false;
        false
    }
}

/// Two snapshots are equal iff comparing them reports no difference
///
/// Snapshots that cannot be read completely are not equal to anything.
pub fn diff_equals(a: &NodeRef, b: &NodeRef) -> bool {
    if a.exists() != b.exists() {
        return false;
    }
    let mut equality = Equality { equal: true };
    match try_compare(path::ROOT, a, b, &mut equality) {
        Ok(_) => equality.equal,
        Err(e) => {
            tracing::error!(target: "arbor::store", error = %e, "Equality check aborted");
            false
        }
    }
}

/// Replays a diff onto a builder
///
/// Paths reported by the comparison are resolved relative to the builder,
/// creating intermediate nodes as needed. Added and deleted subtrees are
/// applied as a whole and not descended into.
pub struct ApplyDiff {
    root: NodeBuilder,
}

impl ApplyDiff {
    /// Apply changes to `root`
    pub fn new(root: NodeBuilder) -> Self {
        Self { root }
    }

    /// The target builder
    pub fn builder(&self) -> &NodeBuilder {
        &self.root
    }

    fn builder_at(&self, at: &str) -> NodeBuilder {
        path::elements(at).fold(self.root.clone(), |builder, name| builder.child(name))
    }
}

impl NodeStateDiff for ApplyDiff {
    fn property_added(&mut self, at: &str, after: &PropertyState) -> bool {
        self.builder_at(at).set_property_state(after.clone());
        true
    }

    fn property_changed(&mut self, at: &str, _before: &PropertyState, after: &PropertyState) -> bool {
        self.builder_at(at).set_property_state(after.clone());
        true
    }

    fn property_deleted(&mut self, at: &str, before: &PropertyState) -> bool {
        self.builder_at(at).remove_property(before.name());
        true
    }

    fn child_node_added(&mut self, at: &str, name: &str, after: &NodeRef) -> bool {
        self.builder_at(at).set_child_node(name, after.clone());
        false
    }

    fn child_node_changed(&mut self, _: &str, _: &str, _: &NodeRef, _: &NodeRef) -> bool {
        true
    }

    fn child_node_deleted(&mut self, at: &str, name: &str, _before: &NodeRef) -> bool {
        if let Some(child) = self.builder_at(at).get_child(name) {
            child.remove();
        }
        false
    }

    fn child_order_changed(&mut self, at: &str, _before: &[String], after: &[String]) -> bool {
        let builder = self.builder_at(at);
        for name in after {
            builder.order_before(name, None);
        }
        true
    }
}
