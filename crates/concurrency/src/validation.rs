//! Conflict detection between concurrent commits
//!
//! A commit is based on some head `base`. By the time it reaches the commit
//! section the head may have moved to `theirs`. The commit's own changes
//! (`base` to `ours`) are walked with the diff engine and every changed item
//! is checked against the same item in `theirs`:
//!
//! - Two sides setting a property to the same value do not conflict
//! - A property changed on one side and changed differently or deleted on
//!   the other conflicts
//! - A child added on both sides conflicts unless both added equal content
//! - A child deleted on one side and modified on the other conflicts
//! - Changes to distinct items never conflict
//!
//! Subtrees `theirs` left untouched are not descended into.

use arbor_core::{
    diff_equals, node_at, path, same_state, try_compare, NodeRef, NodeStateDiff, PropertyState,
    Result,
};
use std::fmt;

/// Kind of a detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Property added on both sides with different values
    AddExistingProperty,
    /// Property changed on both sides to different values
    ChangeChangedProperty,
    /// Property changed on one side, deleted on the other
    ChangeDeletedProperty,
    /// Property deleted on one side, changed on the other
    DeleteChangedProperty,
    /// Child added on both sides with different content
    AddExistingNode,
    /// Child modified on one side, deleted on the other
    ChangeDeletedNode,
    /// Child deleted on one side, modified on the other
    DeleteChangedNode,
}

impl ConflictKind {
    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            ConflictKind::AddExistingProperty => "property added concurrently with a different value",
            ConflictKind::ChangeChangedProperty => "property changed concurrently",
            ConflictKind::ChangeDeletedProperty => "property changed here but deleted concurrently",
            ConflictKind::DeleteChangedProperty => "property deleted here but changed concurrently",
            ConflictKind::AddExistingNode => "node added concurrently with different content",
            ConflictKind::ChangeDeletedNode => "node changed here but deleted concurrently",
            ConflictKind::DeleteChangedNode => "node deleted here but changed concurrently",
        }
    }
}

/// One conflicting item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// What conflicted
    pub kind: ConflictKind,
    /// Path of the conflicting property or node
    pub path: String,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.kind.description())
    }
}

/// Result of validating a commit against the current head
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// All conflicts detected
    pub conflicts: Vec<Conflict>,
}

impl ValidationResult {
    /// Validation without conflicts
    pub fn ok() -> Self {
        Self::default()
    }

    /// True if the commit can be applied
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    fn push(&mut self, kind: ConflictKind, path: String) {
        self.conflicts.push(Conflict { kind, path });
    }
}

/// Detect conflicts between the changes `base -> ours` and `base -> theirs`
///
/// Fails if a node of `base` or `ours` cannot be read.
pub fn validate(base: &NodeRef, ours: &NodeRef, theirs: &NodeRef) -> Result<ValidationResult> {
    if same_state(base, theirs) || same_state(base, ours) {
        return Ok(ValidationResult::ok());
    }
    let mut detector = ConflictDetector {
        theirs: theirs.clone(),
        result: ValidationResult::ok(),
    };
    try_compare(path::ROOT, base, ours, &mut detector)?;
    Ok(detector.result)
}

struct ConflictDetector {
    theirs: NodeRef,
    result: ValidationResult,
}

impl ConflictDetector {
    fn their_property(&self, parent: &str, name: &str) -> Option<PropertyState> {
        node_at(&self.theirs, parent).property(name)
    }

    fn their_child(&self, parent: &str, name: &str) -> NodeRef {
        node_at(&self.theirs, parent).child_node(name)
    }
}

impl NodeStateDiff for ConflictDetector {
    fn property_added(&mut self, path: &str, after: &PropertyState) -> bool {
        if let Some(theirs) = self.their_property(path, after.name()) {
            if theirs != *after {
                self.result.push(
                    ConflictKind::AddExistingProperty,
                    path::concat(path, after.name()),
                );
            }
        }
        true
    }

    fn property_changed(&mut self, path: &str, before: &PropertyState, after: &PropertyState) -> bool {
        match self.their_property(path, before.name()) {
            None => self.result.push(
                ConflictKind::ChangeDeletedProperty,
                path::concat(path, before.name()),
            ),
            Some(theirs) if theirs != *before && theirs != *after => self.result.push(
                ConflictKind::ChangeChangedProperty,
                path::concat(path, before.name()),
            ),
            Some(_) => {}
        }
        true
    }

    fn property_deleted(&mut self, path: &str, before: &PropertyState) -> bool {
        if let Some(theirs) = self.their_property(path, before.name()) {
            if theirs != *before {
                self.result.push(
                    ConflictKind::DeleteChangedProperty,
                    path::concat(path, before.name()),
                );
            }
        }
        true
    }

    fn child_node_added(&mut self, path: &str, name: &str, after: &NodeRef) -> bool {
        let theirs = self.their_child(path, name);
        if theirs.exists() && !diff_equals(&theirs, after) {
            self.result
                .push(ConflictKind::AddExistingNode, path::concat(path, name));
        }
        false
    }

    fn child_node_changed(&mut self, path: &str, name: &str, before: &NodeRef, _after: &NodeRef) -> bool {
        let theirs = self.their_child(path, name);
        if !theirs.exists() {
            self.result
                .push(ConflictKind::ChangeDeletedNode, path::concat(path, name));
            return false;
        }
        // nothing below can overlap if the other side left this subtree alone
        !same_state(&theirs, before)
    }

    fn child_node_deleted(&mut self, path: &str, name: &str, before: &NodeRef) -> bool {
        let theirs = self.their_child(path, name);
        if theirs.exists() && !same_state(&theirs, before) && !diff_equals(&theirs, before) {
            self.result
                .push(ConflictKind::DeleteChangedNode, path::concat(path, name));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{MemoryNodeState, NodeStateExt};

    fn base() -> NodeRef {
        let a = MemoryNodeState::builder().property("p", 1i64).build();
        MemoryNodeState::builder()
            .property("title", "root")
            .child("a", a)
            .child("b", MemoryNodeState::builder().build())
            .build()
    }

    fn edit(base: &NodeRef, f: impl FnOnce(&arbor_core::NodeBuilder)) -> NodeRef {
        let builder = base.builder();
        f(&builder);
        builder.node_state()
    }

    #[test]
    fn test_disjoint_changes_are_valid() {
        let base = base();
        let ours = edit(&base, |b| {
            b.child("a").set_property("q", 2i64);
        });
        let theirs = edit(&base, |b| {
            b.child("b").set_property("r", 3i64);
        });
        assert!(validate(&base, &ours, &theirs).unwrap().is_valid());
    }

    #[test]
    fn test_same_property_different_values() {
        let base = base();
        let ours = edit(&base, |b| {
            b.child("a").set_property("p", 2i64);
        });
        let theirs = edit(&base, |b| {
            b.child("a").set_property("p", 3i64);
        });
        let result = validate(&base, &ours, &theirs).unwrap();
        assert_eq!(result.conflict_count(), 1);
        assert_eq!(result.conflicts[0].kind, ConflictKind::ChangeChangedProperty);
        assert_eq!(result.conflicts[0].path, "/a/p");
    }

    #[test]
    fn test_same_property_same_value() {
        let base = base();
        let ours = edit(&base, |b| {
            b.child("a").set_property("p", 2i64);
        });
        let theirs = edit(&base, |b| {
            b.child("a").set_property("p", 2i64);
        });
        assert!(validate(&base, &ours, &theirs).unwrap().is_valid());
    }

    #[test]
    fn test_change_deleted_node() {
        let base = base();
        let ours = edit(&base, |b| {
            b.child("a").set_property("q", 1i64);
        });
        let theirs = edit(&base, |b| {
            b.child("a").remove();
        });
        let result = validate(&base, &ours, &theirs).unwrap();
        assert_eq!(result.conflicts[0].kind, ConflictKind::ChangeDeletedNode);
    }

    #[test]
    fn test_delete_changed_node() {
        let base = base();
        let ours = edit(&base, |b| {
            b.child("a").remove();
        });
        let theirs = edit(&base, |b| {
            b.child("a").set_property("p", 9i64);
        });
        let result = validate(&base, &ours, &theirs).unwrap();
        assert_eq!(result.conflicts[0].kind, ConflictKind::DeleteChangedNode);
    }

    #[test]
    fn test_both_delete_is_valid() {
        let base = base();
        let ours = edit(&base, |b| {
            b.child("a").remove();
        });
        let theirs = edit(&base, |b| {
            b.child("a").remove();
        });
        assert!(validate(&base, &ours, &theirs).unwrap().is_valid());
    }

    #[test]
    fn test_add_existing_node() {
        let base = base();
        let ours = edit(&base, |b| {
            b.child("c").set_property("v", "ours");
        });
        let theirs = edit(&base, |b| {
            b.child("c").set_property("v", "theirs");
        });
        let result = validate(&base, &ours, &theirs).unwrap();
        assert_eq!(result.conflicts[0].kind, ConflictKind::AddExistingNode);

        let same = edit(&base, |b| {
            b.child("c").set_property("v", "ours");
        });
        assert!(validate(&base, &ours, &same).unwrap().is_valid());
    }

    #[test]
    fn test_property_deleted_and_changed() {
        let base = base();
        let ours = edit(&base, |b| {
            b.remove_property("title");
        });
        let theirs = edit(&base, |b| {
            b.set_property("title", "renamed");
        });
        let result = validate(&base, &ours, &theirs).unwrap();
        assert_eq!(result.conflicts[0].kind, ConflictKind::DeleteChangedProperty);
        assert_eq!(result.conflicts[0].path, "/title");
    }
}
