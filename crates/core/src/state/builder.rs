//! Mutable overlay over an immutable snapshot
//!
//! A [`NodeBuilder`] records changes against a base [`NodeRef`] without ever
//! touching it. [`NodeBuilder::node_state`] materializes the result; every
//! subtree the builder never modified is returned as the original handle, so
//! new snapshots share unchanged structure with their base.
//!
//! Builder handles are cheap to clone and share one overlay. Child handles
//! stay attached to their parent: changes made through a child are visible
//! when the parent materializes.
//!
//! Every base node the builder reads is loaded first. A load failure is kept
//! on the builder and reported by [`NodeBuilder::check`], since the base
//! then reads as empty and the materialized tree would silently lose it.

use super::memory::MemoryNodeState;
use super::property::{PropertyState, PropertyValue};
use super::{missing_node, NodeRef};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type Shared = Arc<Mutex<BuilderNode>>;

struct BuilderNode {
    base: NodeRef,
    exists: bool,
    /// Base differs from the parent's base child of the same name
    replaced: bool,
    /// `None` marks a removed property
    properties: BTreeMap<String, Option<PropertyState>>,
    children: FxHashMap<String, Shared>,
    /// Children not present in the base, in creation order
    added: Vec<String>,
    /// Explicit child order after a reorder
    order: Option<Vec<String>>,
    /// Error of a failed base load
    failure: Option<String>,
}

impl BuilderNode {
    fn new(base: NodeRef, replaced: bool) -> Self {
        let failure = base.load().err().map(|e| {
            tracing::error!(target: "arbor::store", error = %e, "Failed to load builder base");
            e.to_string()
        });
        let exists = base.exists();
        Self {
            base,
            exists,
            replaced,
            properties: BTreeMap::new(),
            children: FxHashMap::default(),
            added: Vec::new(),
            order: None,
            failure,
        }
    }

    fn created() -> Self {
        let mut node = Self::new(missing_node(), true);
        node.exists = true;
        node
    }

    fn is_modified(&self) -> bool {
        if self.exists != self.base.exists() {
            return true;
        }
        if self.order.is_some() || !self.properties.is_empty() {
            return true;
        }
        self.children.values().any(|child| {
            let child = child.lock();
            child.replaced || !child.exists || child.is_modified()
        })
    }

    fn failure(&self) -> Option<String> {
        if let Some(failure) = &self.failure {
            return Some(failure.clone());
        }
        self.children
            .values()
            .find_map(|child| child.lock().failure())
    }

    fn child_exists(&self, name: &str) -> bool {
        match self.children.get(name) {
            Some(child) => child.lock().exists,
            None => self.base.has_child_node(name),
        }
    }

    fn child_names(&self) -> Vec<String> {
        let mut seen = FxHashSet::default();
        let mut names = Vec::new();
        let ordered = self.order.iter().flatten().cloned();
        let candidates = ordered
            .chain(self.base.child_node_names())
            .chain(self.added.iter().cloned());
        for name in candidates {
            if seen.contains(&name) {
                continue;
            }
            if self.child_exists(&name) {
                seen.insert(name.clone());
                names.push(name);
            }
        }
        names
    }

    fn property(&self, name: &str) -> Option<PropertyState> {
        match self.properties.get(name) {
            Some(overlay) => overlay.clone(),
            None => self.base.property(name),
        }
    }

    fn properties(&self) -> Vec<PropertyState> {
        let mut merged: BTreeMap<String, PropertyState> = self
            .base
            .properties()
            .map(|p| (p.name().to_string(), p))
            .collect();
        for (name, overlay) in &self.properties {
            match overlay {
                Some(p) => {
                    merged.insert(name.clone(), p.clone());
                }
                None => {
                    merged.remove(name);
                }
            }
        }
        merged.into_values().collect()
    }

    /// Entry for an existing child, loading it from the base if needed
    fn existing_child(&mut self, name: &str) -> Option<Shared> {
        if let Some(child) = self.children.get(name) {
            return if child.lock().exists {
                Some(child.clone())
            } else {
                None
            };
        }
        if !self.base.has_child_node(name) {
            return None;
        }
        let child = Arc::new(Mutex::new(BuilderNode::new(
            self.base.child_node(name),
            false,
        )));
        self.children.insert(name.to_string(), child.clone());
        Some(child)
    }

    fn insert_child(&mut self, name: &str, node: BuilderNode) -> Shared {
        let child = Arc::new(Mutex::new(node));
        if !self.base.has_child_node(name) && !self.added.iter().any(|n| n == name) {
            self.added.push(name.to_string());
        }
        self.children.insert(name.to_string(), child.clone());
        child
    }

    fn materialize(&self) -> NodeRef {
        if !self.exists {
            return missing_node();
        }
        if !self.is_modified() {
            return self.base.clone();
        }
        let children: Vec<(String, NodeRef)> = self
            .child_names()
            .into_iter()
            .map(|name| {
                let state = match self.children.get(&name) {
                    Some(child) => child.lock().materialize(),
                    None => self.base.child_node(&name),
                };
                (name, state)
            })
            .collect();
        Arc::new(MemoryNodeState::new(self.properties(), children))
    }
}

/// Handle to a node of a builder overlay
#[derive(Clone)]
pub struct NodeBuilder {
    node: Shared,
    parent: Option<(Arc<NodeBuilder>, String)>,
}

impl NodeBuilder {
    /// Root builder over `base`
    pub fn new(base: NodeRef) -> Self {
        Self {
            node: Arc::new(Mutex::new(BuilderNode::new(base, false))),
            parent: None,
        }
    }

    fn attached(&self, node: Shared, name: &str) -> NodeBuilder {
        NodeBuilder {
            node,
            parent: Some((Arc::new(self.clone()), name.to_string())),
        }
    }

    /// True if this handle is `ancestor` or lies below it
    fn is_within(&self, ancestor: &Shared) -> bool {
        let mut current = Some(self);
        while let Some(builder) = current {
            if Arc::ptr_eq(&builder.node, ancestor) {
                return true;
            }
            current = builder.parent.as_ref().map(|(parent, _)| parent.as_ref());
        }
        false
    }

    /// Materialize the current state of this subtree
    ///
    /// If a base node could not be loaded the result is missing its
    /// content; see [`check`](Self::check).
    pub fn node_state(&self) -> NodeRef {
        self.node.lock().materialize()
    }

    /// Fail with the storage error of the first base node of this subtree
    /// that could not be loaded
    pub fn check(&self) -> Result<()> {
        match self.node.lock().failure() {
            Some(failure) => Err(Error::StorageIo(failure)),
            None => Ok(()),
        }
    }

    /// Materialize the current state, failing if any base node of this
    /// subtree could not be loaded
    pub fn try_node_state(&self) -> Result<NodeRef> {
        self.check()?;
        Ok(self.node_state())
    }

    /// The snapshot this builder started from
    pub fn base_state(&self) -> NodeRef {
        self.node.lock().base.clone()
    }

    /// Discard all changes and start over from `base`
    pub fn reset(&self, base: NodeRef) {
        let mut node = self.node.lock();
        *node = BuilderNode::new(base, node.replaced);
    }

    /// False once this node has been removed
    pub fn exists(&self) -> bool {
        self.node.lock().exists
    }

    /// True if the node did not exist in the base
    pub fn is_new(&self) -> bool {
        let node = self.node.lock();
        node.exists && !node.base.exists()
    }

    /// True if anything in this subtree differs from the base
    pub fn is_modified(&self) -> bool {
        self.node.lock().is_modified()
    }

    /// True if the named property did not exist in the base
    pub fn is_new_property(&self, name: &str) -> bool {
        let node = self.node.lock();
        node.property(name).is_some() && !node.base.has_property(name)
    }

    // === Properties ===

    /// Property by name
    pub fn property(&self, name: &str) -> Option<PropertyState> {
        self.node.lock().property(name)
    }

    /// True if the named property is present
    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// All properties
    pub fn properties(&self) -> Vec<PropertyState> {
        self.node.lock().properties()
    }

    /// Number of properties
    pub fn property_count(&self) -> usize {
        self.properties().len()
    }

    /// Set a property, replacing any previous value
    ///
    /// Ignored with a warning on a removed node.
    pub fn set_property(&self, name: &str, value: impl Into<PropertyValue>) -> &Self {
        self.set_property_state(PropertyState::new(name, value))
    }

    /// Set a property from a complete property state
    pub fn set_property_state(&self, property: PropertyState) -> &Self {
        let mut node = self.node.lock();
        if !node.exists {
            tracing::warn!(
                target: "arbor::store",
                property = property.name(),
                "Ignoring property change on removed node"
            );
            return self;
        }
        node.properties
            .insert(property.name().to_string(), Some(property));
        self
    }

    /// Remove a property; returns whether it was present
    pub fn remove_property(&self, name: &str) -> bool {
        let mut node = self.node.lock();
        if node.property(name).is_none() {
            return false;
        }
        if node.base.has_property(name) {
            node.properties.insert(name.to_string(), None);
        } else {
            node.properties.remove(name);
        }
        true
    }

    // === Children ===

    /// True if the named child is present
    pub fn has_child_node(&self, name: &str) -> bool {
        self.node.lock().child_exists(name)
    }

    /// Names of all present children in order
    pub fn child_node_names(&self) -> Vec<String> {
        self.node.lock().child_names()
    }

    /// Number of present children
    pub fn child_node_count(&self) -> usize {
        self.child_node_names().len()
    }

    /// Builder for an existing child
    pub fn get_child(&self, name: &str) -> Option<NodeBuilder> {
        let child = self.node.lock().existing_child(name)?;
        Some(self.attached(child, name))
    }

    /// Builder for a child, creating an empty one if absent
    pub fn child(&self, name: &str) -> NodeBuilder {
        let mut node = self.node.lock();
        let child = match node.existing_child(name) {
            Some(child) => child,
            None => node.insert_child(name, BuilderNode::created()),
        };
        drop(node);
        self.attached(child, name)
    }

    /// Replace (or add) a child with an existing snapshot
    pub fn set_child_node(&self, name: &str, state: NodeRef) -> NodeBuilder {
        let mut node = self.node.lock();
        let child = node.insert_child(name, BuilderNode::new(state, true));
        drop(node);
        self.attached(child, name)
    }

    /// Remove this node from its parent
    ///
    /// Returns false for a root builder or a node that is already gone.
    pub fn remove(&self) -> bool {
        let Some((parent, name)) = &self.parent else {
            return false;
        };
        let mut parent = parent.node.lock();
        let mut node = self.node.lock();
        if !node.exists {
            return false;
        }
        if parent.base.has_child_node(name) {
            node.exists = false;
            node.properties.clear();
            node.children.clear();
            node.added.clear();
            node.order = None;
            drop(node);
            parent
                .children
                .entry(name.clone())
                .or_insert_with(|| self.node.clone());
        } else {
            node.exists = false;
            drop(node);
            parent.children.remove(name);
            parent.added.retain(|n| n != name);
        }
        true
    }

    /// Move this node below `target` under `new_name`
    ///
    /// Returns false if this node cannot be removed, the target lies inside
    /// the moved subtree or already has a child of that name.
    pub fn move_to(&self, target: &NodeBuilder, new_name: &str) -> bool {
        if self.parent.is_none() || !self.exists() || target.is_within(&self.node) {
            return false;
        }
        if !target.exists() || target.has_child_node(new_name) {
            return false;
        }
        let state = self.node_state();
        target.set_child_node(new_name, state);
        self.remove()
    }

    /// Move child `name` directly before child `before`, or to the end
    ///
    /// Returns false if either child does not exist.
    pub fn order_before(&self, name: &str, before: Option<&str>) -> bool {
        let mut node = self.node.lock();
        if !node.child_exists(name) {
            return false;
        }
        let mut names = node.child_names();
        names.retain(|n| n != name);
        match before {
            Some(target) => match names.iter().position(|n| n == target) {
                Some(i) => names.insert(i, name.to_string()),
                None => return false,
            },
            None => names.push(name.to_string()),
        }
        node.order = Some(names);
        true
    }
}

impl fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node.lock();
        f.debug_struct("NodeBuilder")
            .field("name", &self.parent.as_ref().map(|(_, n)| n.as_str()))
            .field("exists", &node.exists)
            .field("base", &node.base)
            .finish()
    }
}
