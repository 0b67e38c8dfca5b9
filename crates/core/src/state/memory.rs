//! In-memory node states
//!
//! Produced by [`NodeBuilder::node_state`](super::NodeBuilder::node_state)
//! and used directly for seed content and tests.

use super::property::{PropertyState, PropertyValue};
use super::{missing_node, ChildNodeEntries, NodeRef, NodeState, Properties};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable node held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryNodeState {
    properties: BTreeMap<String, PropertyState>,
    children: Vec<(String, NodeRef)>,
    index: FxHashMap<String, usize>,
}

impl MemoryNodeState {
    /// Create a node from its properties and ordered children
    ///
    /// A later child with the same name as an earlier one replaces it.
    pub fn new(
        properties: impl IntoIterator<Item = PropertyState>,
        children: impl IntoIterator<Item = (String, NodeRef)>,
    ) -> Self {
        let properties = properties
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        let mut ordered: Vec<(String, NodeRef)> = Vec::new();
        let mut index = FxHashMap::default();
        for (name, child) in children {
            match index.get(&name) {
                Some(&i) => ordered[i] = (name, child),
                None => {
                    index.insert(name.clone(), ordered.len());
                    ordered.push((name, child));
                }
            }
        }
        Self {
            properties,
            children: ordered,
            index,
        }
    }

    /// Start building a node by hand
    pub fn builder() -> MemoryNodeStateBuilder {
        MemoryNodeStateBuilder::default()
    }
}

impl NodeState for MemoryNodeState {
    fn exists(&self) -> bool {
        true
    }

    fn property(&self, name: &str) -> Option<PropertyState> {
        self.properties.get(name).cloned()
    }

    fn properties(&self) -> Properties<'_> {
        Box::new(self.properties.values().cloned())
    }

    fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    fn property_count(&self) -> usize {
        self.properties.len()
    }

    fn has_child_node(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn child_node(&self, name: &str) -> NodeRef {
        match self.index.get(name) {
            Some(&i) => self.children[i].1.clone(),
            None => missing_node(),
        }
    }

    fn child_node_names(&self) -> Vec<String> {
        self.children.iter().map(|(name, _)| name.clone()).collect()
    }

    fn child_node_entries(&self) -> ChildNodeEntries<'_> {
        Box::new(self.children.iter().cloned())
    }

    fn child_node_count(&self) -> usize {
        self.children.len()
    }
}

/// Fluent construction of [`MemoryNodeState`] trees
#[derive(Default)]
pub struct MemoryNodeStateBuilder {
    properties: Vec<PropertyState>,
    children: Vec<(String, NodeRef)>,
}

impl MemoryNodeStateBuilder {
    /// Add a property
    pub fn property(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.push(PropertyState::new(name, value));
        self
    }

    /// Add a child
    pub fn child(mut self, name: &str, node: NodeRef) -> Self {
        self.children.push((name.to_string(), node));
        self
    }

    /// Finish the node
    pub fn build(self) -> NodeRef {
        Arc::new(MemoryNodeState::new(self.properties, self.children))
    }
}
