//! Snapshot decorator hiding parts of a tree
//!
//! Used when copying seed content: only the included paths are visible,
//! minus excluded paths and any node whose name contains an excluded
//! fragment.

use super::property::PropertyState;
use super::{missing_node, NodeRef, NodeState, Properties};
use crate::error::Result;
use crate::path;
use std::fmt;
use std::sync::Arc;

/// Visibility rules for [`FilteringNodeState`]
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    excluded_fragments: Vec<String>,
}

impl PathFilter {
    /// Filter with the given include and exclude paths
    ///
    /// An empty include set includes everything.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include: include.iter().map(|p| path::normalize(p)).collect(),
            exclude: exclude.iter().map(|p| path::normalize(p)).collect(),
            excluded_fragments: Vec::new(),
        }
    }

    /// Also hide nodes whose name contains any of `fragments`
    pub fn with_excluded_fragments(mut self, fragments: Vec<String>) -> Self {
        self.excluded_fragments = fragments;
        self
    }

    /// True if the node at `absolute` is visible
    ///
    /// Ancestors of included paths are visible so they can be traversed.
    pub fn is_visible(&self, absolute: &str) -> bool {
        let name = path::name(absolute);
        if self.excluded_fragments.iter().any(|f| name.contains(f.as_str())) {
            return false;
        }
        if self.exclude.iter().any(|e| path::is_ancestor_or_self(e, absolute)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|i| path::is_related(i, absolute))
    }

    /// True if nothing at or below `absolute` can be hidden
    fn covers_subtree(&self, absolute: &str) -> bool {
        self.excluded_fragments.is_empty()
            && !self.exclude.iter().any(|e| path::is_related(e, absolute))
            && (self.include.is_empty()
                || self
                    .include
                    .iter()
                    .any(|i| path::is_ancestor_or_self(i, absolute)))
    }
}

/// A node seen through a [`PathFilter`]
pub struct FilteringNodeState {
    path: String,
    delegate: NodeRef,
    filter: Arc<PathFilter>,
}

impl FilteringNodeState {
    /// Wrap the node at `absolute`
    ///
    /// Returns the delegate itself when the filter cannot hide anything
    /// below it.
    pub fn wrap(absolute: &str, delegate: NodeRef, filter: Arc<PathFilter>) -> NodeRef {
        if !delegate.exists() || filter.covers_subtree(absolute) {
            return delegate;
        }
        Arc::new(FilteringNodeState {
            path: absolute.to_string(),
            delegate,
            filter,
        })
    }

    fn child_path(&self, name: &str) -> String {
        path::concat(&self.path, name)
    }
}

impl NodeState for FilteringNodeState {
    fn exists(&self) -> bool {
        self.delegate.exists()
    }

    fn property(&self, name: &str) -> Option<PropertyState> {
        self.delegate.property(name)
    }

    fn load(&self) -> Result<()> {
        self.delegate.load()
    }

    fn properties(&self) -> Properties<'_> {
        self.delegate.properties()
    }

    fn property_count(&self) -> usize {
        self.delegate.property_count()
    }

    fn has_child_node(&self, name: &str) -> bool {
        self.filter.is_visible(&self.child_path(name)) && self.delegate.has_child_node(name)
    }

    fn child_node(&self, name: &str) -> NodeRef {
        let child_path = self.child_path(name);
        if !self.filter.is_visible(&child_path) {
            return missing_node();
        }
        FilteringNodeState::wrap(&child_path, self.delegate.child_node(name), self.filter.clone())
    }

    fn child_node_names(&self) -> Vec<String> {
        self.delegate
            .child_node_names()
            .into_iter()
            .filter(|name| self.filter.is_visible(&self.child_path(name)))
            .collect()
    }
}

impl fmt::Debug for FilteringNodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteringNodeState")
            .field("path", &self.path)
            .field("delegate", &self.delegate)
            .finish()
    }
}
