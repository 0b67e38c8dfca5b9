//! Snapshot decorator reporting traversal progress

use super::property::PropertyState;
use super::{ChildNodeEntries, NodeRef, NodeState, Properties};
use crate::error::Result;
use crate::path;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives a callback for every node and property read through a
/// [`ReportingNodeState`]
pub trait Reporter: Send + Sync {
    /// A node was visited
    fn report_node(&self, path: &str);

    /// A property was read
    fn report_property(&self, parent_path: &str, name: &str);
}

/// Logs progress every `node_interval` nodes and `property_interval`
/// properties
pub struct LoggingReporter {
    action: String,
    node_interval: u64,
    property_interval: u64,
    nodes: AtomicU64,
    properties: AtomicU64,
}

impl LoggingReporter {
    /// Create a reporter; an interval of 0 disables that counter's logging
    pub fn new(action: impl Into<String>, node_interval: u64, property_interval: u64) -> Self {
        Self {
            action: action.into(),
            node_interval,
            property_interval,
            nodes: AtomicU64::new(0),
            properties: AtomicU64::new(0),
        }
    }

    /// Nodes seen so far
    pub fn node_count(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }

    /// Properties seen so far
    pub fn property_count(&self) -> u64 {
        self.properties.load(Ordering::Relaxed)
    }
}

impl Reporter for LoggingReporter {
    fn report_node(&self, path: &str) {
        let count = self.nodes.fetch_add(1, Ordering::Relaxed) + 1;
        if self.node_interval > 0 && count % self.node_interval == 0 {
            tracing::info!(
                target: "arbor::store",
                action = %self.action,
                nodes = count,
                path,
                "Traversal progress"
            );
        }
    }

    fn report_property(&self, parent_path: &str, name: &str) {
        let count = self.properties.fetch_add(1, Ordering::Relaxed) + 1;
        if self.property_interval > 0 && count % self.property_interval == 0 {
            tracing::info!(
                target: "arbor::store",
                action = %self.action,
                properties = count,
                path = %path::concat(parent_path, name),
                "Traversal progress"
            );
        }
    }
}

/// A node whose traversal is reported to a [`Reporter`]
pub struct ReportingNodeState {
    path: String,
    delegate: NodeRef,
    reporter: Arc<dyn Reporter>,
}

impl ReportingNodeState {
    /// Wrap a root node; the root itself is reported immediately
    pub fn wrap(delegate: NodeRef, reporter: Arc<dyn Reporter>) -> NodeRef {
        reporter.report_node(path::ROOT);
        Arc::new(ReportingNodeState {
            path: path::ROOT.to_string(),
            delegate,
            reporter,
        })
    }

    fn wrap_child(&self, name: &str, child: NodeRef) -> NodeRef {
        if !child.exists() {
            return child;
        }
        let child_path = path::concat(&self.path, name);
        self.reporter.report_node(&child_path);
        Arc::new(ReportingNodeState {
            path: child_path,
            delegate: child,
            reporter: self.reporter.clone(),
        })
    }
}

impl NodeState for ReportingNodeState {
    fn exists(&self) -> bool {
        self.delegate.exists()
    }

    fn property(&self, name: &str) -> Option<PropertyState> {
        let property = self.delegate.property(name)?;
        self.reporter.report_property(&self.path, name);
        Some(property)
    }

    fn load(&self) -> Result<()> {
        self.delegate.load()
    }

    fn properties(&self) -> Properties<'_> {
        Box::new(self.delegate.properties().inspect(move |property| {
            self.reporter.report_property(&self.path, property.name());
        }))
    }

    fn has_property(&self, name: &str) -> bool {
        self.delegate.has_property(name)
    }

    fn property_count(&self) -> usize {
        self.delegate.property_count()
    }

    fn has_child_node(&self, name: &str) -> bool {
        self.delegate.has_child_node(name)
    }

    fn child_node(&self, name: &str) -> NodeRef {
        self.wrap_child(name, self.delegate.child_node(name))
    }

    fn child_node_names(&self) -> Vec<String> {
        self.delegate.child_node_names()
    }

    fn child_node_entries(&self) -> ChildNodeEntries<'_> {
        Box::new(self.delegate.child_node_entries().map(move |(name, child)| {
            let wrapped = self.wrap_child(&name, child);
            (name, wrapped)
        }))
    }

    fn child_node_count(&self) -> usize {
        self.delegate.child_node_count()
    }
}

impl fmt::Debug for ReportingNodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportingNodeState")
            .field("path", &self.path)
            .finish()
    }
}
