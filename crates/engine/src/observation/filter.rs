//! Event filters
//!
//! A filter answers two questions while events are generated:
//! - [`EventFilter::can_descend`]: can anything at or below this node match?
//!   A negative answer prunes the diff.
//! - [`EventFilter::includes`]: does this particular change match?

use super::event::EventType;
use arbor_core::{path, NodeRef, PropertyState, PropertyValue};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Property conditions
// ============================================================================

/// Node a property condition is evaluated on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// The changed node, or the node owning the changed property
    This,
    /// The parent of the changed item
    Parent,
    /// A node at a relative path below [`Selector::This`]
    Child(String),
}

/// Predicate over a property that may be absent
pub type PropertyPredicate = Arc<dyn Fn(Option<&PropertyState>) -> bool + Send + Sync>;

/// Condition on a property of a node related to the change
#[derive(Clone)]
pub struct PropertyCondition {
    selector: Selector,
    name: String,
    predicate: PropertyPredicate,
}

impl PropertyCondition {
    /// Condition evaluating `predicate` on property `name` of the selected node
    pub fn new(
        selector: Selector,
        name: impl Into<String>,
        predicate: impl Fn(Option<&PropertyState>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            selector,
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// The selected node has property `name`
    pub fn exists(selector: Selector, name: impl Into<String>) -> Self {
        Self::new(selector, name, |p| p.is_some())
    }

    /// Property `name` of the selected node has exactly `value`
    pub fn equals(selector: Selector, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        let expected = value.into();
        Self::new(selector, name, move |p| p.map(|p| p.value() == &expected).unwrap_or(false))
    }

    fn matches(&self, this: &NodeRef, parent: &NodeRef) -> bool {
        let node = match &self.selector {
            Selector::This => this.clone(),
            Selector::Parent => parent.clone(),
            Selector::Child(relative) => path::elements(relative)
                .fold(this.clone(), |node, name| node.child_node(name)),
        };
        let property = node.property(&self.name);
        (self.predicate)(property.as_ref())
    }
}

impl fmt::Debug for PropertyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyCondition")
            .field("selector", &self.selector)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Globs
// ============================================================================

/// Path pattern: `*` matches within one path element, a `**` element
/// matches any number of elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glob {
    pattern: String,
    elements: Vec<String>,
}

impl Glob {
    /// Compile a pattern
    pub fn new(pattern: &str) -> Self {
        let pattern = path::normalize(pattern);
        let elements = path::elements(&pattern).map(str::to_string).collect();
        Self { pattern, elements }
    }

    /// The pattern text
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True if `absolute` matches the pattern
    pub fn matches(&self, absolute: &str) -> bool {
        let names: Vec<&str> = path::elements(absolute).collect();
        match_elements(&self.elements, &names)
    }

    /// Longest path every match lies under
    fn literal_prefix(&self) -> String {
        self.elements
            .iter()
            .take_while(|e| !e.contains('*'))
            .fold(path::ROOT.to_string(), |acc, e| path::concat(&acc, e))
    }
}

fn match_elements(pattern: &[String], names: &[&str]) -> bool {
    match pattern.split_first() {
        None => names.is_empty(),
        Some((first, rest)) if first == "**" => {
            (0..=names.len()).any(|skip| match_elements(rest, &names[skip..]))
        }
        Some((first, rest)) => match names.split_first() {
            Some((name, remaining)) => {
                match_element(first.as_bytes(), name.as_bytes()) && match_elements(rest, remaining)
            }
            None => false,
        },
    }
}

fn match_element(pattern: &[u8], name: &[u8]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => (0..=name.len()).any(|skip| match_element(rest, &name[skip..])),
        Some((c, rest)) => name.first() == Some(c) && match_element(rest, &name[1..]),
    }
}

// ============================================================================
// Filter
// ============================================================================

/// Which changes an observer receives
#[derive(Debug, Clone)]
pub struct EventFilter {
    base_path: String,
    deep: bool,
    event_types: u8,
    node_types: Vec<String>,
    include_paths: Vec<String>,
    exclude_paths: Vec<String>,
    include_globs: Vec<Glob>,
    property_conditions: Vec<PropertyCondition>,
    include_added_subtree: bool,
    include_removed_subtree: bool,
    node_type_property: Option<String>,
}

impl Default for EventFilter {
    fn default() -> Self {
        FilterBuilder::new().build()
    }
}

impl EventFilter {
    /// Path changes are observed at
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// True if changes anywhere below the base path are observed
    pub fn is_deep(&self) -> bool {
        self.deep
    }

    /// Report the content of added subtrees
    pub fn include_added_subtree(&self) -> bool {
        self.include_added_subtree
    }

    /// Report the content of removed subtrees
    pub fn include_removed_subtree(&self) -> bool {
        self.include_removed_subtree
    }

    /// Use `name` as node type property unless one was set explicitly
    pub fn with_default_node_type_property(mut self, name: &str) -> Self {
        if self.node_type_property.is_none() {
            self.node_type_property = Some(name.to_string());
        }
        self
    }

    /// True if a change at or below `absolute` can match
    pub fn can_descend(&self, absolute: &str) -> bool {
        if self.is_excluded(absolute) {
            return false;
        }
        let in_scope = if self.deep {
            path::is_related(&self.base_path, absolute)
        } else {
            path::is_ancestor_or_self(absolute, &self.base_path)
        };
        in_scope
            && (self.include_paths.is_empty()
                || self.include_paths.iter().any(|i| path::is_related(i, absolute)))
            && (self.include_globs.is_empty()
                || self
                    .include_globs
                    .iter()
                    .any(|g| path::is_related(&g.literal_prefix(), absolute)))
    }

    /// True if the change of `event_type` at `item` passes the filter
    ///
    /// `item` is the path of the node, or of the property for property
    /// events. `this` is the changed node (the owning node for property
    /// events) and `parent` the node holding the changed item.
    pub fn includes(&self, event_type: EventType, item: &str, this: &NodeRef, parent: &NodeRef) -> bool {
        if self.event_types & event_type.mask() == 0 {
            return false;
        }
        let location = path::parent(item);
        let in_scope = if self.deep {
            path::is_ancestor_or_self(&self.base_path, location)
        } else {
            location == self.base_path
        };
        if !in_scope || self.is_excluded(item) {
            return false;
        }
        if !self.include_paths.is_empty()
            && !self.include_paths.iter().any(|i| path::is_ancestor_or_self(i, item))
        {
            return false;
        }
        if !self.include_globs.is_empty() && !self.include_globs.iter().any(|g| g.matches(item)) {
            return false;
        }
        if !self.node_types.is_empty() {
            let type_property = self.node_type_property.as_deref().unwrap_or("jcr:primaryType");
            let node_type = parent.property(type_property);
            let matches = node_type
                .as_ref()
                .and_then(|p| p.as_str())
                .map(|t| self.node_types.iter().any(|n| n == t))
                .unwrap_or(false);
            if !matches {
                return false;
            }
        }
        self.property_conditions.iter().all(|c| c.matches(this, parent))
    }

    fn is_excluded(&self, absolute: &str) -> bool {
        self.exclude_paths
            .iter()
            .any(|e| path::is_ancestor_or_self(e, absolute))
    }
}

/// Builder of [`EventFilter`]s
///
/// Defaults: every event type deep below `/`, added subtrees reported in
/// full, removed subtrees reported by their root only.
#[derive(Debug, Clone)]
pub struct FilterBuilder {
    filter: EventFilter,
}

impl Default for FilterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterBuilder {
    /// Create new builder with defaults
    pub fn new() -> Self {
        Self {
            filter: EventFilter {
                base_path: path::ROOT.to_string(),
                deep: true,
                event_types: EventType::all_mask(),
                node_types: Vec::new(),
                include_paths: Vec::new(),
                exclude_paths: Vec::new(),
                include_globs: Vec::new(),
                property_conditions: Vec::new(),
                include_added_subtree: true,
                include_removed_subtree: false,
                node_type_property: None,
            },
        }
    }

    /// Observe changes at `base_path`
    pub fn base_path(mut self, base_path: &str) -> Self {
        self.filter.base_path = path::normalize(base_path);
        self
    }

    /// Observe the whole subtree (true) or direct children only (false)
    pub fn deep(mut self, deep: bool) -> Self {
        self.filter.deep = deep;
        self
    }

    /// Only report these event types
    pub fn event_types(mut self, types: &[EventType]) -> Self {
        self.filter.event_types = types.iter().fold(0, |mask, t| mask | t.mask());
        self
    }

    /// Only report changes on nodes whose parent has one of these types
    pub fn node_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter.node_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Property holding the node type
    pub fn node_type_property(mut self, name: &str) -> Self {
        self.filter.node_type_property = Some(name.to_string());
        self
    }

    /// Only report changes at or below `path`; may be repeated
    pub fn include_path(mut self, path: &str) -> Self {
        self.filter.include_paths.push(path::normalize(path));
        self
    }

    /// Never report changes at or below `path`; may be repeated
    pub fn exclude_path(mut self, path: &str) -> Self {
        self.filter.exclude_paths.push(path::normalize(path));
        self
    }

    /// Only report changes whose path matches `pattern`; may be repeated
    pub fn include_glob(mut self, pattern: &str) -> Self {
        self.filter.include_globs.push(Glob::new(pattern));
        self
    }

    /// Require a property condition; all conditions must hold
    pub fn property_condition(mut self, condition: PropertyCondition) -> Self {
        self.filter.property_conditions.push(condition);
        self
    }

    /// Report the content of added subtrees
    pub fn include_added_subtree(mut self, include: bool) -> Self {
        self.filter.include_added_subtree = include;
        self
    }

    /// Report the content of removed subtrees
    pub fn include_removed_subtree(mut self, include: bool) -> Self {
        self.filter.include_removed_subtree = include;
        self
    }

    /// Finish the filter
    pub fn build(self) -> EventFilter {
        self.filter
    }
}
