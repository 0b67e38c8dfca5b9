//! Diff-driven event generation
//!
//! [`EventGenerator`] runs the diff engine over one root transition and turns
//! its callbacks into [`Event`]s. Subtrees the filter rules out are pruned
//! from the comparison. Once the diff completes, a removed and an added node
//! sharing the same identity are folded into a single `NodeMoved` event.

use super::event::{Event, EventType};
use super::filter::EventFilter;
use arbor_concurrency::CommitInfo;
use arbor_core::{compare, missing_node, path, NodeRef, NodeStateDiff, PropertyState};
use rustc_hash::FxHashMap;

struct Candidate {
    event: Event,
    included: bool,
    this: NodeRef,
    parent: NodeRef,
}

/// Turns one root transition into filtered events
pub struct EventGenerator<'a> {
    filter: &'a EventFilter,
    identifier_property: &'a str,
    info: &'a CommitInfo,
    nodes: FxHashMap<String, (NodeRef, NodeRef)>,
    candidates: Vec<Candidate>,
}

impl<'a> EventGenerator<'a> {
    /// Generator applying `filter`; nodes are identified by the string value
    /// of `identifier_property`
    pub fn new(filter: &'a EventFilter, identifier_property: &'a str, info: &'a CommitInfo) -> Self {
        Self {
            filter,
            identifier_property,
            info,
            nodes: FxHashMap::default(),
            candidates: Vec::new(),
        }
    }

    /// Events describing the transition from `before` to `after`, in diff order
    pub fn generate(mut self, before: &NodeRef, after: &NodeRef) -> Vec<Event> {
        self.nodes
            .insert(path::ROOT.to_string(), (before.clone(), after.clone()));
        compare(path::ROOT, before, after, &mut self);
        self.correlate_moves();
        self.candidates
            .into_iter()
            .filter(|c| c.included)
            .map(|c| c.event)
            .collect()
    }

    fn identifier(&self, node: &NodeRef) -> Option<String> {
        node.property(self.identifier_property)
            .and_then(|p| p.as_str().map(str::to_string))
    }

    fn context(&self, at: &str) -> (NodeRef, NodeRef) {
        self.nodes
            .get(at)
            .cloned()
            .unwrap_or_else(|| (missing_node(), missing_node()))
    }

    fn push_property(
        &mut self,
        event_type: EventType,
        at: &str,
        node: NodeRef,
        name: &str,
        before: Option<&PropertyState>,
        after: Option<&PropertyState>,
    ) {
        let item = path::concat(at, name);
        let included = self.filter.includes(event_type, &item, &node, &node);
        let mut event = Event::new(event_type, item, self.info);
        event.before = before.map(|p| p.value().clone());
        event.after = after.map(|p| p.value().clone());
        event.identifier = self.identifier(&node);
        self.candidates.push(Candidate {
            event,
            included,
            this: node.clone(),
            parent: node,
        });
    }

    fn push_node(&mut self, event_type: EventType, item: String, this: &NodeRef, parent: &NodeRef) {
        let included = self.filter.includes(event_type, &item, this, parent);
        let mut event = Event::new(event_type, item, self.info);
        event.identifier = self.identifier(this);
        self.candidates.push(Candidate {
            event,
            included,
            this: this.clone(),
            parent: parent.clone(),
        });
    }

    fn descend(&mut self, item: String, before: NodeRef, after: NodeRef) -> bool {
        if !self.filter.can_descend(&item) {
            return false;
        }
        self.nodes.insert(item, (before, after));
        true
    }

    /// Fold removed/added pairs of the same identity into moves
    fn correlate_moves(&mut self) {
        let mut removed: FxHashMap<String, usize> = FxHashMap::default();
        for (index, candidate) in self.candidates.iter().enumerate() {
            if candidate.event.event_type == EventType::NodeRemoved {
                if let Some(id) = &candidate.event.identifier {
                    removed.entry(id.clone()).or_insert(index);
                }
            }
        }
        if removed.is_empty() {
            return;
        }

        let mut moves = Vec::new();
        for (index, candidate) in self.candidates.iter().enumerate() {
            if candidate.event.event_type != EventType::NodeAdded {
                continue;
            }
            let Some(id) = &candidate.event.identifier else {
                continue;
            };
            if let Some(source) = removed.remove(id) {
                moves.push((source, index));
            }
        }
        if moves.is_empty() {
            return;
        }

        let mut dropped = vec![false; self.candidates.len()];
        let mut covered: Vec<String> = Vec::with_capacity(moves.len() * 2);
        for &(source, target) in &moves {
            let source_path = self.candidates[source].event.path.clone();
            let target_path = self.candidates[target].event.path.clone();
            let source_included = self.filter.includes(
                EventType::NodeMoved,
                &source_path,
                &self.candidates[source].this,
                &self.candidates[source].parent,
            );

            let candidate = &mut self.candidates[target];
            let target_included = self.filter.includes(
                EventType::NodeMoved,
                &target_path,
                &candidate.this,
                &candidate.parent,
            );
            candidate.event.event_type = EventType::NodeMoved;
            candidate.event.source_path = Some(source_path.clone());
            candidate.included = source_included || target_included;
            dropped[source] = true;

            covered.push(source_path);
            covered.push(target_path);
        }

        for (index, candidate) in self.candidates.iter().enumerate() {
            if covered
                .iter()
                .any(|p| path::is_ancestor(p, &candidate.event.path))
            {
                dropped[index] = true;
            }
        }
        let mut index = 0;
        self.candidates.retain(|_| {
            let keep = !dropped[index];
            index += 1;
            keep
        });
    }
}

impl NodeStateDiff for EventGenerator<'_> {
    fn property_added(&mut self, at: &str, after: &PropertyState) -> bool {
        let (_, node) = self.context(at);
        self.push_property(EventType::PropertyAdded, at, node, after.name(), None, Some(after));
        true
    }

    fn property_changed(&mut self, at: &str, before: &PropertyState, after: &PropertyState) -> bool {
        let (_, node) = self.context(at);
        self.push_property(
            EventType::PropertyChanged,
            at,
            node,
            after.name(),
            Some(before),
            Some(after),
        );
        true
    }

    fn property_deleted(&mut self, at: &str, before: &PropertyState) -> bool {
        let (node, _) = self.context(at);
        self.push_property(EventType::PropertyRemoved, at, node, before.name(), Some(before), None);
        true
    }

    fn child_node_added(&mut self, at: &str, name: &str, after: &NodeRef) -> bool {
        let (_, parent) = self.context(at);
        let item = path::concat(at, name);
        self.push_node(EventType::NodeAdded, item.clone(), after, &parent);
        self.filter.include_added_subtree() && self.descend(item, missing_node(), after.clone())
    }

    fn child_node_changed(&mut self, at: &str, name: &str, before: &NodeRef, after: &NodeRef) -> bool {
        self.descend(path::concat(at, name), before.clone(), after.clone())
    }

    fn child_node_deleted(&mut self, at: &str, name: &str, before: &NodeRef) -> bool {
        let (parent, _) = self.context(at);
        let item = path::concat(at, name);
        self.push_node(EventType::NodeRemoved, item.clone(), before, &parent);
        self.filter.include_removed_subtree() && self.descend(item, before.clone(), missing_node())
    }

    fn child_order_changed(&mut self, at: &str, before: &[String], after: &[String]) -> bool {
        let (_, parent) = self.context(at);
        let surviving: Vec<&String> = after.iter().filter(|n| before.contains(n)).collect();
        let positions: Vec<usize> = surviving
            .iter()
            .filter_map(|n| before.iter().position(|b| b == *n))
            .collect();
        let stable = stable_positions(&positions);

        for (name, stays) in surviving.iter().zip(stable) {
            if stays {
                continue;
            }
            let item = path::concat(at, name);
            let this = parent.child_node(name);
            let included = self.filter.includes(EventType::NodeMoved, &item, &this, &parent);
            let mut event = Event::new(EventType::NodeMoved, item.clone(), self.info);
            event.source_path = Some(item);
            event.before_sibling = after
                .iter()
                .skip_while(|n| n != name)
                .nth(1)
                .cloned();
            event.identifier = self.identifier(&this);
            self.candidates.push(Candidate {
                event,
                included,
                this,
                parent: parent.clone(),
            });
        }
        true
    }
}

/// Marks the entries of the longest increasing run of `positions`
///
/// Children on that run kept their relative order; every other surviving
/// child is reported as reordered.
fn stable_positions(positions: &[usize]) -> Vec<bool> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; positions.len()];
    for (i, &value) in positions.iter().enumerate() {
        let k = tails.partition_point(|&t| positions[t] < value);
        if k > 0 {
            previous[i] = Some(tails[k - 1]);
        }
        if k == tails.len() {
            tails.push(i);
        } else {
            tails[k] = i;
        }
    }
    let mut stable = vec![false; positions.len()];
    let mut current = tails.last().copied();
    while let Some(i) = current {
        stable[i] = true;
        current = previous[i];
    }
    stable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::filter::FilterBuilder;
    use arbor_core::{empty_node, MemoryNodeState, NodeStateExt, PropertyValue};
    use proptest::strategy::Strategy;

    fn events(filter: &EventFilter, before: &NodeRef, after: &NodeRef) -> Vec<String> {
        let info = CommitInfo::empty();
        EventGenerator::new(filter, "jcr:uuid", &info)
            .generate(before, after)
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    fn tree() -> NodeRef {
        MemoryNodeState::builder()
            .child(
                "a",
                MemoryNodeState::builder()
                    .property("jcr:uuid", "id-b")
                    .child("b", MemoryNodeState::builder().property("x", 1i64).build())
                    .build(),
            )
            .child("c", empty_node())
            .build()
    }

    // ========================================================================
    // Basic events
    // ========================================================================

    #[test]
    fn test_added_node_with_property() {
        let before = empty_node();
        let builder = before.builder();
        builder.child("a").set_property("p", 1i64);
        let after = builder.node_state();

        let info = CommitInfo::empty().with_info("source", "test");
        let filter = EventFilter::default();
        let generated = EventGenerator::new(&filter, "jcr:uuid", &info).generate(&before, &after);

        assert_eq!(generated.len(), 2);
        assert_eq!(generated[0].event_type, EventType::NodeAdded);
        assert_eq!(generated[0].path, "/a");
        assert_eq!(generated[1].event_type, EventType::PropertyAdded);
        assert_eq!(generated[1].path, "/a/p");
        assert_eq!(generated[1].before, None);
        assert_eq!(generated[1].after, Some(PropertyValue::from(1i64)));
        assert_eq!(generated[1].user_data.get("source").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_property_change_and_removal() {
        let before = tree();
        let builder = before.builder();
        builder.child("a").child("b").set_property("x", 2i64);
        builder.child("a").remove_property("jcr:uuid");
        let after = builder.node_state();

        let generated = events(&EventFilter::default(), &before, &after);
        assert_eq!(generated, vec!["PROPERTY_REMOVED /a/jcr:uuid", "PROPERTY_CHANGED /a/b/x"]);
    }

    #[test]
    fn test_identical_roots_produce_nothing() {
        let root = tree();
        assert!(events(&EventFilter::default(), &root, &root).is_empty());
    }

    // ========================================================================
    // Subtree toggles and pruning
    // ========================================================================

    #[test]
    fn test_removed_subtree_toggle() {
        let before = tree();
        let builder = before.builder();
        builder.child("a").child("b").remove();
        let after = builder.node_state();

        assert_eq!(events(&EventFilter::default(), &before, &after), vec!["NODE_REMOVED /a/b"]);

        let deep = FilterBuilder::new().include_removed_subtree(true).build();
        assert_eq!(
            events(&deep, &before, &after),
            vec!["NODE_REMOVED /a/b", "PROPERTY_REMOVED /a/b/x"]
        );
    }

    #[test]
    fn test_added_subtree_toggle() {
        let before = empty_node();
        let builder = before.builder();
        builder.child("n").child("m").set_property("q", true);
        let after = builder.node_state();

        let shallow = FilterBuilder::new().include_added_subtree(false).build();
        assert_eq!(events(&shallow, &before, &after), vec!["NODE_ADDED /n"]);
        assert_eq!(events(&EventFilter::default(), &before, &after).len(), 3);
    }

    #[test]
    fn test_excluded_subtree_is_silent() {
        let before = tree();
        let builder = before.builder();
        builder.child("a").child("b").remove();
        let after = builder.node_state();

        let filter = FilterBuilder::new().exclude_path("/a/b").build();
        assert!(events(&filter, &before, &after).is_empty());
    }

    #[test]
    fn test_base_path_prunes_siblings() {
        let before = tree();
        let builder = before.builder();
        builder.child("c").set_property("y", 1i64);
        builder.child("a").child("b").set_property("x", 5i64);
        let after = builder.node_state();

        let filter = FilterBuilder::new().base_path("/a").build();
        assert_eq!(events(&filter, &before, &after), vec!["PROPERTY_CHANGED /a/b/x"]);
    }

    // ========================================================================
    // Moves and reorders
    // ========================================================================

    #[test]
    fn test_move_with_identity() {
        let before = tree();
        let builder = before.builder();
        let source = builder.child("a");
        let target = builder.child("c");
        assert!(source.move_to(&target, "moved"));
        let after = builder.node_state();

        let generated = events(&EventFilter::default(), &before, &after);
        assert_eq!(generated, vec!["NODE_MOVED /c/moved (from /a)"]);
    }

    #[test]
    fn test_move_without_identity_is_remove_and_add() {
        let before = tree();
        let builder = before.builder();
        let source = builder.child("a").child("b");
        let target = builder.child("c");
        assert!(source.move_to(&target, "b"));
        let after = builder.node_state();

        let generated = events(&EventFilter::default(), &before, &after);
        assert!(generated.contains(&"NODE_ADDED /c/b".to_string()));
        assert!(generated.contains(&"NODE_REMOVED /a/b".to_string()));
        assert!(!generated.iter().any(|e| e.starts_with("NODE_MOVED")));
    }

    #[test]
    fn test_reorder_reports_moved_child() {
        let before = MemoryNodeState::builder()
            .child("a", empty_node())
            .child("b", empty_node())
            .child("c", empty_node())
            .build();
        let builder = before.builder();
        builder.order_before("c", Some("a"));
        let after = builder.node_state();

        let info = CommitInfo::empty();
        let filter = EventFilter::default();
        let generated = EventGenerator::new(&filter, "jcr:uuid", &info).generate(&before, &after);
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].event_type, EventType::NodeMoved);
        assert_eq!(generated[0].path, "/c");
        assert_eq!(generated[0].source_path.as_deref(), Some("/c"));
        assert_eq!(generated[0].before_sibling.as_deref(), Some("a"));
    }

    #[test]
    fn test_stable_positions() {
        assert_eq!(stable_positions(&[0, 1, 2]), vec![true, true, true]);
        assert_eq!(stable_positions(&[2, 0, 1]), vec![false, true, true]);
        assert_eq!(stable_positions(&[1, 0]), vec![false, true]);
        assert!(stable_positions(&[]).is_empty());
    }

    fn lis_length(values: &[usize]) -> usize {
        let mut best = vec![1; values.len()];
        for i in 0..values.len() {
            for j in 0..i {
                if values[j] < values[i] {
                    best[i] = best[i].max(best[j] + 1);
                }
            }
        }
        best.into_iter().max().unwrap_or(0)
    }

    proptest::proptest! {
        #[test]
        fn prop_stable_positions_are_a_longest_run(
            positions in (0usize..12).prop_flat_map(|n| {
                proptest::strategy::Just((0..n).collect::<Vec<_>>()).prop_shuffle()
            })
        ) {
            let stable = stable_positions(&positions);
            let kept: Vec<usize> = positions
                .iter()
                .zip(&stable)
                .filter(|(_, s)| **s)
                .map(|(p, _)| *p)
                .collect();
            proptest::prop_assert!(kept.windows(2).all(|w| w[0] < w[1]));
            proptest::prop_assert_eq!(kept.len(), lis_length(&positions));
        }
    }
}
