//! Observation Tests
//!
//! Listeners registered on a store receive the filtered events of every
//! merge, in commit order, with the commit's metadata.

use crate::{commit, memory_store, wait_until};
use arbordb::{
    CommitInfo, EmptyHook, Event, EventListener, EventType, FilterBuilder, NodeRef, NodeState,
    NodeStateExt, Observer, PropertyValue,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn snapshot(&self) -> Vec<(EventType, String)> {
        self.events
            .lock()
            .iter()
            .map(|e| (e.event_type, e.path.clone()))
            .collect()
    }
}

impl EventListener for Recorder {
    fn on_events(&self, events: &[Event]) {
        self.events.lock().extend_from_slice(events);
    }
}

// ============================================================================
// Event generation
// ============================================================================

#[test]
fn added_node_with_property() {
    let store = memory_store();
    let recorder = Arc::new(Recorder::default());
    let _registration = store
        .add_listener(recorder.clone(), FilterBuilder::new().build())
        .unwrap();

    commit(&store, |root| {
        root.child("a").set_property("p", 1i64);
    });

    wait_until(|| recorder.events.lock().len() == 2);
    let events = recorder.events.lock();
    assert_eq!(events[0].event_type, EventType::NodeAdded);
    assert_eq!(events[0].path, "/a");
    assert_eq!(events[1].event_type, EventType::PropertyAdded);
    assert_eq!(events[1].path, "/a/p");
    assert_eq!(events[1].before, None);
    assert_eq!(events[1].after, Some(PropertyValue::from(1i64)));
}

#[test]
fn changes_and_removals() {
    let store = memory_store();
    commit(&store, |root| {
        let a = root.child("a");
        a.set_property("p", 1i64);
        a.set_property("q", "x");
        root.child("b");
    });

    let recorder = Arc::new(Recorder::default());
    let _registration = store
        .add_listener(recorder.clone(), FilterBuilder::new().build())
        .unwrap();
    commit(&store, |root| {
        let a = root.child("a");
        a.set_property("p", 2i64);
        a.remove_property("q");
        root.child("b").remove();
    });

    wait_until(|| recorder.events.lock().len() == 3);
    assert_eq!(
        recorder.snapshot(),
        vec![
            (EventType::PropertyChanged, "/a/p".to_string()),
            (EventType::PropertyRemoved, "/a/q".to_string()),
            (EventType::NodeRemoved, "/b".to_string()),
        ]
    );
    let events = recorder.events.lock();
    assert_eq!(events[0].before, Some(PropertyValue::from(1i64)));
    assert_eq!(events[0].after, Some(PropertyValue::from(2i64)));
    assert_eq!(events[1].before, Some(PropertyValue::from("x")));
    assert_eq!(events[1].after, None);
}

#[test]
fn excluded_subtree_produces_no_events() {
    let store = memory_store();
    commit(&store, |root| {
        root.child("a").child("b");
    });

    let recorder = Arc::new(Recorder::default());
    let filter = FilterBuilder::new().exclude_path("/a/b").build();
    let _registration = store.add_listener(recorder.clone(), filter).unwrap();

    commit(&store, |root| {
        let b = root.child("a").child("b");
        b.set_property("x", 1i64);
        b.child("c");
    });
    commit(&store, |root| {
        root.child("marker");
    });

    wait_until(|| !recorder.events.lock().is_empty());
    assert_eq!(
        recorder.snapshot(),
        vec![(EventType::NodeAdded, "/marker".to_string())]
    );
}

#[test]
fn moved_node_with_identity() {
    let store = memory_store();
    commit(&store, |root| {
        root.child("src").child("n").set_property("jcr:uuid", "id-1");
        root.child("dst");
    });

    let recorder = Arc::new(Recorder::default());
    let _registration = store
        .add_listener(recorder.clone(), FilterBuilder::new().build())
        .unwrap();
    commit(&store, |root| {
        let target = root.child("dst");
        assert!(root.child("src").child("n").move_to(&target, "m"));
    });

    wait_until(|| !recorder.events.lock().is_empty());
    let events = recorder.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::NodeMoved);
    assert_eq!(events[0].path, "/dst/m");
    assert_eq!(events[0].source_path.as_deref(), Some("/src/n"));
    assert_eq!(events[0].identifier.as_deref(), Some("id-1"));
}

#[test]
fn commit_metadata_is_carried() {
    let store = memory_store();
    let recorder = Arc::new(Recorder::default());
    let _registration = store
        .add_listener(recorder.clone(), FilterBuilder::new().build())
        .unwrap();

    let builder = store.root().builder();
    builder.child("a");
    let info = CommitInfo::new("session-1", Some("alice".to_string())).with_info("reason", "test");
    store.merge(&builder, &EmptyHook, info).unwrap();

    wait_until(|| !recorder.events.lock().is_empty());
    let events = recorder.events.lock();
    assert_eq!(events[0].user_id.as_deref(), Some("alice"));
    assert_eq!(events[0].user_data.get("reason").map(String::as_str), Some("test"));
    assert!(!events[0].external);
    assert!(events[0].date > 0);
}

#[test]
fn shallow_filter_sees_only_direct_children() {
    let store = memory_store();
    let recorder = Arc::new(Recorder::default());
    let filter = FilterBuilder::new()
        .base_path("/a")
        .deep(false)
        .event_types(&[EventType::NodeAdded])
        .build();
    let _registration = store.add_listener(recorder.clone(), filter).unwrap();

    commit(&store, |root| {
        root.child("a").child("b").child("c");
    });
    commit(&store, |root| {
        root.child("a").child("d");
    });

    wait_until(|| recorder.events.lock().len() >= 2);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(
        recorder.snapshot(),
        vec![
            (EventType::NodeAdded, "/a/b".to_string()),
            (EventType::NodeAdded, "/a/d".to_string()),
        ]
    );
}

// ============================================================================
// Raw observers
// ============================================================================

struct Transitions {
    seen: Mutex<Vec<(Option<i64>, Option<i64>)>>,
}

impl Observer for Transitions {
    fn content_changed(&self, before: &NodeRef, after: &NodeRef, _info: &CommitInfo) {
        let v = |n: &NodeRef| n.property("v").and_then(|p| p.as_long());
        self.seen.lock().push((v(before), v(after)));
    }
}

#[test]
fn observer_sees_every_transition_in_order() {
    let store = memory_store();
    let observer = Arc::new(Transitions {
        seen: Mutex::new(Vec::new()),
    });
    let registration = store.add_observer(observer.clone()).unwrap();

    for i in 0..20i64 {
        commit(&store, |root| {
            root.set_property("v", i);
        });
    }

    wait_until(|| observer.seen.lock().len() == 20);
    registration.close();
    let seen = observer.seen.lock();
    assert_eq!(seen[0], (None, Some(0)));
    for (i, pair) in seen.iter().enumerate().skip(1) {
        assert_eq!(*pair, (Some(i as i64 - 1), Some(i as i64)));
    }
}
