//! Concurrent Merge Tests
//!
//! Builders created from the same root are rebased onto whatever was merged
//! in between; only changes to the same item conflict.

use crate::{commit, long_at, memory_store};
use arbordb::{CommitInfo, EmptyHook, NodeState, NodeStateExt};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn disjoint_merges_both_succeed() {
    let store = memory_store();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|name| {
            let store = store.clone();
            let barrier = barrier.clone();
            let builder = store.root().builder();
            builder.child(name).set_property("v", 1i64);
            thread::spawn(move || {
                barrier.wait();
                store.merge(&builder, &EmptyHook, CommitInfo::empty())
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert_eq!(long_at(&store.root(), &["left"], "v"), Some(1));
    assert_eq!(long_at(&store.root(), &["right"], "v"), Some(1));
}

#[test]
fn same_property_merges_conflict_once() {
    let store = memory_store();
    commit(&store, |root| {
        root.child("a").set_property("p", 0i64);
    });
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [1i64, 2i64]
        .into_iter()
        .map(|value| {
            let store = store.clone();
            let barrier = barrier.clone();
            let builder = store.root().builder();
            builder.child("a").set_property("p", value);
            thread::spawn(move || {
                barrier.wait();
                store.merge(&builder, &EmptyHook, CommitInfo::empty())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_conflict()))
        .count();
    assert_eq!(conflicts, 1);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    let winner = long_at(&store.root(), &["a"], "p");
    assert!(winner == Some(1) || winner == Some(2));
}

#[test]
fn random_disjoint_writers_all_land() {
    let store = memory_store();
    let writers = 8;
    let per_writer = 25;

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let store = store.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut order: Vec<i64> = (0..per_writer).collect();
                order.shuffle(&mut rng);
                for i in order {
                    let builder = store.root().builder();
                    builder
                        .child(&format!("w{}", w))
                        .set_property(&format!("k{}", i), rng.gen_range(0..1000i64));
                    store.merge(&builder, &EmptyHook, CommitInfo::empty()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let root = store.root();
    for w in 0..writers {
        let node = root.child_node(&format!("w{}", w));
        assert_eq!(node.property_count(), per_writer as usize);
    }
}
