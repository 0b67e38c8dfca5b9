//! Registry of segments referenced from memory
//!
//! Every [`SegmentNodeState`](crate::SegmentNodeState) holds a
//! [`SegmentHandle`] for its segment. The tracker only keeps weak pointers,
//! so a segment drops out of the registry once the last node referencing it
//! is gone. The garbage collector treats tracked segments as roots according
//! to its cleanup strategy.

use arbor_core::{now_millis, SegmentId};
use dashmap::DashMap;
use std::sync::{Arc, Weak};

/// Strong reference to a segment held by in-memory nodes
#[derive(Debug)]
pub struct SegmentHandle {
    id: SegmentId,
    first_seen: u64,
}

impl SegmentHandle {
    /// Segment id
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Millis since epoch when the segment was first referenced
    pub fn first_seen(&self) -> u64 {
        self.first_seen
    }
}

/// Weak registry of in-memory segment references
#[derive(Default)]
pub struct SegmentTracker {
    handles: DashMap<SegmentId, Weak<SegmentHandle>>,
}

impl SegmentTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `id`, shared with every other live reference
    pub fn handle(&self, id: SegmentId) -> Arc<SegmentHandle> {
        let mut entry = self.handles.entry(id).or_insert_with(Weak::new);
        if let Some(handle) = entry.upgrade() {
            return handle;
        }
        let handle = Arc::new(SegmentHandle {
            id,
            first_seen: now_millis(),
        });
        *entry = Arc::downgrade(&handle);
        handle
    }

    /// Ids of referenced segments accepted by `filter`, pruning dead entries
    pub fn live_segments(&self, mut filter: impl FnMut(&SegmentHandle) -> bool) -> Vec<SegmentId> {
        let mut live = Vec::new();
        self.handles.retain(|id, weak| match weak.upgrade() {
            Some(handle) => {
                if filter(&handle) {
                    live.push(*id);
                }
                true
            }
            None => false,
        });
        live
    }

    /// Number of registered segments, dead ones included
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
