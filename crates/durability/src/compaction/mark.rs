//! Reachability marking

use super::{CompactionError, CompactionStrategy, Result};
use arbor_core::{now_millis, RecordId, SegmentId};
use arbor_storage::segment::RECORD_HEADER_SIZE;
use arbor_storage::{RecordType, Reference, SegmentReader};
use rustc_hash::{FxHashMap, FxHashSet};

/// Records reachable from a set of roots
#[derive(Debug, Default)]
pub struct MarkResult {
    /// Segments holding at least one reachable record
    pub live: FxHashSet<SegmentId>,
    /// Bytes of reachable records per segment, record headers included
    pub live_bytes: FxHashMap<SegmentId, u64>,
    /// Number of reachable records
    pub records: usize,
}

impl MarkResult {
    /// Live bytes of `segment`
    pub fn live_bytes_of(&self, segment: &SegmentId) -> u64 {
        self.live_bytes.get(segment).copied().unwrap_or(0)
    }
}

/// Walk every record reachable from `roots`
///
/// `cancelled` is polled periodically; returning true aborts the walk.
pub fn mark(
    reader: &SegmentReader,
    roots: &[RecordId],
    cancelled: &dyn Fn() -> bool,
) -> Result<MarkResult> {
    let mut result = MarkResult::default();
    let mut visited: FxHashSet<RecordId> = FxHashSet::default();
    let mut stack: Vec<(Reference, RecordId)> =
        roots.iter().map(|id| (Reference::Child, *id)).collect();

    while let Some((kind, id)) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        if visited.len() % 1024 == 0 && cancelled() {
            return Err(CompactionError::Cancelled);
        }
        let (record_type, size) = reader.record_info(id)?;
        result.records += 1;
        result.live.insert(id.segment);
        *result.live_bytes.entry(id.segment).or_insert(0) += (RECORD_HEADER_SIZE + size) as u64;

        match (kind, record_type) {
            (Reference::Child, RecordType::Node) => {
                stack.extend(reader.read_node(id)?.references());
            }
            (Reference::Blob, RecordType::Blob) => {}
            (expected, found) => {
                return Err(CompactionError::internal(format!(
                    "record {} referenced as {:?} is a {:?} record",
                    id, expected, found
                )));
            }
        }
    }
    Ok(result)
}

/// Node records of in-memory referenced segments the strategy keeps alive
pub fn tracked_roots(reader: &SegmentReader, strategy: &CompactionStrategy) -> Vec<RecordId> {
    let now = now_millis();
    let segments = reader
        .tracker()
        .live_segments(|handle| strategy.retains_tracked(handle.first_seen(), now));
    let mut roots = Vec::new();
    for id in segments {
        let segment = match reader.store().read_segment(&id) {
            Ok(segment) => segment,
            Err(e) => {
                tracing::debug!(target: "arbor::compaction", segment = %id, error = %e, "Tracked segment is gone");
                continue;
            }
        };
        for record in segment.records() {
            match record {
                Ok((offset, RecordType::Node, _)) => roots.push(RecordId::new(id, offset)),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "arbor::compaction", segment = %id, error = %e, "Unreadable record in tracked segment");
                    break;
                }
            }
        }
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::CleanupType;
    use arbor_core::{Blob, MemoryNodeState};
    use arbor_storage::{MemoryStore, SegmentStore, SegmentTracker, SegmentWriter, WriterOptions};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Arc<SegmentReader>, SegmentWriter) {
        let store: Arc<dyn SegmentStore> = Arc::new(MemoryStore::new());
        let reader = Arc::new(SegmentReader::new(store.clone(), Arc::new(SegmentTracker::new())));
        let writer = SegmentWriter::new(store, WriterOptions::default());
        (reader, writer)
    }

    #[test]
    fn test_marks_nodes_and_blobs() {
        let (reader, writer) = setup();
        let child = MemoryNodeState::builder()
            .property("data", Blob::new(vec![0u8; 64]))
            .build();
        let root = MemoryNodeState::builder().child("c", child).build();
        let id = writer.write_node(&root).unwrap();
        writer.flush().unwrap();

        let result = mark(&reader, &[id], &|| false).unwrap();
        assert_eq!(result.records, 3);
        assert_eq!(result.live.len(), 1);
        assert!(result.live_bytes_of(&id.segment) > 64);
    }

    #[test]
    fn test_unreachable_segments_are_not_marked() {
        let (reader, writer) = setup();
        let old = writer
            .write_node(&MemoryNodeState::builder().property("v", 1i64).build())
            .unwrap();
        writer.flush().unwrap();
        let new = writer
            .write_node(&MemoryNodeState::builder().property("v", 2i64).build())
            .unwrap();
        writer.flush().unwrap();

        let result = mark(&reader, &[new], &|| false).unwrap();
        assert!(result.live.contains(&new.segment));
        assert!(!result.live.contains(&old.segment));
    }

    #[test]
    fn test_tracked_roots_follow_strategy() {
        let (reader, writer) = setup();
        let id = writer
            .write_node(&MemoryNodeState::builder().property("v", 1i64).build())
            .unwrap();
        writer.flush().unwrap();
        let _held = reader.node_state(id);

        let all = CompactionStrategy::default().with_cleanup(CleanupType::CleanAll, Duration::ZERO);
        assert!(tracked_roots(&reader, &all).is_empty());

        let none = CompactionStrategy::default().with_cleanup(CleanupType::CleanNone, Duration::ZERO);
        assert_eq!(tracked_roots(&reader, &none), vec![id]);

        let old = CompactionStrategy::default()
            .with_cleanup(CleanupType::CleanOld, Duration::from_secs(3600));
        assert_eq!(tracked_roots(&reader, &old), vec![id]);
    }

    #[test]
    fn test_cancelled_walk() {
        let (reader, writer) = setup();
        let mut builder = MemoryNodeState::builder();
        for i in 0..1100 {
            builder = builder.child(
                &format!("n{}", i),
                MemoryNodeState::builder().property("i", i as i64).build(),
            );
        }
        let id = writer.write_node(&builder.build()).unwrap();
        writer.flush().unwrap();
        let err = mark(&reader, &[id], &|| true).unwrap_err();
        assert!(matches!(err, CompactionError::Cancelled));
    }
}
