//! Copying reachable records into a new generation

use super::{CompactionError, Result};
use arbor_core::{RecordId, SegmentId};
use arbor_storage::{Reference, SegmentReader, SegmentWriter};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Rewrites record trees with a dedicated writer
///
/// Old to new record ids are memoised, so a subtree shared by several
/// parents (or by several heads, like checkpoints of the same content) is
/// rewritten once. Records the compactor wrote itself map to themselves. A node is rewritten if it lives in a victim segment or if
/// any of its references changed; everything else keeps its record id.
pub struct Compactor {
    reader: Arc<SegmentReader>,
    writer: SegmentWriter,
    /// `None` rewrites every record
    victims: Option<FxHashSet<SegmentId>>,
    clone_binaries: bool,
    memo: FxHashMap<RecordId, RecordId>,
    visited: usize,
    nodes_copied: u64,
    blobs_copied: u64,
}

impl Compactor {
    /// Compactor rewriting every reachable record
    pub fn full(reader: Arc<SegmentReader>, writer: SegmentWriter) -> Self {
        Self::new(reader, writer, None, true)
    }

    /// Compactor rewriting records in `victims` and their ancestors
    pub fn tail(
        reader: Arc<SegmentReader>,
        writer: SegmentWriter,
        victims: FxHashSet<SegmentId>,
        clone_binaries: bool,
    ) -> Self {
        Self::new(reader, writer, Some(victims), clone_binaries)
    }

    fn new(
        reader: Arc<SegmentReader>,
        writer: SegmentWriter,
        victims: Option<FxHashSet<SegmentId>>,
        clone_binaries: bool,
    ) -> Self {
        Self {
            reader,
            writer,
            victims,
            clone_binaries,
            memo: FxHashMap::default(),
            visited: 0,
            nodes_copied: 0,
            blobs_copied: 0,
        }
    }

    /// Rewrite the tree rooted at node record `id`, returning the new root
    ///
    /// The result is readable once [`flush`](Self::flush) returned.
    pub fn compact(&mut self, id: RecordId, cancelled: &dyn Fn() -> bool) -> Result<RecordId> {
        self.compact_node(id, cancelled)
    }

    /// Hand buffered records to the store
    pub fn flush(&self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// The compaction writer
    pub fn writer(&self) -> &SegmentWriter {
        &self.writer
    }

    /// Node records written so far
    pub fn nodes_copied(&self) -> u64 {
        self.nodes_copied
    }

    /// Blob records written so far
    pub fn blobs_copied(&self) -> u64 {
        self.blobs_copied
    }

    fn is_victim(&self, segment: &SegmentId) -> bool {
        self.victims
            .as_ref()
            .map(|victims| victims.contains(segment))
            .unwrap_or(true)
    }

    fn compact_node(&mut self, id: RecordId, cancelled: &dyn Fn() -> bool) -> Result<RecordId> {
        if let Some(&new) = self.memo.get(&id) {
            return Ok(new);
        }
        self.visited += 1;
        if self.visited % 1024 == 0 && cancelled() {
            return Err(CompactionError::Cancelled);
        }

        let record = self.reader.read_node(id)?;
        // Cancellation travels through the record mapper as a storage error.
        let mut interrupted = None;
        let mapped = record.map_references(|kind, reference| {
            let mapped = match kind {
                Reference::Child => self.compact_node(reference, cancelled),
                Reference::Blob => self.compact_blob(reference),
            };
            mapped.map_err(|e| match e {
                CompactionError::Storage(e) => e,
                other => {
                    let reason = other.to_string();
                    interrupted = Some(other);
                    arbor_core::Error::InvalidOperation(reason)
                }
            })
        });
        let mapped = match mapped {
            Ok(mapped) => mapped,
            Err(e) => return Err(interrupted.take().unwrap_or(CompactionError::Storage(e))),
        };

        let new = if self.is_victim(&id.segment) || mapped != record {
            self.nodes_copied += 1;
            self.writer.write_node_record(&mapped)?
        } else {
            id
        };
        self.memo.insert(id, new);
        self.memo.insert(new, new);
        Ok(new)
    }

    fn compact_blob(&mut self, id: RecordId) -> Result<RecordId> {
        if let Some(&new) = self.memo.get(&id) {
            return Ok(new);
        }
        let copy = self.is_victim(&id.segment) && (self.clone_binaries || self.victims.is_none());
        let new = if copy {
            let data = self.reader.read_blob(id)?;
            self.blobs_copied += 1;
            self.writer.write_blob(&data)?
        } else {
            id
        };
        self.memo.insert(id, new);
        self.memo.insert(new, new);
        Ok(new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{diff_equals, Blob, GcGeneration, MemoryNodeState, NodeRef, NodeStateExt};
    use arbor_storage::{MemoryStore, SegmentStore, SegmentTracker, WriterOptions};

    struct Fixture {
        store: Arc<dyn SegmentStore>,
        reader: Arc<SegmentReader>,
        writer: SegmentWriter,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn SegmentStore> = Arc::new(MemoryStore::new());
        let reader = Arc::new(SegmentReader::new(store.clone(), Arc::new(SegmentTracker::new())));
        let writer = SegmentWriter::new(store.clone(), WriterOptions::default());
        Fixture {
            store,
            reader,
            writer,
        }
    }

    fn compaction_writer(store: &Arc<dyn SegmentStore>) -> SegmentWriter {
        SegmentWriter::new(
            store.clone(),
            WriterOptions {
                generation: GcGeneration::INITIAL.next_tail(),
                ..WriterOptions::default()
            },
        )
    }

    fn sample() -> NodeRef {
        let shared = MemoryNodeState::builder()
            .property("data", Blob::new(vec![5u8; 100]))
            .build();
        MemoryNodeState::builder()
            .property("v", 1i64)
            .child("a", shared.clone())
            .child("b", MemoryNodeState::builder().child("c", shared).build())
            .build()
    }

    #[test]
    fn test_full_rewrites_everything() {
        let f = fixture();
        let tree = sample();
        let id = f.writer.write_node(&tree).unwrap();
        f.writer.flush().unwrap();

        let mut compactor = Compactor::full(f.reader.clone(), compaction_writer(&f.store));
        let new = compactor.compact(id, &|| false).unwrap();
        compactor.flush().unwrap();

        assert_ne!(new.segment, id.segment);
        assert!(f.store.read_segment(&new.segment).unwrap().generation().compacted);
        let compacted = f.reader.node_state(new);
        assert!(diff_equals(&compacted, &tree));
        // shared leaf copied once
        assert_eq!(compacted.child_node("a").record_id(), compacted.child_node("b").child_node("c").record_id());
        assert_eq!(compactor.blobs_copied(), 1);
    }

    #[test]
    fn test_tail_keeps_records_outside_victims() {
        let f = fixture();
        let stable = f.writer.write_node(&sample()).unwrap();
        f.writer.flush().unwrap();

        let root = f.reader.node_state(stable);
        let builder = root.builder();
        builder.child("fresh").set_property("x", "y");
        let head = f.writer.write_node(&builder.node_state()).unwrap();
        f.writer.flush().unwrap();

        // only the segment of the second commit is a victim
        let victims: FxHashSet<SegmentId> = [head.segment].into_iter().collect();
        let mut compactor = Compactor::tail(f.reader.clone(), compaction_writer(&f.store), victims, false);
        let new = compactor.compact(head, &|| false).unwrap();
        compactor.flush().unwrap();

        let compacted = f.reader.node_state(new);
        assert_ne!(new, head);
        assert_eq!(compacted.child_node("a").record_id(), root.child_node("a").record_id());
        assert_eq!(compacted.child_node("fresh").property("x").unwrap().as_str(), Some("y"));
        assert_eq!(compactor.nodes_copied(), 2);
    }

    #[test]
    fn test_tail_without_victims_is_identity() {
        let f = fixture();
        let id = f.writer.write_node(&sample()).unwrap();
        f.writer.flush().unwrap();
        let mut compactor =
            Compactor::tail(f.reader.clone(), compaction_writer(&f.store), FxHashSet::default(), true);
        assert_eq!(compactor.compact(id, &|| false).unwrap(), id);
        assert_eq!(compactor.nodes_copied(), 0);
    }

    #[test]
    fn test_memo_makes_second_pass_incremental() {
        let f = fixture();
        let id = f.writer.write_node(&sample()).unwrap();
        f.writer.flush().unwrap();
        let mut compactor = Compactor::full(f.reader.clone(), compaction_writer(&f.store));
        let first = compactor.compact(id, &|| false).unwrap();
        let copied = compactor.nodes_copied();

        let builder = f.reader.node_state(id).builder();
        builder.set_property("v", 2i64);
        let moved = f.writer.write_node(&builder.node_state()).unwrap();
        f.writer.flush().unwrap();

        let second = compactor.compact(moved, &|| false).unwrap();
        compactor.flush().unwrap();
        assert_ne!(first, second);
        assert_eq!(compactor.nodes_copied(), copied + 1);
        assert_eq!(
            f.reader.node_state(second).property("v").unwrap().as_long(),
            Some(2)
        );
    }
}
