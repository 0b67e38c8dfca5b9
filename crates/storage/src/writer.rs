//! Persisting snapshots as segment records
//!
//! The writer serializes a tree bottom-up: children first, then the node
//! record referencing them. Three mechanisms keep rewrites small:
//! - a node that already carries a record id in this store is not rewritten
//! - encoded node and blob records are looked up in dedup caches keyed by
//!   their xxh3-128 hash
//! - records are buffered into one segment until it would overflow
//!
//! Records only become readable after [`SegmentWriter::flush`].

use crate::record::{NodeRecord, PropertyRecord, ValueRecord};
use crate::record_cache::{CacheStats, RecordCache, RecordCacheFactory};
use crate::segment::{RecordType, SegmentBuffer};
use crate::store::SegmentStore;
use arbor_core::{Error, GcGeneration, NodeRef, PropertyState, RecordId, Result, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_128;

/// Default upper bound of a segment
pub const DEFAULT_MAX_SEGMENT_SIZE: usize = 256 * 1024;

/// Writer configuration
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Segments are sealed before they would grow past this size
    pub max_segment_size: usize,
    /// Entries of the node record dedup cache; `<= 0` disables it
    pub node_cache_size: i64,
    /// Entries of the blob dedup cache; `<= 0` disables it
    pub blob_cache_size: i64,
    /// Generation stamped on written segments
    pub generation: GcGeneration,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            node_cache_size: 8192,
            blob_cache_size: 1024,
            generation: GcGeneration::INITIAL,
        }
    }
}

/// Counters of a writer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WriterStats {
    /// Node records appended
    pub nodes_written: u64,
    /// Nodes resolved through the node dedup cache
    pub nodes_deduplicated: u64,
    /// Nodes whose existing record id was reused
    pub nodes_reused: u64,
    /// Blob records appended
    pub blobs_written: u64,
    /// Blobs resolved through the blob dedup cache
    pub blobs_deduplicated: u64,
    /// Segments handed to the store
    pub segments_written: u64,
    /// Node cache counters
    pub node_cache: CacheStats,
    /// Blob cache counters
    pub blob_cache: CacheStats,
}

struct WriterState {
    buffer: Option<SegmentBuffer>,
    generation: GcGeneration,
    node_cache: RecordCache<u128>,
    blob_cache: RecordCache<u128>,
    stats: WriterStats,
}

/// Appends records to segments of one store
pub struct SegmentWriter {
    store: Arc<dyn SegmentStore>,
    max_segment_size: usize,
    node_caches: RecordCacheFactory<u128>,
    blob_caches: RecordCacheFactory<u128>,
    state: Mutex<WriterState>,
}

impl SegmentWriter {
    /// Create a writer appending to `store`
    pub fn new(store: Arc<dyn SegmentStore>, options: WriterOptions) -> Self {
        let node_caches = RecordCache::factory(options.node_cache_size);
        let blob_caches = RecordCache::factory(options.blob_cache_size);
        let state = WriterState {
            buffer: None,
            generation: options.generation,
            node_cache: node_caches(),
            blob_cache: blob_caches(),
            stats: WriterStats::default(),
        };
        Self {
            store,
            max_segment_size: options.max_segment_size,
            node_caches,
            blob_caches,
            state: Mutex::new(state),
        }
    }

    /// Generation stamped on new segments
    pub fn generation(&self) -> GcGeneration {
        self.state.lock().generation
    }

    /// Write `node` and its subtree, returning the node's record id
    pub fn write_node(&self, node: &NodeRef) -> Result<RecordId> {
        if !node.exists() {
            return Err(Error::InvalidOperation(
                "cannot persist a non-existent node".into(),
            ));
        }
        let mut state = self.state.lock();
        self.write_tree(&mut state, node)
    }

    /// Write binary content, returning the blob record id
    pub fn write_blob(&self, data: &[u8]) -> Result<RecordId> {
        let mut state = self.state.lock();
        self.write_blob_locked(&mut state, data)
    }

    /// Write an already built node record
    ///
    /// Every reference in `record` must point to a record readable from the
    /// store once this writer is flushed.
    pub fn write_node_record(&self, record: &NodeRecord) -> Result<RecordId> {
        let mut state = self.state.lock();
        self.write_record_locked(&mut state, record)
    }

    /// Seal the current segment and hand it to the store
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    /// Flush, then stamp later segments with `generation` and start with
    /// empty dedup caches
    pub fn set_generation(&self, generation: GcGeneration) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)?;
        state.generation = generation;
        state.node_cache = (self.node_caches)();
        state.blob_cache = (self.blob_caches)();
        Ok(())
    }

    /// Forget every cached record id
    ///
    /// Required after a sweep, since cached ids may point into segments that
    /// no longer exist.
    pub fn reset_caches(&self) {
        let mut state = self.state.lock();
        state.node_cache = (self.node_caches)();
        state.blob_cache = (self.blob_caches)();
    }

    /// Current counters
    pub fn stats(&self) -> WriterStats {
        let state = self.state.lock();
        WriterStats {
            node_cache: state.node_cache.stats(),
            blob_cache: state.blob_cache.stats(),
            ..state.stats
        }
    }

    fn is_reusable(&self, id: &RecordId) -> bool {
        self.store.contains_segment(&id.segment)
    }

    fn write_tree(&self, state: &mut WriterState, node: &NodeRef) -> Result<RecordId> {
        if let Some(id) = node.record_id() {
            if self.is_reusable(&id) {
                state.stats.nodes_reused += 1;
                return Ok(id);
            }
        }
        node.load()?;

        let mut children = Vec::with_capacity(node.child_node_count());
        for (name, child) in node.child_node_entries() {
            let id = self.write_tree(state, &child)?;
            children.push((name, id));
        }

        let mut properties: Vec<PropertyRecord> = Vec::with_capacity(node.property_count());
        for property in node.properties() {
            properties.push(self.property_record(state, &property)?);
        }
        properties.sort_by(|a, b| a.name.cmp(&b.name));

        self.write_record_locked(
            state,
            &NodeRecord {
                properties,
                children,
            },
        )
    }

    fn property_record(
        &self,
        state: &mut WriterState,
        property: &PropertyState,
    ) -> Result<PropertyRecord> {
        let value = property.value();
        let mut values = Vec::with_capacity(value.count());
        for v in value.values() {
            values.push(match v {
                Value::Boolean(b) => ValueRecord::Boolean(*b),
                Value::Long(l) => ValueRecord::Long(*l),
                Value::Double(d) => ValueRecord::Double(*d),
                Value::String(s) => ValueRecord::String(s.clone()),
                Value::Binary(blob) => {
                    let id = match blob.record_id() {
                        Some(id) if self.is_reusable(&id) => id,
                        _ => self.write_blob_locked(state, blob.data())?,
                    };
                    ValueRecord::Binary(id, blob.len() as u64)
                }
            });
        }
        Ok(PropertyRecord {
            name: property.name().to_string(),
            property_type: value.property_type(),
            multi: value.is_multi(),
            values,
        })
    }

    fn write_record_locked(&self, state: &mut WriterState, record: &NodeRecord) -> Result<RecordId> {
        let payload = record.encode()?;
        let key = xxh3_128(&payload);
        if let Some(id) = state.node_cache.get(&key) {
            state.stats.nodes_deduplicated += 1;
            return Ok(id);
        }
        let id = self.append(state, RecordType::Node, &payload)?;
        state.node_cache.put(key, id);
        state.stats.nodes_written += 1;
        Ok(id)
    }

    fn write_blob_locked(&self, state: &mut WriterState, data: &[u8]) -> Result<RecordId> {
        let key = xxh3_128(data);
        if let Some(id) = state.blob_cache.get(&key) {
            state.stats.blobs_deduplicated += 1;
            return Ok(id);
        }
        let id = self.append(state, RecordType::Blob, data)?;
        state.blob_cache.put(key, id);
        state.stats.blobs_written += 1;
        Ok(id)
    }

    fn append(&self, state: &mut WriterState, record_type: RecordType, payload: &[u8]) -> Result<RecordId> {
        let overflows = state
            .buffer
            .as_ref()
            .map(|b| !b.is_empty() && b.would_overflow(payload.len(), self.max_segment_size))
            .unwrap_or(false);
        if overflows {
            self.flush_locked(state)?;
        }
        let generation = state.generation;
        state
            .buffer
            .get_or_insert_with(|| SegmentBuffer::new(generation))
            .append(record_type, payload)
    }

    fn flush_locked(&self, state: &mut WriterState) -> Result<()> {
        let Some(buffer) = state.buffer.take() else {
            return Ok(());
        };
        if buffer.is_empty() {
            return Ok(());
        }
        let segment = buffer.seal();
        tracing::trace!(
            target: "arbor::store",
            segment = %segment.id(),
            records = segment.record_count(),
            size = segment.len(),
            "Writing segment"
        );
        self.store.write_segment(segment)?;
        state.stats.segments_written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SegmentReader;
    use crate::store::MemoryStore;
    use crate::tracker::SegmentTracker;
    use arbor_core::{diff_equals, Blob, MemoryNodeState, NodeStateExt, PropertyType, PropertyValue};

    struct Fixture {
        store: Arc<MemoryStore>,
        writer: SegmentWriter,
        reader: Arc<SegmentReader>,
    }

    fn fixture(options: WriterOptions) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let writer = SegmentWriter::new(store.clone(), options);
        let reader = Arc::new(SegmentReader::new(
            store.clone(),
            Arc::new(SegmentTracker::new()),
        ));
        Fixture {
            store,
            writer,
            reader,
        }
    }

    fn sample_tree() -> NodeRef {
        let leaf = MemoryNodeState::builder()
            .property("title", "leaf")
            .property("data", Blob::new(vec![1u8, 2, 3]))
            .build();
        let tags = PropertyValue::multi(
            PropertyType::String,
            vec![Value::from("a"), Value::from("b")],
        )
        .unwrap();
        MemoryNodeState::builder()
            .property("count", 3i64)
            .property("ratio", 0.5f64)
            .property("flag", true)
            .property("tags", tags)
            .child("x", leaf.clone())
            .child("y", leaf)
            .build()
    }

    // === Round trip ===

    #[test]
    fn test_write_and_read_back() {
        let f = fixture(WriterOptions::default());
        let tree = sample_tree();
        let id = f.writer.write_node(&tree).unwrap();
        f.writer.flush().unwrap();

        let stored = f.reader.node_state(id);
        assert!(diff_equals(&stored, &tree));
        assert_eq!(stored.record_id(), Some(id));
        let x = stored.child_node("x");
        let blob = x.property("data").unwrap();
        assert_eq!(blob.value().value().and_then(|v| v.as_blob()).unwrap().data(), &[1, 2, 3]);
        assert_eq!(stored.child_node_names(), vec!["x", "y"]);
    }

    #[test]
    fn test_non_existent_node_is_rejected() {
        let f = fixture(WriterOptions::default());
        let err = f.writer.write_node(&arbor_core::missing_node()).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_unreadable_subtree_fails_the_write() {
        let f = fixture(WriterOptions::default());
        let lost = f.reader.node_state(RecordId::new(arbor_core::SegmentId::random(), 18));
        let tree = MemoryNodeState::builder()
            .property("p", 1i64)
            .child("lost", lost)
            .build();
        let err = f.writer.write_node(&tree).unwrap_err();
        assert!(matches!(err, Error::SegmentNotFound(_)));
        assert_eq!(f.writer.stats().nodes_written, 0);
    }

    // === Deduplication ===

    #[test]
    fn test_identical_subtrees_share_a_record() {
        let f = fixture(WriterOptions::default());
        let id = f.writer.write_node(&sample_tree()).unwrap();
        f.writer.flush().unwrap();
        let stored = f.reader.node_state(id);
        assert_eq!(
            stored.child_node("x").record_id(),
            stored.child_node("y").record_id()
        );
        let stats = f.writer.stats();
        assert_eq!(stats.nodes_written, 2);
        assert_eq!(stats.nodes_deduplicated, 1);
        assert_eq!(stats.blobs_written, 1);
    }

    #[test]
    fn test_disabled_caches_write_duplicates() {
        let f = fixture(WriterOptions {
            node_cache_size: 0,
            blob_cache_size: 0,
            ..WriterOptions::default()
        });
        f.writer.write_node(&sample_tree()).unwrap();
        let stats = f.writer.stats();
        assert_eq!(stats.nodes_written, 3);
        assert_eq!(stats.nodes_deduplicated, 0);
        assert_eq!(stats.blobs_written, 2);
    }

    #[test]
    fn test_unchanged_subtree_is_reused() {
        let f = fixture(WriterOptions::default());
        let id = f.writer.write_node(&sample_tree()).unwrap();
        f.writer.flush().unwrap();
        let stored = f.reader.node_state(id);
        let x_id = stored.child_node("x").record_id();

        let builder = stored.builder();
        builder.set_property("count", 4i64);
        let modified = builder.node_state();
        let new_id = f.writer.write_node(&modified).unwrap();
        f.writer.flush().unwrap();

        let reread = f.reader.node_state(new_id);
        assert_ne!(new_id, id);
        assert_eq!(reread.child_node("x").record_id(), x_id);
        assert_eq!(f.writer.stats().nodes_reused, 2);
    }

    #[test]
    fn test_reset_caches() {
        let f = fixture(WriterOptions::default());
        f.writer.write_node(&sample_tree()).unwrap();
        f.writer.reset_caches();
        f.writer.write_node(&sample_tree()).unwrap();
        assert_eq!(f.writer.stats().nodes_written, 4);
    }

    // === Segments ===

    #[test]
    fn test_rolls_segments_at_max_size() {
        let f = fixture(WriterOptions {
            max_segment_size: 256,
            ..WriterOptions::default()
        });
        for i in 0..20 {
            f.writer.write_blob(&[i as u8; 100]).unwrap();
        }
        f.writer.flush().unwrap();
        assert!(f.store.segment_count() >= 10);
        for id in f.store.segment_ids() {
            assert!(f.store.read_segment(&id).unwrap().len() <= 256);
        }
    }

    #[test]
    fn test_records_readable_only_after_flush() {
        let f = fixture(WriterOptions::default());
        let id = f.writer.write_blob(b"pending").unwrap();
        assert!(f.reader.read_blob(id).is_err());
        f.writer.flush().unwrap();
        assert_eq!(&*f.reader.read_blob(id).unwrap(), b"pending");
    }

    #[test]
    fn test_set_generation_stamps_segments() {
        let f = fixture(WriterOptions::default());
        let generation = GcGeneration::new(1, 0, true);
        f.writer.write_blob(b"old").unwrap();
        f.writer.set_generation(generation).unwrap();
        let id = f.writer.write_blob(b"new").unwrap();
        f.writer.flush().unwrap();
        assert_eq!(f.store.read_segment(&id.segment).unwrap().generation(), generation);
        assert_eq!(f.store.segment_count(), 2);
    }
}
