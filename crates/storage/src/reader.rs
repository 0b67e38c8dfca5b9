//! Resolving record ids to decoded records

use crate::record::NodeRecord;
use crate::segment::RecordType;
use crate::segment_node::SegmentNodeState;
use crate::store::SegmentStore;
use crate::tracker::SegmentTracker;
use arbor_core::{Error, NodeRef, RecordId, Result};
use std::sync::Arc;

/// Read path of the segment layer: record id to segment to bytes
pub struct SegmentReader {
    store: Arc<dyn SegmentStore>,
    tracker: Arc<SegmentTracker>,
}

impl SegmentReader {
    /// Reader over `store`, registering referenced segments with `tracker`
    pub fn new(store: Arc<dyn SegmentStore>, tracker: Arc<SegmentTracker>) -> Self {
        Self { store, tracker }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn SegmentStore> {
        &self.store
    }

    /// Segment tracker
    pub fn tracker(&self) -> &Arc<SegmentTracker> {
        &self.tracker
    }

    /// Decode the node record `id`
    pub fn read_node(&self, id: RecordId) -> Result<NodeRecord> {
        let segment = self.store.read_segment(&id.segment)?;
        match segment.record(id.offset)? {
            (RecordType::Node, payload) => NodeRecord::decode(id, payload),
            (other, _) => Err(Error::invalid_record(
                id,
                format!("expected a node record, found {:?}", other),
            )),
        }
    }

    /// Bytes of the blob record `id`
    pub fn read_blob(&self, id: RecordId) -> Result<Arc<[u8]>> {
        let segment = self.store.read_segment(&id.segment)?;
        match segment.record(id.offset)? {
            (RecordType::Blob, payload) => Ok(Arc::from(payload)),
            (other, _) => Err(Error::invalid_record(
                id,
                format!("expected a blob record, found {:?}", other),
            )),
        }
    }

    /// Type and payload size of record `id`
    pub fn record_info(&self, id: RecordId) -> Result<(RecordType, usize)> {
        let segment = self.store.read_segment(&id.segment)?;
        let (record_type, payload) = segment.record(id.offset)?;
        Ok((record_type, payload.len()))
    }

    /// Snapshot node backed by record `id`
    pub fn node_state(self: &Arc<Self>, id: RecordId) -> NodeRef {
        Arc::new(SegmentNodeState::new(Arc::clone(self), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentBuffer;
    use crate::store::MemoryStore;
    use arbor_core::{GcGeneration, SegmentId};

    #[test]
    fn test_record_type_is_checked() {
        let store = Arc::new(MemoryStore::new());
        let mut buffer = SegmentBuffer::new(GcGeneration::INITIAL);
        let blob = buffer.append(RecordType::Blob, b"bytes").unwrap();
        let node = buffer
            .append(RecordType::Node, &NodeRecord::default().encode().unwrap())
            .unwrap();
        store.write_segment(buffer.seal()).unwrap();

        let reader = SegmentReader::new(store, Arc::new(SegmentTracker::new()));
        assert_eq!(&*reader.read_blob(blob).unwrap(), b"bytes");
        assert_eq!(reader.read_node(node).unwrap(), NodeRecord::default());
        assert!(matches!(reader.read_node(blob), Err(Error::InvalidRecord { .. })));
        assert!(matches!(reader.read_blob(node), Err(Error::InvalidRecord { .. })));
        assert_eq!(reader.record_info(blob).unwrap(), (RecordType::Blob, 5));
    }

    #[test]
    fn test_missing_segment() {
        let reader = SegmentReader::new(Arc::new(MemoryStore::new()), Arc::new(SegmentTracker::new()));
        let id = RecordId::new(SegmentId::random(), 18);
        assert!(matches!(reader.read_node(id), Err(Error::SegmentNotFound(_))));
    }
}
