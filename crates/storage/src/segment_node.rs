//! Snapshot nodes backed by segment records

use crate::reader::SegmentReader;
use crate::record::{NodeRecord, PropertyRecord, ValueRecord};
use crate::tracker::SegmentHandle;
use arbor_core::{
    missing_node, Blob, ChildNodeEntries, NodeRef, NodeState, Properties, PropertyState,
    PropertyValue, RecordId, Result, Value,
};
use once_cell::sync::{Lazy, OnceCell};
use std::fmt;
use std::sync::Arc;

static UNREADABLE: Lazy<Loaded> = Lazy::new(|| Loaded {
    record: NodeRecord::default(),
    properties: Vec::new(),
});

/// Decoded content of a node record with its blobs resolved
struct Loaded {
    record: NodeRecord,
    properties: Vec<PropertyState>,
}

/// Node read lazily from a node record
///
/// The record is decoded on first access and kept for the lifetime of the
/// node. A failed read is not kept: [`load`](NodeState::load) reports it
/// and the next access reads again. Until a read succeeds the accessors
/// answer as if the node had no properties or children.
pub struct SegmentNodeState {
    reader: Arc<SegmentReader>,
    id: RecordId,
    _handle: Arc<SegmentHandle>,
    loaded: OnceCell<Loaded>,
}

impl SegmentNodeState {
    /// Node backed by record `id`
    pub fn new(reader: Arc<SegmentReader>, id: RecordId) -> Self {
        let handle = reader.tracker().handle(id.segment);
        Self {
            reader,
            id,
            _handle: handle,
            loaded: OnceCell::new(),
        }
    }

    /// Record id of this node
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Decoded record, reading it if this is the first successful access
    pub fn try_record(&self) -> Result<&NodeRecord> {
        self.try_loaded().map(|loaded| &loaded.record)
    }

    fn try_loaded(&self) -> Result<&Loaded> {
        self.loaded.get_or_try_init(|| {
            let record = self.reader.read_node(self.id)?;
            let properties = record
                .properties
                .iter()
                .map(|p| self.to_property(p))
                .collect::<Result<Vec<_>>>()?;
            Ok(Loaded { record, properties })
        })
    }

    fn loaded(&self) -> &Loaded {
        match self.try_loaded() {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(target: "arbor::store", record = %self.id, error = %e, "Failed to read node record");
                &*UNREADABLE
            }
        }
    }

    fn to_property(&self, property: &PropertyRecord) -> Result<PropertyState> {
        let values = property
            .values
            .iter()
            .map(|v| self.to_value(v))
            .collect::<Result<Vec<Value>>>()?;
        let value = match (property.multi, values.len()) {
            (false, 1) => values
                .into_iter()
                .next()
                .map(PropertyValue::Single)
                .unwrap_or(PropertyValue::Multi(property.property_type, Vec::new())),
            _ => PropertyValue::Multi(property.property_type, values),
        };
        Ok(PropertyState::new(property.name.clone(), value))
    }

    fn to_value(&self, value: &ValueRecord) -> Result<Value> {
        Ok(match value {
            ValueRecord::Boolean(v) => Value::Boolean(*v),
            ValueRecord::Long(v) => Value::Long(*v),
            ValueRecord::Double(v) => Value::Double(*v),
            ValueRecord::String(v) => Value::String(v.clone()),
            ValueRecord::Binary(id, _) => {
                Value::Binary(Blob::stored(*id, self.reader.read_blob(*id)?))
            }
        })
    }

    fn child(&self, id: RecordId) -> NodeRef {
        Arc::new(SegmentNodeState::new(Arc::clone(&self.reader), id))
    }
}

impl NodeState for SegmentNodeState {
    fn exists(&self) -> bool {
        true
    }

    fn load(&self) -> Result<()> {
        self.try_loaded().map(|_| ())
    }

    fn property(&self, name: &str) -> Option<PropertyState> {
        self.loaded()
            .properties
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    fn properties(&self) -> Properties<'_> {
        Box::new(self.loaded().properties.iter().cloned())
    }

    fn has_property(&self, name: &str) -> bool {
        self.loaded().properties.iter().any(|p| p.name() == name)
    }

    fn property_count(&self) -> usize {
        self.loaded().properties.len()
    }

    fn has_child_node(&self, name: &str) -> bool {
        self.loaded().record.child_index(name).is_some()
    }

    fn child_node(&self, name: &str) -> NodeRef {
        let record = &self.loaded().record;
        match record.child_index(name) {
            Some(index) => self.child(record.children[index].1),
            None => missing_node(),
        }
    }

    fn child_node_names(&self) -> Vec<String> {
        self.loaded()
            .record
            .children
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn child_node_entries(&self) -> ChildNodeEntries<'_> {
        Box::new(
            self.loaded()
                .record
                .children
                .iter()
                .map(move |(name, id)| (name.clone(), self.child(*id))),
        )
    }

    fn child_node_count(&self) -> usize {
        self.loaded().record.children.len()
    }

    fn record_id(&self) -> Option<RecordId> {
        Some(self.id)
    }
}

impl fmt::Debug for SegmentNodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentNodeState")
            .field("id", &self.id)
            .finish()
    }
}
