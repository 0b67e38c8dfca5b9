//! Change events

use arbor_concurrency::CommitInfo;
use arbor_core::PropertyValue;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A node was added
    NodeAdded,
    /// A node was removed
    NodeRemoved,
    /// A node was moved or reordered
    NodeMoved,
    /// A property was added
    PropertyAdded,
    /// A property value changed
    PropertyChanged,
    /// A property was removed
    PropertyRemoved,
}

impl EventType {
    /// Every event type
    pub const ALL: [EventType; 6] = [
        EventType::NodeAdded,
        EventType::NodeRemoved,
        EventType::NodeMoved,
        EventType::PropertyAdded,
        EventType::PropertyChanged,
        EventType::PropertyRemoved,
    ];

    /// Bit of this type in an event type mask
    pub const fn mask(self) -> u8 {
        match self {
            EventType::NodeAdded => 1,
            EventType::NodeRemoved => 1 << 1,
            EventType::NodeMoved => 1 << 2,
            EventType::PropertyAdded => 1 << 3,
            EventType::PropertyChanged => 1 << 4,
            EventType::PropertyRemoved => 1 << 5,
        }
    }

    /// Mask matching every event type
    pub const fn all_mask() -> u8 {
        0b11_1111
    }

    /// True for property events
    pub fn is_property_event(self) -> bool {
        matches!(
            self,
            EventType::PropertyAdded | EventType::PropertyChanged | EventType::PropertyRemoved
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::NodeAdded => "NODE_ADDED",
            EventType::NodeRemoved => "NODE_REMOVED",
            EventType::NodeMoved => "NODE_MOVED",
            EventType::PropertyAdded => "PROPERTY_ADDED",
            EventType::PropertyChanged => "PROPERTY_CHANGED",
            EventType::PropertyRemoved => "PROPERTY_REMOVED",
        };
        f.write_str(name)
    }
}

/// One change between two snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Kind of change
    pub event_type: EventType,
    /// Path of the node, or of the property for property events
    pub path: String,
    /// Property value before the change
    pub before: Option<PropertyValue>,
    /// Property value after the change
    pub after: Option<PropertyValue>,
    /// Previous path of a moved node
    pub source_path: Option<String>,
    /// Sibling a reordered node now precedes; `None` if it is last
    pub before_sibling: Option<String>,
    /// Identity of the node, if it carries one
    pub identifier: Option<String>,
    /// User of the commit
    pub user_id: Option<String>,
    /// User data of the commit
    pub user_data: BTreeMap<String, String>,
    /// Commit time in millis since epoch
    pub date: u64,
    /// True for collapsed or foreign transitions
    pub external: bool,
}

impl Event {
    pub(crate) fn new(event_type: EventType, path: String, info: &CommitInfo) -> Self {
        Self {
            event_type,
            path,
            before: None,
            after: None,
            source_path: None,
            before_sibling: None,
            identifier: None,
            user_id: info.user_id.clone(),
            user_data: info.info.clone(),
            date: info.date,
            external: info.external,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.event_type, self.path)?;
        if let Some(source) = &self.source_path {
            write!(f, " (from {})", source)?;
        }
        Ok(())
    }
}
