//! Event listeners
//!
//! An [`ObservationQueue`] adapts an [`EventListener`] to the [`Observer`]
//! interface: every root transition it receives is turned into filtered
//! events by an [`EventGenerator`], and non-empty batches are handed to the
//! listener.

use super::dispatcher::Observer;
use super::event::Event;
use super::filter::EventFilter;
use super::generator::EventGenerator;
use arbor_concurrency::CommitInfo;
use arbor_core::NodeRef;
use std::sync::Arc;
use tracing::trace;

/// Receiver of event batches
pub trait EventListener: Send + Sync {
    /// Events of one transition, never empty
    fn on_events(&self, events: &[Event]);
}

/// Observer generating events for one listener
pub struct ObservationQueue {
    listener: Arc<dyn EventListener>,
    filter: EventFilter,
    identifier_property: String,
}

impl ObservationQueue {
    /// Queue delivering the events matching `filter` to `listener`
    pub fn new(
        listener: Arc<dyn EventListener>,
        filter: EventFilter,
        identifier_property: impl Into<String>,
    ) -> Self {
        Self {
            listener,
            filter,
            identifier_property: identifier_property.into(),
        }
    }

    /// Filter applied to transitions
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

impl Observer for ObservationQueue {
    fn content_changed(&self, before: &NodeRef, after: &NodeRef, info: &CommitInfo) {
        let events = EventGenerator::new(&self.filter, &self.identifier_property, info)
            .generate(before, after);
        if events.is_empty() {
            return;
        }
        trace!(target: "arbor::observation", count = events.len(), "Delivering events");
        self.listener.on_events(&events);
    }
}
