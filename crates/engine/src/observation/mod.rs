//! Observation pipeline
//!
//! Root transitions published by merges flow through the
//! [`ChangeDispatcher`] to observers. [`ObservationQueue`]s turn them into
//! filtered [`Event`]s for [`EventListener`]s.

pub mod dispatcher;
pub mod event;
pub mod filter;
pub mod generator;
pub mod queue;

pub use dispatcher::{BackgroundObserver, ChangeDispatcher, Observer, ObserverRegistration};
pub use event::{Event, EventType};
pub use filter::{EventFilter, FilterBuilder, Glob, PropertyCondition, PropertyPredicate, Selector};
pub use generator::EventGenerator;
pub use queue::{EventListener, ObservationQueue};
