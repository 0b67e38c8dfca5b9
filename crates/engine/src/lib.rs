//! Node store engine for ArborDB
//!
//! This crate ties the lower layers into a usable store:
//! - NodeStore: head management, optimistic merges, flush and close
//! - Checkpoints: expiring pins on past roots, kept below the super root
//! - Observation: dispatch of root transitions and filtered change events
//! - Background collection: periodic garbage collection passes
//! - InitialContentMigrator: one-time seeding of a store
//! - StoreConfig: `arbor.toml` configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

mod background;
pub mod checkpoint;
pub mod config;
pub mod migrate;
pub mod observation;
pub mod store;

pub use checkpoint::CheckpointInfo;
pub use config::{ConfigError, StoreConfig, CONFIG_FILE_NAME};
pub use migrate::InitialContentMigrator;
pub use observation::{
    BackgroundObserver, ChangeDispatcher, Event, EventFilter, EventGenerator, EventListener,
    EventType, FilterBuilder, Glob, ObservationQueue, Observer, ObserverRegistration,
    PropertyCondition, Selector,
};
pub use store::NodeStore;
