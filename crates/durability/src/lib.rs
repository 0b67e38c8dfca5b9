//! Garbage collection for ArborDB
//!
//! This crate reclaims space in segment stores:
//! - Marking: reachability from the head, its checkpoints and tracked nodes
//! - Compactor: copies reachable records into a new generation
//! - GarbageCollector: MARKING, COPYING and SWEEPING passes with retries
//!   against concurrent commits
//! - CompactionStrategy: CLEAN_ALL / CLEAN_OLD / CLEAN_NONE root selection

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compaction;

pub use compaction::{
    CleanupType, CompactInfo, CompactMode, CompactionError, CompactionStrategy, Compactor,
    GarbageCollector, GcMonitor, GcPhase, LoggingGcMonitor, MarkResult, Revisions,
};
