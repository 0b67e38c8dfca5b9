//! Garbage collection and compaction
//!
//! A collection pass reclaims segments no longer reachable from the head,
//! its checkpoints or (per cleanup strategy) from nodes still referenced in
//! memory. It runs as a state machine:
//!
//! ```text
//!        +--------> PAUSED
//!        |             |
//!      IDLE <----------+
//!        |
//!        v
//!     MARKING ---> COPYING ---> SWEEPING ---> IDLE
//!        |            |             |
//!        +------------+-------------+-----> ABORTED
//! ```
//!
//! # Compaction Modes
//!
//! - **Tail**: rewrites only the reachable records living in sparse
//!   archives, plus the records referencing them. Bumps `generation`.
//! - **Full**: rewrites every reachable record. Bumps `generation` and
//!   `full_generation`.
//!
//! A failed pass never affects the store: the head is only replaced by a
//! compacted head under the commit lock, and sweeping only drops segments
//! the new head cannot reach.

pub mod compactor;
pub mod gc;
pub mod mark;
pub mod monitor;
pub mod strategy;

pub use compactor::Compactor;
pub use gc::{GarbageCollector, Revisions};
pub use mark::{mark, tracked_roots, MarkResult};
pub use monitor::{GcMonitor, LoggingGcMonitor};
pub use strategy::{CleanupType, CompactionStrategy};

use std::fmt;

/// Compaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompactMode {
    /// Rewrite records of sparse archives only
    Tail,
    /// Rewrite every reachable record
    Full,
}

impl CompactMode {
    /// Name of this mode for logging
    pub fn name(&self) -> &'static str {
        match self {
            CompactMode::Tail => "tail",
            CompactMode::Full => "full",
        }
    }
}

impl fmt::Display for CompactMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Phase of the garbage collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcPhase {
    /// Not running
    Idle,
    /// Computing reachable records
    Marking,
    /// Rewriting reachable records into a new generation
    Copying,
    /// Dropping unreachable segments
    Sweeping,
    /// Disabled by the strategy
    Paused,
    /// Last pass failed
    Aborted,
}

impl GcPhase {
    /// True while a pass is in progress
    pub fn is_active(&self) -> bool {
        matches!(self, GcPhase::Marking | GcPhase::Copying | GcPhase::Sweeping)
    }

    /// Upper-case name of the phase
    pub fn name(&self) -> &'static str {
        match self {
            GcPhase::Idle => "IDLE",
            GcPhase::Marking => "MARKING",
            GcPhase::Copying => "COPYING",
            GcPhase::Sweeping => "SWEEPING",
            GcPhase::Paused => "PAUSED",
            GcPhase::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for GcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Summary of one collection pass
#[derive(Debug, Clone, Default)]
pub struct CompactInfo {
    /// Compaction mode used
    pub mode: Option<CompactMode>,
    /// Generation before the pass
    pub generation_before: arbor_core::GcGeneration,
    /// Generation of the compacted head, if a head was swapped in
    pub generation_after: Option<arbor_core::GcGeneration>,
    /// Records reachable when marking
    pub records_marked: usize,
    /// Node records rewritten
    pub nodes_copied: u64,
    /// Blob records rewritten
    pub blobs_copied: u64,
    /// Concurrent commits replayed onto the compacted head
    pub retries: u32,
    /// Segments dropped by the sweep
    pub segments_removed: usize,
    /// Archives rewritten by the sweep
    pub archives_rewritten: usize,
    /// Archives removed by the sweep
    pub archives_removed: usize,
    /// Retired archives whose deletion was postponed
    pub deferred: usize,
    /// Bytes reclaimed
    pub reclaimed_bytes: u64,
    /// Duration of the pass in milliseconds
    pub duration_ms: u64,
    /// Completion time in millis since epoch
    pub timestamp: u64,
}

impl CompactInfo {
    /// Empty summary for `mode`
    pub fn new(mode: CompactMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }

    /// True if the pass swapped in a compacted head
    pub fn did_compact(&self) -> bool {
        self.generation_after.is_some()
    }

    /// True if the pass reclaimed anything
    pub fn did_clean(&self) -> bool {
        self.segments_removed > 0
    }

    /// Summary line for logging
    pub fn summary(&self) -> String {
        format!(
            "mode={}, nodes_copied={}, blobs_copied={}, segments_removed={}, bytes_reclaimed={}, duration_ms={}",
            self.mode.map(|m| m.name()).unwrap_or("none"),
            self.nodes_copied,
            self.blobs_copied,
            self.segments_removed,
            self.reclaimed_bytes,
            self.duration_ms
        )
    }
}

/// Compaction error types
#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    /// Another pass is in progress
    #[error("Compaction already in progress")]
    AlreadyRunning,

    /// The strategy has collection paused
    #[error("Compaction is paused")]
    Paused,

    /// The pass was cancelled
    #[error("Compaction cancelled")]
    Cancelled,

    /// Concurrent commits kept moving the head
    #[error("Compaction gave up after {attempts} attempts to catch up with concurrent commits")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
    },

    /// Reading or writing the store failed
    #[error("Storage error: {0}")]
    Storage(#[from] arbor_core::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompactionError {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        CompactionError::Internal(msg.into())
    }
}

/// Result type alias for compaction
pub type Result<T> = std::result::Result<T, CompactionError>;
