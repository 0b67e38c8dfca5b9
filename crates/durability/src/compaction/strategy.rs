//! Collection strategy

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which in-memory references keep their segments alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanupType {
    /// Only the head and its checkpoints are roots
    CleanAll,
    /// Segments referenced in memory are roots if first referenced less
    /// than `older_than` ago
    CleanOld,
    /// Every segment referenced in memory is a root
    CleanNone,
}

impl CleanupType {
    /// Constant-style name
    pub fn name(&self) -> &'static str {
        match self {
            CleanupType::CleanAll => "CLEAN_ALL",
            CleanupType::CleanOld => "CLEAN_OLD",
            CleanupType::CleanNone => "CLEAN_NONE",
        }
    }
}

/// Tuning of the garbage collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionStrategy {
    /// Skip collection entirely
    pub paused: bool,
    /// Copy binaries into the compacted generation even in tail mode
    pub clone_binaries: bool,
    /// Root selection for in-memory references
    pub cleanup: CleanupType,
    /// Age threshold of `CleanupType::CleanOld`, in milliseconds
    #[serde(rename = "cleanup_older_than_ms")]
    pub older_than_ms: u64,
    /// Archives with a live ratio below this are compacted in tail mode
    pub compaction_threshold: f64,
    /// Attempts to catch up with concurrent commits before giving up
    pub retry_count: u32,
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        Self {
            paused: false,
            clone_binaries: false,
            cleanup: CleanupType::CleanOld,
            older_than_ms: 60 * 60 * 1000,
            compaction_threshold: 0.75,
            retry_count: 5,
        }
    }
}

impl CompactionStrategy {
    /// Strategy with the given cleanup type
    pub fn with_cleanup(mut self, cleanup: CleanupType, older_than: Duration) -> Self {
        self.cleanup = cleanup;
        self.older_than_ms = older_than.as_millis() as u64;
        self
    }

    /// Strategy with collection paused or resumed
    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    /// Strategy copying binaries in tail mode
    pub fn with_clone_binaries(mut self, clone_binaries: bool) -> Self {
        self.clone_binaries = clone_binaries;
        self
    }

    /// Strategy with a different live ratio threshold
    pub fn with_compaction_threshold(mut self, threshold: f64) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Strategy with a different retry count
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Age threshold of `CleanupType::CleanOld`
    pub fn older_than(&self) -> Duration {
        Duration::from_millis(self.older_than_ms)
    }

    /// True if a segment first referenced at `first_seen` must be kept
    pub fn retains_tracked(&self, first_seen: u64, now: u64) -> bool {
        match self.cleanup {
            CleanupType::CleanAll => false,
            CleanupType::CleanNone => true,
            CleanupType::CleanOld => now.saturating_sub(first_seen) < self.older_than_ms,
        }
    }
}
