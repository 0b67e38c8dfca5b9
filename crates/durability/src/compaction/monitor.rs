//! Progress notifications of the garbage collector

use super::{CompactInfo, GcPhase};

/// Receives notifications from collection passes
///
/// Implementations must not block; they are called from the collector's
/// thread, sometimes while the commit lock is held.
pub trait GcMonitor: Send + Sync {
    /// Informational message
    fn info(&self, message: &str);

    /// Something went wrong but the pass continues
    fn warn(&self, message: &str);

    /// The pass failed
    fn error(&self, message: &str, phase: GcPhase);

    /// A compacted head was swapped in
    fn compacted(&self, info: &CompactInfo);

    /// A sweep finished
    fn cleaned(&self, info: &CompactInfo);
}

/// Monitor writing every notification to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingGcMonitor;

impl GcMonitor for LoggingGcMonitor {
    fn info(&self, message: &str) {
        tracing::info!(target: "arbor::compaction", "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "arbor::compaction", "{}", message);
    }

    fn error(&self, message: &str, phase: GcPhase) {
        tracing::error!(target: "arbor::compaction", phase = %phase, "{}", message);
    }

    fn compacted(&self, info: &CompactInfo) {
        tracing::info!(
            target: "arbor::compaction",
            generation = ?info.generation_after,
            nodes = info.nodes_copied,
            blobs = info.blobs_copied,
            retries = info.retries,
            "Compacted head swapped in"
        );
    }

    fn cleaned(&self, info: &CompactInfo) {
        tracing::info!(
            target: "arbor::compaction",
            segments = info.segments_removed,
            archives_rewritten = info.archives_rewritten,
            archives_removed = info.archives_removed,
            deferred = info.deferred,
            reclaimed_bytes = info.reclaimed_bytes,
            "Cleanup completed"
        );
    }
}
