//! Garbage collector

use super::{
    mark, tracked_roots, CompactInfo, CompactMode, CompactionError, CompactionStrategy, Compactor,
    GcMonitor, GcPhase, MarkResult, Result,
};
use arbor_core::{
    now_millis, path, try_compare, ApplyDiff, GcGeneration, NodeStateExt, RecordId, SegmentId,
};
use arbor_storage::{ArchiveSummary, SegmentReader, SegmentWriter, SweepInfo, WriterOptions};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Access to the head revision of a store
///
/// Implemented by the node store; the collector never publishes a head
/// except through [`swap_head`](Revisions::swap_head).
pub trait Revisions: Send + Sync {
    /// Record id of the current head
    fn head(&self) -> arbor_core::Result<RecordId>;

    /// Replace the head with commits blocked
    ///
    /// `update` receives the current head and returns its replacement, or
    /// `None` if the head moved since the replacement was computed. On
    /// success the store's writer continues in `generation`.
    fn swap_head(
        &self,
        generation: GcGeneration,
        update: &mut dyn FnMut(RecordId) -> Result<Option<RecordId>>,
    ) -> Result<bool>;

    /// Run `f` with everything written so far flushed and commits blocked
    fn locked(&self, f: &mut dyn FnMut() -> Result<SweepInfo>) -> Result<SweepInfo>;
}

/// Runs collection passes over a segment store
pub struct GarbageCollector {
    reader: Arc<SegmentReader>,
    strategy: RwLock<CompactionStrategy>,
    monitor: Arc<dyn GcMonitor>,
    max_segment_size: usize,
    phase: Mutex<GcPhase>,
    cancelled: AtomicBool,
    last: Mutex<Option<CompactInfo>>,
}

impl GarbageCollector {
    /// Create a collector
    pub fn new(
        reader: Arc<SegmentReader>,
        strategy: CompactionStrategy,
        monitor: Arc<dyn GcMonitor>,
        max_segment_size: usize,
    ) -> Self {
        let phase = if strategy.paused {
            GcPhase::Paused
        } else {
            GcPhase::Idle
        };
        Self {
            reader,
            strategy: RwLock::new(strategy),
            monitor,
            max_segment_size,
            phase: Mutex::new(phase),
            cancelled: AtomicBool::new(false),
            last: Mutex::new(None),
        }
    }

    /// Current phase
    pub fn phase(&self) -> GcPhase {
        *self.phase.lock()
    }

    /// Current strategy
    pub fn strategy(&self) -> CompactionStrategy {
        self.strategy.read().clone()
    }

    /// Replace the strategy; takes effect with the next pass
    pub fn set_strategy(&self, strategy: CompactionStrategy) {
        let paused = strategy.paused;
        *self.strategy.write() = strategy;
        let mut phase = self.phase.lock();
        if !phase.is_active() {
            *phase = if paused { GcPhase::Paused } else { GcPhase::Idle };
        }
    }

    /// Ask a running pass to stop
    ///
    /// The pass ends in ABORTED at its next cancellation point. Nothing is
    /// swapped in or swept after that.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Summary of the last successful pass
    pub fn last_compaction(&self) -> Option<CompactInfo> {
        self.last.lock().clone()
    }

    /// Run one collection pass
    pub fn run(&self, mode: CompactMode, revisions: &dyn Revisions) -> Result<CompactInfo> {
        let strategy = self.strategy();
        {
            let mut phase = self.phase.lock();
            if phase.is_active() {
                return Err(CompactionError::AlreadyRunning);
            }
            if strategy.paused {
                *phase = GcPhase::Paused;
                return Err(CompactionError::Paused);
            }
            *phase = GcPhase::Marking;
        }
        self.cancelled.store(false, Ordering::Release);

        let start = Instant::now();
        let mut info = CompactInfo::new(mode);
        tracing::info!(target: "arbor::compaction", mode = %mode, "Collection pass started");

        match self.run_phases(mode, &strategy, revisions, &mut info) {
            Ok(()) => {
                info.duration_ms = start.elapsed().as_millis() as u64;
                info.timestamp = now_millis();
                self.monitor.info(&format!("Collection pass completed: {}", info.summary()));
                *self.last.lock() = Some(info.clone());
                *self.phase.lock() = GcPhase::Idle;
                Ok(info)
            }
            Err(e) => {
                let failed_in = self.phase();
                self.monitor
                    .error(&format!("Collection pass failed: {}", e), failed_in);
                *self.phase.lock() = GcPhase::Aborted;
                Err(e)
            }
        }
    }

    fn set_phase(&self, phase: GcPhase) {
        tracing::debug!(target: "arbor::compaction", phase = %phase, "Phase change");
        *self.phase.lock() = phase;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CompactionError::Cancelled);
        }
        Ok(())
    }

    fn roots(&self, head: RecordId, strategy: &CompactionStrategy) -> Vec<RecordId> {
        let mut roots = vec![head];
        roots.extend(tracked_roots(&self.reader, strategy));
        roots
    }

    fn run_phases(
        &self,
        mode: CompactMode,
        strategy: &CompactionStrategy,
        revisions: &dyn Revisions,
        info: &mut CompactInfo,
    ) -> Result<()> {
        let store = self.reader.store().clone();
        info.generation_before = store.max_generation();

        let head = revisions.head()?;
        let cancelled = || self.is_cancelled();
        let marked = mark(&self.reader, &self.roots(head, strategy), &cancelled)?;
        info.records_marked = marked.records;

        let victims = match mode {
            CompactMode::Full => None,
            CompactMode::Tail => Some(select_victims(
                &store.archives(),
                &marked,
                strategy.compaction_threshold,
            )),
        };
        match victims {
            Some(ref victims) if victims.is_empty() => {
                self.monitor.info("No sparse archives, skipping compaction");
            }
            _ => {
                self.check_cancelled()?;
                self.set_phase(GcPhase::Copying);
                self.copy(mode, victims, strategy, revisions, head, info)?;
            }
        }

        self.check_cancelled()?;
        self.set_phase(GcPhase::Sweeping);
        let sweep = revisions.locked(&mut || {
            let head = revisions.head()?;
            let live = mark(&self.reader, &self.roots(head, strategy), &|| false)?;
            Ok(store.sweep(&live.live, false)?)
        })?;
        info.segments_removed = sweep.segments_removed;
        info.archives_rewritten = sweep.archives_rewritten;
        info.archives_removed = sweep.archives_removed;
        info.deferred = sweep.deferred;
        info.reclaimed_bytes = sweep.reclaimed_bytes;
        self.monitor.cleaned(info);
        Ok(())
    }

    fn copy(
        &self,
        mode: CompactMode,
        victims: Option<FxHashSet<SegmentId>>,
        strategy: &CompactionStrategy,
        revisions: &dyn Revisions,
        head: RecordId,
        info: &mut CompactInfo,
    ) -> Result<()> {
        let generation = match mode {
            CompactMode::Tail => info.generation_before.next_tail(),
            CompactMode::Full => info.generation_before.next_full(),
        };
        let writer = SegmentWriter::new(
            self.reader.store().clone(),
            WriterOptions {
                max_segment_size: self.max_segment_size,
                generation,
                ..WriterOptions::default()
            },
        );
        let mut compactor = match victims {
            Some(victims) => {
                Compactor::tail(self.reader.clone(), writer, victims, strategy.clone_binaries)
            }
            None => Compactor::full(self.reader.clone(), writer),
        };

        let cancelled = || self.is_cancelled();
        let mut base = head;
        let mut compacted = compactor.compact(head, &cancelled)?;
        compactor.flush()?;

        let mut attempts = 0;
        loop {
            self.check_cancelled()?;
            let expected = base;
            let candidate = compacted;
            let swapped = revisions.swap_head(generation, &mut |current| {
                Ok((current == expected).then_some(candidate))
            })?;
            if swapped {
                break;
            }

            attempts += 1;
            if attempts > strategy.retry_count {
                return Err(CompactionError::RetriesExhausted { attempts });
            }
            self.monitor.info(&format!(
                "Head moved during compaction, catching up (attempt {}/{})",
                attempts, strategy.retry_count
            ));

            let current = revisions.head()?;
            let before = self.reader.node_state(base);
            let after = self.reader.node_state(current);
            let mut replay = ApplyDiff::new(self.reader.node_state(compacted).builder());
            try_compare(path::ROOT, &before, &after, &mut replay)?;
            let replayed = compactor.writer().write_node(&replay.builder().try_node_state()?)?;
            compactor.flush()?;
            compacted = compactor.compact(replayed, &cancelled)?;
            compactor.flush()?;
            base = current;
        }

        info.retries = attempts;
        info.generation_after = Some(generation);
        info.nodes_copied = compactor.nodes_copied();
        info.blobs_copied = compactor.blobs_copied();
        self.monitor.compacted(info);
        Ok(())
    }
}

/// Segments of closed archives whose live ratio is below `threshold`
fn select_victims(
    archives: &[ArchiveSummary],
    marked: &MarkResult,
    threshold: f64,
) -> FxHashSet<SegmentId> {
    let mut victims = FxHashSet::default();
    for archive in archives.iter().filter(|a| a.closed) {
        let total: u64 = archive.entries.iter().map(|e| e.length as u64).sum();
        if total == 0 {
            continue;
        }
        let live: u64 = archive
            .entries
            .iter()
            .map(|e| marked.live_bytes_of(&SegmentId::new(e.msb, e.lsb)))
            .sum();
        let ratio = live as f64 / total as f64;
        if ratio < threshold {
            tracing::debug!(target: "arbor::compaction", archive = %archive.name, ratio, "Archive selected for compaction");
            victims.extend(archive.entries.iter().map(|e| SegmentId::new(e.msb, e.lsb)));
        }
    }
    victims
}
