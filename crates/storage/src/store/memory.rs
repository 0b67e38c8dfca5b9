//! In-memory segment store

use super::{newer_generation, ArchiveSummary, SegmentStore, SweepInfo};
use crate::archive::ArchiveEntry;
use crate::segment::Segment;
use arbor_core::{Error, GcGeneration, RecordId, Result, SegmentId};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Segment store keeping everything in memory
///
/// All segments form one virtual archive named `memory`.
pub struct MemoryStore {
    segments: DashMap<SegmentId, Arc<Segment>>,
    /// Write order, for a stable archive listing
    order: Mutex<Vec<SegmentId>>,
    head: RwLock<Option<RecordId>>,
    generation: Mutex<GcGeneration>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            segments: DashMap::new(),
            order: Mutex::new(Vec::new()),
            head: RwLock::new(None),
            generation: Mutex::new(GcGeneration::INITIAL),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of stored segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentStore for MemoryStore {
    fn contains_segment(&self, id: &SegmentId) -> bool {
        self.segments.contains_key(id)
    }

    fn read_segment(&self, id: &SegmentId) -> Result<Arc<Segment>> {
        self.segments
            .get(id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(Error::SegmentNotFound(*id))
    }

    fn write_segment(&self, segment: Segment) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidOperation("store is closed".into()));
        }
        {
            let mut generation = self.generation.lock();
            *generation = newer_generation(*generation, segment.generation());
        }
        let id = segment.id();
        if self.segments.insert(id, Arc::new(segment)).is_none() {
            self.order.lock().push(id);
        }
        Ok(())
    }

    fn segment_ids(&self) -> Vec<SegmentId> {
        self.order.lock().clone()
    }

    fn archives(&self) -> Vec<ArchiveSummary> {
        let order = self.order.lock();
        let entries: Vec<ArchiveEntry> = order
            .iter()
            .filter_map(|id| self.segments.get(id))
            .map(|s| ArchiveEntry::for_segment(s.value()))
            .collect();
        let size = entries.iter().map(|e| e.length as u64).sum();
        vec![ArchiveSummary {
            name: "memory".to_string(),
            entries,
            size,
            closed: true,
        }]
    }

    fn sweep(&self, live: &FxHashSet<SegmentId>, _defer_deletion: bool) -> Result<SweepInfo> {
        let mut info = SweepInfo::default();
        let mut order = self.order.lock();
        order.retain(|id| {
            if live.contains(id) {
                return true;
            }
            if let Some((_, segment)) = self.segments.remove(id) {
                info.segments_removed += 1;
                info.reclaimed_bytes += segment.len() as u64;
            }
            false
        });
        if info.segments_removed > 0 {
            info.archives_rewritten = 1;
        }
        Ok(info)
    }

    fn journal_head(&self) -> Result<Option<RecordId>> {
        Ok(*self.head.read())
    }

    fn set_journal_head(&self, head: RecordId) -> Result<()> {
        *self.head.write() = Some(head);
        Ok(())
    }

    fn max_generation(&self) -> GcGeneration {
        *self.generation.lock()
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
