//! Segment stores
//!
//! A [`SegmentStore`] persists sealed segments and the journal of head
//! record ids. Two implementations exist:
//! - [`MemoryStore`]: everything in memory, for tests and ephemeral use
//! - [`FileStore`]: segments appended to tar archives in a directory

pub mod file;
pub mod journal;
pub mod memory;

use crate::archive::ArchiveEntry;
use crate::segment::Segment;
use arbor_core::{GcGeneration, RecordId, Result, SegmentId};
use rustc_hash::FxHashSet;
use std::sync::Arc;

pub use file::{FileStore, FileStoreOptions};
pub use journal::Journal;
pub use memory::MemoryStore;

/// Contents of one archive, as seen by the garbage collector
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    /// Archive name
    pub name: String,
    /// Entries in archive order
    pub entries: Vec<ArchiveEntry>,
    /// Size on disk in bytes
    pub size: u64,
    /// False for the archive currently being appended to
    pub closed: bool,
}

/// Outcome of a sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepInfo {
    /// Archives rewritten without their unreachable segments
    pub archives_rewritten: usize,
    /// Archives dropped because nothing in them was reachable
    pub archives_removed: usize,
    /// Segments no longer readable from the store
    pub segments_removed: usize,
    /// Bytes of segment data reclaimed
    pub reclaimed_bytes: u64,
    /// Retired archive files whose deletion had to be postponed
    pub deferred: usize,
}

/// Storage backend for segments
pub trait SegmentStore: Send + Sync {
    /// True if the segment is readable from this store
    fn contains_segment(&self, id: &SegmentId) -> bool;

    /// Read a segment
    ///
    /// Returns `Error::SegmentNotFound` if no archive holds it.
    fn read_segment(&self, id: &SegmentId) -> Result<Arc<Segment>>;

    /// Persist a sealed segment
    fn write_segment(&self, segment: Segment) -> Result<()>;

    /// Ids of every stored segment
    fn segment_ids(&self) -> Vec<SegmentId>;

    /// Archives and their entries, oldest first
    fn archives(&self) -> Vec<ArchiveSummary>;

    /// Drop every segment not in `live`
    ///
    /// Retired archive files are deleted right away unless `defer_deletion`
    /// is set or a reader still holds them.
    fn sweep(&self, live: &FxHashSet<SegmentId>, defer_deletion: bool) -> Result<SweepInfo>;

    /// Last persisted head whose record is readable
    fn journal_head(&self) -> Result<Option<RecordId>>;

    /// Record a new head
    fn set_journal_head(&self, head: RecordId) -> Result<()>;

    /// Highest generation of any stored segment
    fn max_generation(&self) -> GcGeneration;

    /// Make everything written so far durable
    fn flush(&self) -> Result<()>;

    /// Flush and release resources; further writes fail
    fn close(&self) -> Result<()>;
}

pub(crate) fn newer_generation(a: GcGeneration, b: GcGeneration) -> GcGeneration {
    if (b.generation, b.full_generation) > (a.generation, a.full_generation) {
        b
    } else {
        a
    }
}
