//! Segment storage for ArborDB
//!
//! This crate persists snapshots as records:
//! - Segment: immutable block of node and blob records
//! - SegmentWriter: bottom-up serialization with record deduplication
//! - SegmentReader / SegmentNodeState: lazy, segment-backed snapshot nodes
//! - Archive: tar container of segments closed with a checksummed index
//! - SegmentStore: in-memory and tar-archive backed stores
//! - SegmentTracker: weak registry of segments referenced from memory

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod reader;
pub mod record;
pub mod record_cache;
pub mod segment;
pub mod segment_node;
pub mod store;
pub mod tracker;
pub mod writer;

pub use archive::{ArchiveEntry, ArchiveReader, ArchiveWriter};
pub use reader::SegmentReader;
pub use record::{NodeRecord, PropertyRecord, Reference, ValueRecord};
pub use record_cache::{CacheStats, LruMap, RecordCache, RecordCacheFactory};
pub use segment::{RecordType, Segment, SegmentBuffer};
pub use segment_node::SegmentNodeState;
pub use store::{
    ArchiveSummary, FileStore, FileStoreOptions, Journal, MemoryStore, SegmentStore, SweepInfo,
};
pub use tracker::{SegmentHandle, SegmentTracker};
pub use writer::{SegmentWriter, WriterOptions, WriterStats, DEFAULT_MAX_SEGMENT_SIZE};
