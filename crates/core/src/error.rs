//! Error types for ArborDB
//!
//! Every crate in the workspace reports failures through [`Error`]. The
//! compactor keeps its own `CompactionError` (see `arbor-durability`) because
//! its failure modes are reported to monitors rather than callers.

use crate::types::{RecordId, SegmentId};
use std::io;
use thiserror::Error;

/// Result type alias for ArborDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the ArborDB storage engine
#[derive(Debug, Error)]
pub enum Error {
    /// Concurrent commits touched overlapping items
    #[error("Merge conflict at {path}: {reason}")]
    Conflict {
        /// Path of the first conflicting item
        path: String,
        /// Human readable description of the conflict
        reason: String,
    },

    /// A segment referenced by a record id is not present in any archive
    #[error("Segment not found: {0}")]
    SegmentNotFound(SegmentId),

    /// A record could not be decoded from its segment
    #[error("Invalid record {id}: {reason}")]
    InvalidRecord {
        /// Record that failed to decode
        id: RecordId,
        /// What went wrong
        reason: String,
    },

    /// Archive failed validation when it was opened or read
    #[error("Corrupt archive {name}: {reason}")]
    CorruptArchive {
        /// Archive file name
        name: String,
        /// What failed to validate
        reason: String,
    },

    /// Storage backend failure that is not a plain I/O error
    #[error("Storage error: {0}")]
    StorageIo(String),

    /// Operation not valid in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A commit hook rejected the commit
    #[error("Commit rejected by hook: {0}")]
    CommitHook(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a conflict error
    pub fn conflict(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Conflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::StorageIo(msg.into())
    }

    /// Create an invalid record error
    pub fn invalid_record(id: RecordId, reason: impl Into<String>) -> Self {
        Error::InvalidRecord {
            id,
            reason: reason.into(),
        }
    }

    /// Create a corrupt archive error
    pub fn corrupt_archive(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::CorruptArchive {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a merge conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if the operation may succeed when retried
    ///
    /// Only conflicts are retryable, and only after the caller rebased its
    /// builder onto the new head.
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }

    /// Check if this error indicates damaged on-disk data
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptArchive { .. } | Error::InvalidRecord { .. }
        )
    }
}
