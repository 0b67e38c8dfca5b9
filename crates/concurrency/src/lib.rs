//! Commit coordination for ArborDB
//!
//! This crate implements optimistic merging of commits:
//! - CommitInfo / CommitHook: commit metadata and the hook run before publication
//! - validate: conflict detection between a commit and the current head
//! - rebase: replaying a commit's changes onto a newer head

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit;
pub mod rebase;
pub mod validation;

pub use commit::{CommitHook, CommitInfo, CompositeHook, EmptyHook, EXTERNAL_SESSION};
pub use rebase::rebase;
pub use validation::{validate, Conflict, ConflictKind, ValidationResult};
