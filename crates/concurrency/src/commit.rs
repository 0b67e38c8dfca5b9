//! Commit metadata and commit hooks

use arbor_core::{now_millis, NodeRef, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Session id used for commits that did not originate in this process
pub const EXTERNAL_SESSION: &str = "external";

/// Metadata attached to a commit and handed to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Session that committed
    pub session_id: String,
    /// User that committed, if known
    pub user_id: Option<String>,
    /// Commit time in millis since epoch
    pub date: u64,
    /// Free-form user data
    pub info: BTreeMap<String, String>,
    /// True for changes not made through this store instance, and for
    /// transitions collapsed from several commits
    pub external: bool,
}

impl CommitInfo {
    /// Commit info of `session_id` dated now
    pub fn new(session_id: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            date: now_millis(),
            info: BTreeMap::new(),
            external: false,
        }
    }

    /// Commit info carrying no session or user
    pub fn empty() -> Self {
        Self::new("", None)
    }

    /// Commit info marking an external or collapsed transition
    pub fn external() -> Self {
        Self {
            external: true,
            ..Self::new(EXTERNAL_SESSION, None)
        }
    }

    /// Attach a user data entry
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }
}

impl Default for CommitInfo {
    fn default() -> Self {
        Self::empty()
    }
}

/// Hook run inside the exclusive section of a merge
///
/// A hook sees the head the commit is based on and the candidate snapshot,
/// and returns the snapshot to publish. Returning an error rejects the
/// commit.
pub trait CommitHook: Send + Sync {
    /// Validate or transform `after`
    fn process_commit(&self, before: &NodeRef, after: &NodeRef, info: &CommitInfo) -> Result<NodeRef>;
}

/// Hook accepting every commit unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyHook;

impl CommitHook for EmptyHook {
    fn process_commit(&self, _before: &NodeRef, after: &NodeRef, _info: &CommitInfo) -> Result<NodeRef> {
        Ok(after.clone())
    }
}

/// Hooks run in sequence, each seeing the output of the previous one
#[derive(Default, Clone)]
pub struct CompositeHook {
    hooks: Vec<Arc<dyn CommitHook>>,
}

impl CompositeHook {
    /// Compose `hooks`
    pub fn new(hooks: Vec<Arc<dyn CommitHook>>) -> Self {
        Self { hooks }
    }

    /// Append a hook
    pub fn with(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Number of composed hooks
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// True if no hook is composed
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl CommitHook for CompositeHook {
    fn process_commit(&self, before: &NodeRef, after: &NodeRef, info: &CommitInfo) -> Result<NodeRef> {
        let mut current = after.clone();
        for hook in &self.hooks {
            current = hook.process_commit(before, &current, info)?;
        }
        Ok(current)
    }
}
