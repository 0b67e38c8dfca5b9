//! Checkpoints
//!
//! A checkpoint pins the root of the store at the time it was created. It
//! lives below the `checkpoints` child of the super root:
//!
//! ```text
//! /checkpoints/<token>
//!     timestamp = expiry (millis since epoch)
//!     created   = creation time (millis since epoch)
//!     info/     = one string property per info entry
//!     root/     = the pinned tree
//! ```
//!
//! Being part of the super root, checkpointed trees are reachable for the
//! garbage collector until the checkpoint is released or purged. Expired
//! checkpoints are purged lazily, when a checkpoint is created and before a
//! collection pass.

use crate::store::{NodeStore, CHECKPOINTS, ROOT};
use arbor_core::{now_millis, NodeBuilder, NodeRef, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

const TIMESTAMP: &str = "timestamp";
const CREATED: &str = "created";
const INFO: &str = "info";

/// Description of one checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Token returned by [`NodeStore::checkpoint`]
    pub token: String,
    /// Creation time in millis since epoch
    pub created: u64,
    /// Expiry time in millis since epoch
    pub expires: u64,
    /// Info map passed at creation
    pub info: BTreeMap<String, String>,
}

impl CheckpointInfo {
    fn read(token: &str, node: &NodeRef) -> Self {
        let millis = |name: &str| {
            node.property(name)
                .and_then(|p| p.as_long())
                .map(|v| v.max(0) as u64)
                .unwrap_or(0)
        };
        let info = node
            .child_node(INFO)
            .properties()
            .into_iter()
            .filter_map(|p| p.as_str().map(|v| (p.name().to_string(), v.to_string())))
            .collect();
        Self {
            token: token.to_string(),
            created: millis(CREATED),
            expires: millis(TIMESTAMP),
            info,
        }
    }

    /// True if the checkpoint expired at `now`
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires <= now
    }

    /// Creation time
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        to_datetime(self.created)
    }

    /// Expiry time; `None` beyond the representable range
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        to_datetime(self.expires)
    }
}

fn to_datetime(millis: u64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(i64::try_from(millis).ok()?).single()
}

impl fmt::Display for CheckpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)?;
        if let Some(created) = self.created_at() {
            write!(f, " created {}", created.to_rfc3339())?;
        }
        match self.expires_at() {
            Some(expires) if self.expires < i64::MAX as u64 => {
                write!(f, ", expires {}", expires.to_rfc3339())
            }
            _ => write!(f, ", never expires"),
        }
    }
}

/// Remove the expired checkpoints below `checkpoints`
fn purge(checkpoints: &NodeBuilder, now: u64) -> usize {
    let mut purged = 0;
    for token in checkpoints.child_node_names() {
        let Some(checkpoint) = checkpoints.get_child(&token) else {
            continue;
        };
        let info = CheckpointInfo::read(&token, &checkpoint.node_state());
        if info.is_expired(now) && checkpoint.remove() {
            purged += 1;
        }
    }
    purged
}

impl NodeStore {
    fn checkpoint_nodes(&self) -> Vec<(String, NodeRef)> {
        let checkpoints = self.super_root().child_node(CHECKPOINTS);
        let entries = checkpoints.child_node_entries().collect();
        entries
    }

    fn live_checkpoints(&self) -> impl Iterator<Item = (CheckpointInfo, NodeRef)> {
        let now = now_millis();
        self.checkpoint_nodes()
            .into_iter()
            .map(|(token, node)| (CheckpointInfo::read(&token, &node), node))
            .filter(move |(info, _)| !info.is_expired(now))
    }

    /// Pin the current root for `lifetime_ms` milliseconds
    ///
    /// Returns the token identifying the checkpoint. Lifetimes saturate: a
    /// lifetime of `u64::MAX` never expires.
    pub fn checkpoint(&self, lifetime_ms: u64, info: BTreeMap<String, String>) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        let now = now_millis();
        let expires = now.saturating_add(lifetime_ms).min(i64::MAX as u64);

        let purged = self.update_super_root(|super_root| {
            let root = super_root.base_state().child_node(ROOT);
            let checkpoints = super_root.child(CHECKPOINTS);
            let purged = purge(&checkpoints, now);

            let checkpoint = checkpoints.child(&token);
            checkpoint.set_property(TIMESTAMP, expires as i64);
            checkpoint.set_property(CREATED, now as i64);
            let info_node = checkpoint.child(INFO);
            for (key, value) in &info {
                info_node.set_property(key, value.as_str());
            }
            checkpoint.set_child_node(ROOT, root);
            Ok(purged)
        })?;

        info!(
            target: "arbor::checkpoint",
            token = %token,
            lifetime_ms,
            purged,
            "Checkpoint created"
        );
        Ok(token)
    }

    /// Root pinned by `token`; `None` if unknown or expired
    pub fn retrieve(&self, token: &str) -> Option<NodeRef> {
        let node = self.super_root().child_node(CHECKPOINTS).child_node(token);
        if !node.exists() || CheckpointInfo::read(token, &node).is_expired(now_millis()) {
            return None;
        }
        Some(node.child_node(ROOT))
    }

    /// Release a checkpoint
    ///
    /// Returns false if there is no checkpoint for `token`.
    pub fn release(&self, token: &str) -> Result<bool> {
        let released = self.update_super_root(|super_root| {
            Ok(super_root
                .child(CHECKPOINTS)
                .get_child(token)
                .map(|checkpoint| checkpoint.remove())
                .unwrap_or(false))
        })?;
        debug!(target: "arbor::checkpoint", token, released, "Checkpoint release");
        Ok(released)
    }

    /// Info map of an unexpired checkpoint
    pub fn checkpoint_info(&self, token: &str) -> Option<BTreeMap<String, String>> {
        self.live_checkpoints()
            .find(|(info, _)| info.token == token)
            .map(|(info, _)| info.info)
    }

    /// Tokens of all unexpired checkpoints
    pub fn checkpoints(&self) -> Vec<String> {
        self.live_checkpoints().map(|(info, _)| info.token).collect()
    }

    /// All unexpired checkpoints
    pub fn list_checkpoints(&self) -> Vec<CheckpointInfo> {
        self.live_checkpoints().map(|(info, _)| info).collect()
    }

    /// Creation time of the oldest unexpired checkpoint, 0 if there is none
    pub fn oldest_checkpoint_creation_timestamp(&self) -> u64 {
        self.live_checkpoints()
            .map(|(info, _)| info.created)
            .min()
            .unwrap_or(0)
    }

    /// Remove expired checkpoints; returns how many were removed
    pub fn purge_expired_checkpoints(&self) -> Result<usize> {
        let now = now_millis();
        let any_expired = self
            .checkpoint_nodes()
            .iter()
            .any(|(token, node)| CheckpointInfo::read(token, node).is_expired(now));
        if !any_expired {
            return Ok(0);
        }
        let purged = self.update_super_root(|super_root| Ok(purge(&super_root.child(CHECKPOINTS), now)))?;
        info!(target: "arbor::checkpoint", purged, "Purged expired checkpoints");
        Ok(purged)
    }
}
