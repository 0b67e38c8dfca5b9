//! Replaying a commit onto a newer head

use crate::validation::validate;
use arbor_core::{path, same_state, try_compare, ApplyDiff, Error, NodeRef, NodeStateExt, Result};

/// Replay the changes `base -> ours` onto `head`
///
/// Returns `ours` unchanged if the head did not move. Fails with
/// `Error::Conflict` naming the first conflicting item if both sides touched
/// the same item incompatibly, and with the storage error if a node the
/// replay needs cannot be read.
pub fn rebase(base: &NodeRef, ours: &NodeRef, head: &NodeRef) -> Result<NodeRef> {
    if same_state(base, head) {
        return Ok(ours.clone());
    }
    let validation = validate(base, ours, head)?;
    if let Some(first) = validation.conflicts.first() {
        tracing::debug!(
            target: "arbor::store",
            conflicts = validation.conflict_count(),
            path = %first.path,
            "Rebase failed"
        );
        let reason = if validation.conflict_count() > 1 {
            format!(
                "{} (and {} more)",
                first.kind.description(),
                validation.conflict_count() - 1
            )
        } else {
            first.kind.description().to_string()
        };
        return Err(Error::conflict(first.path.clone(), reason));
    }

    let mut apply = ApplyDiff::new(head.builder());
    try_compare(path::ROOT, base, ours, &mut apply)?;
    apply.builder().try_node_state()
}
