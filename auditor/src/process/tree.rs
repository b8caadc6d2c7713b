//! Parent-chain walking over a captured snapshot.

use super::facts::{Snapshot, INIT_PID};
use crate::error::{Error, Result};
use crate::rules::NameSet;
use std::collections::HashSet;

/// Check whether any ancestor of `pid` has a name in `ignored`.
///
/// The walk stops at init (PID 1) or at a PPID of 0, which is what init and
/// kernel threads report. The process's own name is not considered here.
///
/// Fails with [`Error::ProcessNotInSnapshot`] if `pid` or any ancestor is
/// missing, which happens when a process exits while the snapshot is taken.
pub fn has_ignored_ancestor(pid: u32, ignored: &NameSet, snapshot: &Snapshot) -> Result<bool> {
    let mut current = snapshot.get(pid).ok_or(Error::ProcessNotInSnapshot(pid))?;
    let mut visited = HashSet::new();

    while current.pid != INIT_PID && current.ppid != 0 && visited.insert(current.pid) {
        let parent = snapshot
            .get(current.ppid)
            .ok_or(Error::ProcessNotInSnapshot(current.ppid))?;

        if ignored.contains(&parent.name) {
            tracing::trace!(
                "pid {} has ignored ancestor {} ({})",
                pid,
                parent.pid,
                parent.name
            );
            return Ok(true);
        }

        current = parent;
    }

    Ok(false)
}
