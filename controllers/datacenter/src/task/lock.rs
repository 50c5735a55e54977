//! Datacenter lock protocol
//!
//! A task holds its datacenter by recording its block reason and its own name
//! in the datacenter status. Both operations re-read the datacenter and write
//! the status back with the resource version they read, so a concurrent
//! writer surfaces as [`ControllerError::Conflict`] instead of being clobbered.

use crate::error::ControllerError;
use crate::store::{ObjectKey, ResourceStore};
use crds::BlockReason;
use tracing::{debug, info};

/// Outcome of a lock attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// The task holds the block
    Acquired,
    /// Another task holds the block
    Busy { holder: String },
}

/// Records `reason` and `task` in the datacenter's block.
///
/// Re-acquiring a block the task already holds succeeds without writing.
pub async fn acquire(
    store: &dyn ResourceStore,
    dc_key: &ObjectKey,
    task: &str,
    reason: BlockReason,
) -> Result<LockState, ControllerError> {
    let mut dc = store.read_datacenter(dc_key).await?;
    let mut status = dc.status.clone().unwrap_or_default();

    if status.block.is_locked() && status.current_task.as_deref() != Some(task) {
        let holder = status.current_task.clone().unwrap_or_else(|| {
            let reasons: Vec<String> = status.block.reasons.iter().map(ToString::to_string).collect();
            reasons.join(",")
        });
        debug!(datacenter = %dc_key, task = task, holder = %holder, "Block held by another task");
        return Ok(LockState::Busy { holder });
    }
    if status.block.holds(reason) {
        return Ok(LockState::Acquired);
    }
    if !status.block.try_acquire(reason) {
        return Ok(LockState::Busy {
            holder: status.current_task.clone().unwrap_or_default(),
        });
    }
    status.current_task = Some(task.to_string());
    dc.status = Some(status);
    store.update_datacenter_status(&dc).await?;
    info!(datacenter = %dc_key, task = task, reason = %reason, "Datacenter locked");
    Ok(LockState::Acquired)
}

/// Removes `reason` from the datacenter's block if `task` holds it.
///
/// Returns true if the status was written. A block held by another task is
/// left untouched.
pub async fn release(
    store: &dyn ResourceStore,
    dc_key: &ObjectKey,
    task: &str,
    reason: BlockReason,
) -> Result<bool, ControllerError> {
    let mut dc = store.read_datacenter(dc_key).await?;
    let mut status = dc.status.clone().unwrap_or_default();

    match status.current_task.as_deref() {
        Some(holder) if holder != task => return Ok(false),
        None if !status.block.holds(reason) => return Ok(false),
        _ => {}
    }

    let changed = status.block.release(reason) | status.current_task.take().is_some();
    if !changed {
        return Ok(false);
    }
    dc.status = Some(status);
    store.update_datacenter_status(&dc).await?;
    info!(datacenter = %dc_key, task = task, reason = %reason, "Datacenter unlocked");
    Ok(true)
}
