//! Reconciliation block record
//!
//! A `Block` is persisted in the datacenter status and records which maintenance
//! task type currently holds exclusive rights to mutate the cluster.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Reason recorded while a maintenance task holds the datacenter lock.
///
/// One variant per task type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum BlockReason {
    Cleanup,
    Repair,
    Backup,
    Decommission,
    Rebuild,
    Replication,
    RemoveNodes,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlockReason::Cleanup => "Cleanup",
            BlockReason::Repair => "Repair",
            BlockReason::Backup => "Backup",
            BlockReason::Decommission => "Decommission",
            BlockReason::Rebuild => "Rebuild",
            BlockReason::Replication => "Replication",
            BlockReason::RemoveNodes => "RemoveNodes",
        };
        f.write_str(s)
    }
}

/// Mutual-exclusion record between datacenter reconciliation and tasks.
///
/// `locked` is true iff `reasons` is non-empty. Fields are only changed through
/// [`Block::try_acquire`] and [`Block::release`], which keep that invariant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Active block reasons
    #[serde(default)]
    pub reasons: BTreeSet<BlockReason>,

    /// True while any reason is active
    #[serde(default)]
    pub locked: bool,
}

impl Block {
    /// Returns true if any task holds the block.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Returns true if `reason` is currently recorded.
    pub fn holds(&self, reason: BlockReason) -> bool {
        self.reasons.contains(&reason)
    }

    /// Records `reason`, unless another reason already holds the block.
    ///
    /// Re-acquiring the reason that already holds the block succeeds, so a
    /// resumed task can call this again. Returns false when the block is held
    /// for a different reason.
    pub fn try_acquire(&mut self, reason: BlockReason) -> bool {
        if self.reasons.iter().any(|r| *r != reason) {
            return false;
        }
        self.reasons.insert(reason);
        self.locked = true;
        true
    }

    /// Removes `reason`. Clears `locked` only once no reason remains.
    ///
    /// Returns true if the record changed.
    pub fn release(&mut self, reason: BlockReason) -> bool {
        let removed = self.reasons.remove(&reason);
        let locked = !self.reasons.is_empty();
        let changed = removed || locked != self.locked;
        self.locked = locked;
        changed
    }
}
