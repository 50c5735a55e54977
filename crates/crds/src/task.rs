//! ElassandraTask CRD
//!
//! A maintenance operation run against one datacenter. Exactly one operation
//! sub-spec is present, modelled as the [`TaskKind`] sum type.

use crate::block::BlockReason;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "elassandra.strapdata.com",
    version = "v1beta1",
    kind = "ElassandraTask",
    shortname = "etask",
    namespaced,
    status = "TaskStatus",
    printcolumn = r#"{"name":"Datacenter","type":"string","jsonPath":".spec.datacenter"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Cassandra cluster name
    pub cluster: String,

    /// Name of the ElassandraDatacenter resource (same namespace)
    pub datacenter: String,

    /// The operation to run
    #[serde(flatten)]
    pub kind: TaskKind,
}

/// Maintenance operations. Serialized as a single camelCase key, e.g. `repair: {keyspace: ks}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    Cleanup(CleanupTaskSpec),
    Repair(RepairTaskSpec),
    Backup(BackupTaskSpec),
    Decommission(DecommissionTaskSpec),
    Rebuild(RebuildTaskSpec),
    Replication(ReplicationTaskSpec),
    RemoveNodes(RemoveNodesTaskSpec),
}

impl TaskKind {
    /// Block reason recorded while a task of this kind holds the lock.
    pub fn block_reason(&self) -> BlockReason {
        match self {
            TaskKind::Cleanup(_) => BlockReason::Cleanup,
            TaskKind::Repair(_) => BlockReason::Repair,
            TaskKind::Backup(_) => BlockReason::Backup,
            TaskKind::Decommission(_) => BlockReason::Decommission,
            TaskKind::Rebuild(_) => BlockReason::Rebuild,
            TaskKind::Replication(_) => BlockReason::Replication,
            TaskKind::RemoveNodes(_) => BlockReason::RemoveNodes,
        }
    }

    /// Short operation name used in logs and generated resource names.
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Cleanup(_) => "cleanup",
            TaskKind::Repair(_) => "repair",
            TaskKind::Backup(_) => "backup",
            TaskKind::Decommission(_) => "decommission",
            TaskKind::Rebuild(_) => "rebuild",
            TaskKind::Replication(_) => "replication",
            TaskKind::RemoveNodes(_) => "remove-nodes",
        }
    }

    /// Kinds whose completion changes state the datacenter reconciliation depends on.
    pub fn retriggers_datacenter(&self) -> bool {
        matches!(
            self,
            TaskKind::Decommission(_) | TaskKind::Replication(_) | TaskKind::RemoveNodes(_)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CleanupTaskSpec {
    /// Keyspace to clean up, all keyspaces when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepairTaskSpec {
    /// Keyspace to repair, all keyspaces when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackupTaskSpec {
    /// Target repository (e.g. "s3://bucket/prefix")
    pub repository: String,

    /// Snapshot tag, defaults to the task name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_tag: Option<String>,

    /// Keyspaces to back up, all keyspaces when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyspaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DecommissionTaskSpec {
    /// Remove the datacenter from the managed keyspaces' replication maps first
    #[serde(default = "default_true")]
    pub remove_from_replication: bool,
}

impl Default for DecommissionTaskSpec {
    fn default() -> Self {
        Self {
            remove_from_replication: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RebuildTaskSpec {
    /// Datacenter to stream data from
    pub src_dc_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ReplicationAction {
    #[default]
    Add,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationTaskSpec {
    pub action: ReplicationAction,

    /// Datacenter added to or removed from the replication maps
    pub dc_name: String,

    /// Replication factor per keyspace in `dc_name` (Add only)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub replication_map: BTreeMap<String, i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoveNodesTaskSpec {
    /// Datacenter whose dead nodes are removed from the ring
    pub dc_name: String,
}

/// Task lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum TaskPhase {
    #[default]
    Waiting,
    Running,
    Succeed,
    Failed,
    /// Invalid submission, never executed
    Ignored,
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Succeed | TaskPhase::Failed | TaskPhase::Ignored)
    }

    /// Waiting or Running
    pub fn is_pending(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskPhase::Waiting => "Waiting",
            TaskPhase::Running => "Running",
            TaskPhase::Succeed => "Succeed",
            TaskPhase::Failed => "Failed",
            TaskPhase::Ignored => "Ignored",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default)]
    pub phase: TaskPhase,

    /// Phase per target pod
    #[serde(default)]
    pub pods: BTreeMap<String, TaskPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskStatus {
    /// True when the task reached a terminal phase, or is Running with every pod entry settled.
    pub fn is_finished(&self) -> bool {
        match self.phase {
            TaskPhase::Running => {
                !self.pods.is_empty() && self.pods.values().all(|p| p.is_terminal())
            }
            phase => phase.is_terminal(),
        }
    }

    /// Pods still waiting to be processed
    pub fn waiting_pods(&self) -> Vec<String> {
        self.pods
            .iter()
            .filter(|(_, phase)| phase.is_pending())
            .map(|(pod, _)| pod.clone())
            .collect()
    }

    /// Failed if any pod failed, Succeed otherwise
    pub fn aggregate_phase(&self) -> TaskPhase {
        if self.pods.values().any(|p| *p == TaskPhase::Failed) {
            TaskPhase::Failed
        } else {
            TaskPhase::Succeed
        }
    }
}
