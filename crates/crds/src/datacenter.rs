//! ElassandraDatacenter CRD
//!
//! Desired state of one datacenter of an Elassandra cluster (Cassandra with an
//! embedded Elasticsearch), and the observed status owned by the operator.

use crate::block::Block;
use crate::rack::RackStatus;
use crate::task::BackupTaskSpec;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "elassandra.strapdata.com",
    version = "v1beta1",
    kind = "ElassandraDatacenter",
    shortname = "edc",
    namespaced,
    derive = "PartialEq",
    status = "DatacenterStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterSpec {
    /// Cassandra cluster name
    pub cluster_name: String,

    /// Cassandra datacenter name
    pub datacenter_name: String,

    /// Desired number of Elassandra nodes, must be > 0
    pub replicas: i32,

    /// Scale every rack down to zero while keeping racks and volumes
    #[serde(default)]
    pub parked: bool,

    /// Elassandra container image
    #[serde(default = "default_image")]
    pub image: String,

    /// How pods are pinned to zones
    #[serde(default)]
    pub placement: ZonePlacement,

    /// Security toggles
    #[serde(default)]
    pub security: SecuritySpec,

    /// Embedded search engine toggles
    #[serde(default)]
    pub elasticsearch: ElasticsearchSpec,

    /// Cassandra Reaper registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaper: Option<ReaperSpec>,

    /// Resource requests of the Elassandra container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,

    /// Size of the per-node data volume claim (e.g. "100Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_volume_size: Option<String>,

    /// Seed addresses of an existing cluster to join
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_seeds: Vec<String>,

    /// Seed discovery URLs of an existing cluster to join
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_seeders: Vec<String>,

    /// cassandra.yaml overrides, merged into the generated rack configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_config: BTreeMap<String, String>,

    /// Extra JVM options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jvm_options: Vec<String>,

    /// Keyspaces whose replication map is managed by the operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_keyspaces: Vec<ManagedKeyspace>,

    /// Roles managed by the operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_roles: Vec<ManagedRole>,

    /// Periodic backups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scheduled_backups: Vec<ScheduledBackup>,
}

fn default_image() -> String {
    "strapdata/elassandra-node:6.8.4".to_string()
}

/// Pod placement policy across zones
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ZonePlacement {
    /// At most one Elassandra pod per Kubernetes node, so zone capacity is the node count
    #[default]
    Strict,
    /// Several pods may share a node, zone capacity is not enforced
    Preferred,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    /// Client and internode TLS
    #[serde(default)]
    pub ssl: bool,

    /// Password authentication
    #[serde(default)]
    pub authentication: bool,

    /// Encryption of data at rest
    #[serde(default)]
    pub encryption: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    /// Start Elassandra with the search engine enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Enterprise features (JMX, HTTPS, search-guard)
    #[serde(default)]
    pub enterprise: bool,
}

impl Default for ElasticsearchSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            enterprise: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReaperSpec {
    /// Register the cluster in Cassandra Reaper once the datacenter is ready
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedKeyspace {
    /// Keyspace name
    pub keyspace: String,

    /// Target replication factor in this datacenter, capped by the datacenter size
    pub rf: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedRole {
    pub username: String,

    /// Secret holding the role password
    pub secret_name: String,

    #[serde(default)]
    pub superuser: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBackup {
    /// Schedule name, used as prefix of generated task names
    pub name: String,

    /// Cron expression (5 or 6 fields)
    pub cron: String,

    /// Backup parameters of each generated task
    pub backup: BackupTaskSpec,
}

/// Datacenter lifecycle phase
///
/// `Running` and `Parked` are rest states, every other phase is re-evaluated on the next pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum DatacenterPhase {
    #[default]
    Creating,
    Running,
    Updating,
    ScalingUp,
    ScalingDown,
    Parked,
    Error,
}

impl DatacenterPhase {
    /// Phases in which maintenance tasks may start
    pub fn accepts_tasks(self) -> bool {
        matches!(
            self,
            DatacenterPhase::Creating
                | DatacenterPhase::ScalingUp
                | DatacenterPhase::ScalingDown
                | DatacenterPhase::Running
        )
    }

    /// Rest states
    pub fn is_stable(self) -> bool {
        matches!(self, DatacenterPhase::Running | DatacenterPhase::Parked)
    }
}

impl std::fmt::Display for DatacenterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DatacenterPhase::Creating => "Creating",
            DatacenterPhase::Running => "Running",
            DatacenterPhase::Updating => "Updating",
            DatacenterPhase::ScalingUp => "ScalingUp",
            DatacenterPhase::ScalingDown => "ScalingDown",
            DatacenterPhase::Parked => "Parked",
            DatacenterPhase::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Observed state of a datacenter, written only by the operator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterStatus {
    #[serde(default)]
    pub phase: DatacenterPhase,

    /// Generation of the spec last acted upon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Rack statuses keyed by rack index
    #[serde(default)]
    pub rack_statuses: BTreeMap<i32, RackStatus>,

    /// Zone names in rack index order
    #[serde(default)]
    pub zones: Vec<String>,

    /// Sum of rack desired replicas
    #[serde(default)]
    pub replicas: i32,

    /// Sum of rack ready replicas
    #[serde(default)]
    pub ready_replicas: i32,

    /// True once at least one node has ever joined
    #[serde(default)]
    pub bootstrapped: bool,

    /// Name of the task holding the block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,

    #[serde(default)]
    pub block: Block,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<DateTime<Utc>>,

    /// Fingerprint of the spec and configuration currently being rolled out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_fingerprint: Option<String>,

    /// Fingerprint of the last configuration every rack was ready with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_good_fingerprint: Option<String>,

    /// Datacenter size the managed keyspaces were last reconciled for
    #[serde(default)]
    pub keyspace_manager_replicas: i32,

    /// Seed addresses handed to the racks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seeds: Vec<String>,

    /// Plugins that completed their registration
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub registered_plugins: BTreeSet<String>,
}

impl DatacenterStatus {
    /// Rack index assigned to `zone`, if the zone was ever used.
    pub fn rack_index(&self, zone: &str) -> Option<i32> {
        self.zones
            .iter()
            .position(|z| z == zone)
            .and_then(|p| i32::try_from(p).ok())
    }

    /// Returns the rack index of `zone`, appending the zone to the ordered list on first use.
    pub fn assign_rack_index(&mut self, zone: &str) -> i32 {
        if let Some(index) = self.rack_index(zone) {
            return index;
        }
        self.zones.push(zone.to_string());
        i32::try_from(self.zones.len() - 1).unwrap_or(i32::MAX)
    }

    /// Records a failed pass.
    pub fn record_error(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        self.phase = DatacenterPhase::Error;
        self.last_error = Some(message.into());
        self.last_error_time = Some(at);
    }
}
