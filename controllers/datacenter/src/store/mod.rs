//! Resource store
//!
//! The operator's only view of the Kubernetes API. The reconcilers talk to a
//! [`ResourceStore`] so they can be driven against [`KubeStore`] in production
//! and against an in-memory store in tests.
//!
//! Every write is optimistic-concurrency checked: a status update carrying a
//! stale `metadata.resourceVersion` fails with [`ControllerError::Conflict`].

mod kubernetes;

pub use self::kubernetes::KubeStore;

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{ElassandraDatacenter, ElassandraTask, ZonePlacement};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::fmt;

/// Namespaced object name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object (`metadata.name`)
    pub name: String,
}

impl ObjectKey {
    /// Creates a key from a namespace and a name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced resource.
    pub fn of<K: kube::Resource>(resource: &K) -> Result<Self, ControllerError> {
        let namespace = resource.namespace().ok_or_else(|| {
            ControllerError::InvalidSpec(format!("{} is not namespaced", resource.name_any()))
        })?;
        Ok(Self::new(namespace, resource.name_any()))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kubernetes node with its zone label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// Value of the `topology.kubernetes.io/zone` label, if set
    pub zone: Option<String>,
}

/// Live state of a rack's workload set (a StatefulSet)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSet {
    /// StatefulSet name
    pub name: String,
    /// Index of the rack the workload set backs
    pub rack_index: i32,
    /// Zone the rack is pinned to
    pub zone: String,
    /// Desired replicas
    pub replicas: i32,
    /// Pods reporting ready
    pub ready_replicas: i32,
    /// False while a rolling update of the pods is in progress
    pub updated: bool,
    /// Configuration fingerprint the workload set was last applied with
    pub fingerprint: Option<String>,
}

impl WorkloadSet {
    /// Converged: every desired replica is ready and no rolling update is pending.
    pub fn is_ready(&self) -> bool {
        self.updated && self.replicas == self.ready_replicas
    }
}

/// Desired definition of a rack's workload set
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSetSpec {
    /// Workload set name
    pub name: String,
    /// Name of the owning ElassandraDatacenter resource
    pub datacenter: String,
    /// Index of the rack
    pub rack_index: i32,
    /// Zone the pods are pinned to through node affinity
    pub zone: String,
    /// Desired replicas
    pub replicas: i32,
    /// Configuration fingerprint, stored as an annotation
    pub fingerprint: String,
    /// Elassandra container image
    pub image: String,
    /// Required or preferred zone affinity
    pub placement: ZonePlacement,
    /// Headless service governing the pods
    pub service_name: String,
    /// Per-rack ConfigMap carrying the configuration and seeds
    pub config_map_name: String,
    /// Generated rack configuration
    pub config: BTreeMap<String, String>,
    /// Seed addresses, delivered beside the configuration
    pub seeds: Vec<String>,
    /// Remote seed discovery URLs
    pub seeders: Vec<String>,
    /// False while the datacenter joins an existing cluster through remote seeds
    pub auto_bootstrap: bool,
    /// Labels shared by the StatefulSet, its pods and the ConfigMap
    pub labels: BTreeMap<String, String>,
    /// Controller reference to the owning datacenter
    pub owner: Option<OwnerReference>,
    /// CPU request of the Elassandra container
    pub cpu: Option<String>,
    /// Memory request of the Elassandra container
    pub memory: Option<String>,
    /// Size of the data volume claim
    pub data_volume_size: Option<String>,
}

/// Access to the Kubernetes objects the operator reads and writes.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Reads a datacenter, `NotFound` when it does not exist.
    async fn read_datacenter(&self, key: &ObjectKey) -> Result<ElassandraDatacenter, ControllerError>;

    /// Replaces the status, failing with `Conflict` on a stale resource version.
    async fn update_datacenter_status(
        &self,
        dc: &ElassandraDatacenter,
    ) -> Result<ElassandraDatacenter, ControllerError>;

    /// Adds the operator's finalizer if missing.
    async fn add_finalizer(&self, key: &ObjectKey) -> Result<(), ControllerError>;

    /// Removes the operator's finalizer, letting a pending deletion complete.
    async fn remove_finalizer(&self, key: &ObjectKey) -> Result<(), ControllerError>;

    /// Lists the workload sets of `namespace` matching a `k=v,...` label selector.
    async fn list_workload_sets(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<WorkloadSet>, ControllerError>;

    /// Creates the workload set of a rack, or replaces its definition.
    async fn create_or_replace_workload_set(
        &self,
        namespace: &str,
        spec: &WorkloadSetSpec,
    ) -> Result<(), ControllerError>;

    /// Reads a task, `NotFound` when it does not exist.
    async fn read_task(&self, key: &ObjectKey) -> Result<ElassandraTask, ControllerError>;

    /// Replaces the status, failing with `Conflict` on a stale resource version.
    async fn update_task_status(&self, task: &ElassandraTask) -> Result<ElassandraTask, ControllerError>;

    /// Creates a task, `Conflict` when one with the same name exists.
    async fn create_task(&self, namespace: &str, task: &ElassandraTask) -> Result<(), ControllerError>;

    /// Lists the cluster's nodes with their zone label.
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ControllerError>;
}
