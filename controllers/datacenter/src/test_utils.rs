//! Test utilities for unit testing reconcilers
//!
//! In-memory fakes of the collaborators the reconcilers talk to, plus
//! fixtures for datacenters, tasks and workload sets.

use crate::backup_scheduler::BackupScheduler;
use crate::config::OperatorConfig;
use crate::context::Context;
use crate::error::ControllerError;
use crate::naming;
use crate::plugins::{Plugin, PluginRegistry};
use crate::session::SessionManager;
use crate::store::{NodeInfo, ObjectKey, ResourceStore, WorkloadSet, WorkloadSetSpec};
use async_trait::async_trait;
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sidecar_client::MockSidecarClient;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Helper to create a datacenter spec
pub fn test_spec(cluster: &str, dc: &str, replicas: i32) -> DatacenterSpec {
    serde_json::from_value(serde_json::json!({
        "clusterName": cluster,
        "datacenterName": dc,
        "replicas": replicas
    }))
    .unwrap()
}

/// Helper to create a datacenter `default/<name>` of cluster `cl1`
pub fn test_datacenter(name: &str, replicas: i32) -> ElassandraDatacenter {
    let mut dc = ElassandraDatacenter::new(name, test_spec("cl1", name, replicas));
    dc.metadata.namespace = Some("default".to_string());
    dc.metadata.generation = Some(1);
    dc
}

/// Bootstrapped datacenter `default/dc1` in `phase`, with a single rack in
/// `zone-a` whose `ready` pods are all up.
pub fn datacenter_with_rack(phase: DatacenterPhase, ready: i32) -> ElassandraDatacenter {
    let mut dc = test_datacenter("dc1", ready);
    let mut status = DatacenterStatus {
        phase,
        bootstrapped: true,
        replicas: ready,
        ready_replicas: ready,
        ..Default::default()
    };
    let index = status.assign_rack_index("zone-a");
    let mut rack = RackStatus::new("zone-a", index);
    rack.observe(ready, ready);
    status.rack_statuses.insert(index, rack);
    dc.status = Some(status);
    dc
}

/// Helper to create a task `default/<name>` against datacenter `dc`
pub fn test_task(name: &str, dc: &str, kind: TaskKind) -> ElassandraTask {
    ElassandraTask {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: TaskSpec {
            cluster: "cl1".to_string(),
            datacenter: dc.to_string(),
            kind,
        },
        status: None,
    }
}

/// `count` nodes labelled with `zone`
pub fn nodes_in(zone: &str, count: usize) -> Vec<NodeInfo> {
    (0..count)
        .map(|i| NodeInfo {
            name: format!("{zone}-node-{i}"),
            zone: Some(zone.to_string()),
        })
        .collect()
}

/// Live workload set of rack `index` of datacenter `cl1/dc1`
pub fn workload_set(zone: &str, index: i32, replicas: i32, ready: i32) -> WorkloadSet {
    WorkloadSet {
        name: format!("elassandra-cl1-dc1-{index}"),
        rack_index: index,
        zone: zone.to_string(),
        replicas,
        ready_replicas: ready,
        updated: true,
        fingerprint: None,
    }
}

/// Desired workload set of rack `index` of datacenter `cl1/dc1`
pub fn test_workload_set_spec(zone: &str, index: i32, replicas: i32) -> WorkloadSetSpec {
    let spec = test_spec("cl1", "dc1", 3);
    WorkloadSetSpec {
        name: naming::workload_set_name(&spec, index),
        datacenter: "dc1".to_string(),
        rack_index: index,
        zone: zone.to_string(),
        replicas,
        fingerprint: "abcd1234".to_string(),
        image: spec.image.clone(),
        placement: spec.placement,
        service_name: naming::service_name(&spec),
        config_map_name: naming::rack_config_name(&spec, index),
        config: BTreeMap::from([("CASSANDRA_RACK".to_string(), zone.to_string())]),
        seeds: Vec::new(),
        seeders: Vec::new(),
        auto_bootstrap: true,
        labels: naming::common_labels("dc1", &spec),
        owner: None,
        cpu: None,
        memory: None,
        data_volume_size: None,
    }
}

struct StoredSet {
    namespace: String,
    labels: BTreeMap<String, String>,
    set: WorkloadSet,
}

#[derive(Default)]
struct MemoryState {
    version: u64,
    datacenters: BTreeMap<ObjectKey, ElassandraDatacenter>,
    tasks: BTreeMap<ObjectKey, ElassandraTask>,
    sets: BTreeMap<String, StoredSet>,
    nodes: Vec<NodeInfo>,
    applied: Vec<WorkloadSetSpec>,
    status_writes: Vec<DatacenterStatus>,
    conflict_next: bool,
}

impl MemoryState {
    fn next_version(&mut self) -> Option<String> {
        self.version += 1;
        Some(self.version.to_string())
    }
}

/// In-memory [`ResourceStore`] with resource-version checks.
///
/// Workload sets behave like StatefulSets whose pods never start on their
/// own: tests mark them ready with [`MemoryStore::set_ready`] or
/// [`MemoryStore::mark_all_ready`]. Shrinking a set drops its ready count.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: Vec<NodeInfo>) -> Self {
        let store = Self::new();
        store.state.lock().unwrap().nodes = nodes;
        store
    }

    pub fn set_nodes(&self, nodes: Vec<NodeInfo>) {
        self.state.lock().unwrap().nodes = nodes;
    }

    pub fn insert_datacenter(&self, mut dc: ElassandraDatacenter) {
        let mut state = self.state.lock().unwrap();
        dc.metadata.resource_version = state.next_version();
        let key = ObjectKey::of(&dc).unwrap();
        state.datacenters.insert(key, dc);
    }

    /// Current datacenter, panics if absent
    pub fn datacenter(&self, key: &ObjectKey) -> ElassandraDatacenter {
        self.state.lock().unwrap().datacenters[key].clone()
    }

    pub fn has_datacenter(&self, key: &ObjectKey) -> bool {
        self.state.lock().unwrap().datacenters.contains_key(key)
    }

    /// Mutates a stored datacenter the way another writer would.
    pub fn edit_datacenter(&self, key: &ObjectKey, edit: impl FnOnce(&mut ElassandraDatacenter)) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let dc = state.datacenters.get_mut(key).unwrap();
        edit(dc);
        dc.metadata.resource_version = version;
    }

    /// Makes the next datacenter status write fail as if another writer won.
    pub fn conflict_next_status_write(&self) {
        self.state.lock().unwrap().conflict_next = true;
    }

    pub fn insert_task(&self, mut task: ElassandraTask) {
        let mut state = self.state.lock().unwrap();
        task.metadata.resource_version = state.next_version();
        let key = ObjectKey::of(&task).unwrap();
        state.tasks.insert(key, task);
    }

    /// Current task, panics if absent
    pub fn task(&self, key: &ObjectKey) -> ElassandraTask {
        self.state.lock().unwrap().tasks[key].clone()
    }

    pub fn tasks(&self) -> Vec<ElassandraTask> {
        self.state.lock().unwrap().tasks.values().cloned().collect()
    }

    pub fn workload_sets(&self) -> Vec<WorkloadSet> {
        self.state.lock().unwrap().sets.values().map(|s| s.set.clone()).collect()
    }

    /// Places an existing rack of `dc` in `zone`, applied with the current
    /// configuration of `dc` and `ready` pods up.
    pub fn insert_rack(&self, dc: &ElassandraDatacenter, zone: &str, index: i32, replicas: i32, ready: i32) {
        let namespace = dc.metadata.namespace.clone().unwrap_or_default();
        let name = naming::workload_set_name(&dc.spec, index);
        let set = WorkloadSet {
            name: name.clone(),
            rack_index: index,
            zone: zone.to_string(),
            replicas,
            ready_replicas: ready,
            updated: true,
            fingerprint: Some(crate::datacenter::config::fingerprint(&dc.spec).unwrap()),
        };
        let labels = naming::common_labels(dc.metadata.name.as_deref().unwrap_or_default(), &dc.spec);
        self.state.lock().unwrap().sets.insert(
            name,
            StoredSet {
                namespace,
                labels,
                set,
            },
        );
    }

    /// Reports `ready` pods on the workload set `name` and completes its rollout.
    pub fn set_ready(&self, name: &str, ready: i32) {
        let mut state = self.state.lock().unwrap();
        let stored = state.sets.get_mut(name).unwrap();
        stored.set.ready_replicas = ready;
        stored.set.updated = true;
    }

    /// Every workload set reaches its desired replica count.
    pub fn mark_all_ready(&self) {
        let mut state = self.state.lock().unwrap();
        for stored in state.sets.values_mut() {
            stored.set.ready_replicas = stored.set.replicas;
            stored.set.updated = true;
        }
    }

    /// Every workload set definition written so far, in order
    pub fn applied_specs(&self) -> Vec<WorkloadSetSpec> {
        self.state.lock().unwrap().applied.clone()
    }

    /// Every datacenter status written so far, in order
    pub fn status_writes(&self) -> Vec<DatacenterStatus> {
        self.state.lock().unwrap().status_writes.clone()
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|pair| !pair.is_empty())
        .all(|pair| match pair.split_once('=') {
            Some((k, v)) => labels.get(k).is_some_and(|l| l == v),
            None => labels.contains_key(pair),
        })
}

fn stale(expected: Option<&String>, actual: Option<&String>) -> bool {
    expected != actual
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn read_datacenter(&self, key: &ObjectKey) -> Result<ElassandraDatacenter, ControllerError> {
        self.state
            .lock()
            .unwrap()
            .datacenters
            .get(key)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))
    }

    async fn update_datacenter_status(
        &self,
        dc: &ElassandraDatacenter,
    ) -> Result<ElassandraDatacenter, ControllerError> {
        let key = ObjectKey::of(dc)?;
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.conflict_next) {
            return Err(ControllerError::Conflict(format!("{key} was modified")));
        }
        let version = state.next_version();
        let stored = state
            .datacenters
            .get_mut(&key)
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))?;
        if stale(dc.metadata.resource_version.as_ref(), stored.metadata.resource_version.as_ref()) {
            return Err(ControllerError::Conflict(format!("{key} has a newer version")));
        }
        stored.status.clone_from(&dc.status);
        stored.metadata.resource_version = version;
        let updated = stored.clone();
        state.status_writes.push(dc.status.clone().unwrap_or_default());
        Ok(updated)
    }

    async fn add_finalizer(&self, key: &ObjectKey) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let dc = state
            .datacenters
            .get_mut(key)
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))?;
        dc.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(naming::FINALIZER.to_string());
        dc.metadata.resource_version = version;
        Ok(())
    }

    async fn remove_finalizer(&self, key: &ObjectKey) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let dc = state
            .datacenters
            .get_mut(key)
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))?;
        if let Some(finalizers) = dc.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != naming::FINALIZER);
        }
        dc.metadata.resource_version = version;
        let gone = dc.metadata.deletion_timestamp.is_some()
            && dc.metadata.finalizers.as_ref().is_none_or(Vec::is_empty);
        if gone {
            state.datacenters.remove(key);
        }
        Ok(())
    }

    async fn list_workload_sets(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<WorkloadSet>, ControllerError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .sets
            .values()
            .filter(|s| s.namespace == namespace && matches_selector(&s.labels, selector))
            .map(|s| s.set.clone())
            .collect())
    }

    async fn create_or_replace_workload_set(
        &self,
        namespace: &str,
        spec: &WorkloadSetSpec,
    ) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        state.applied.push(spec.clone());
        let fingerprint = Some(spec.fingerprint.clone());
        match state.sets.get_mut(&spec.name) {
            Some(stored) => {
                let set = &mut stored.set;
                if set.fingerprint != fingerprint {
                    set.updated = false;
                }
                set.replicas = spec.replicas;
                set.ready_replicas = set.ready_replicas.min(spec.replicas);
                set.fingerprint = fingerprint;
                stored.labels.clone_from(&spec.labels);
            }
            None => {
                let set = WorkloadSet {
                    name: spec.name.clone(),
                    rack_index: spec.rack_index,
                    zone: spec.zone.clone(),
                    replicas: spec.replicas,
                    ready_replicas: 0,
                    updated: true,
                    fingerprint,
                };
                state.sets.insert(
                    spec.name.clone(),
                    StoredSet {
                        namespace: namespace.to_string(),
                        labels: spec.labels.clone(),
                        set,
                    },
                );
            }
        }
        Ok(())
    }

    async fn read_task(&self, key: &ObjectKey) -> Result<ElassandraTask, ControllerError> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .get(key)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))
    }

    async fn update_task_status(&self, task: &ElassandraTask) -> Result<ElassandraTask, ControllerError> {
        let key = ObjectKey::of(task)?;
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let stored = state
            .tasks
            .get_mut(&key)
            .ok_or_else(|| ControllerError::NotFound(key.to_string()))?;
        if stale(task.metadata.resource_version.as_ref(), stored.metadata.resource_version.as_ref()) {
            return Err(ControllerError::Conflict(format!("{key} has a newer version")));
        }
        stored.status.clone_from(&task.status);
        stored.metadata.resource_version = version;
        Ok(stored.clone())
    }

    async fn create_task(&self, namespace: &str, task: &ElassandraTask) -> Result<(), ControllerError> {
        let mut task = task.clone();
        task.metadata.namespace = Some(namespace.to_string());
        let key = ObjectKey::of(&task)?;
        let mut state = self.state.lock().unwrap();
        if state.tasks.contains_key(&key) {
            return Err(ControllerError::Conflict(format!("{key} already exists")));
        }
        task.metadata.resource_version = state.next_version();
        state.tasks.insert(key, task);
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ControllerError> {
        Ok(self.state.lock().unwrap().nodes.clone())
    }
}

/// Session manager recording every call as a short line, e.g. `decrease_rf 1`
#[derive(Debug, Clone, Default)]
pub struct RecordingSessionManager {
    calls: Arc<Mutex<Vec<String>>>,
    failing: bool,
}

impl RecordingSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails after being recorded
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), ControllerError> {
        self.calls.lock().unwrap().push(call.clone());
        if self.failing {
            Err(ControllerError::Session(format!("{call} refused")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionManager for RecordingSessionManager {
    async fn reconcile_keyspaces(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
        let size = dc.status.as_ref().map_or(0, |s| s.ready_replicas);
        self.record(format!("reconcile_keyspaces {size}"))
    }

    async fn reconcile_roles(&self, _dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
        self.record("reconcile_roles".to_string())
    }

    async fn update_keyspace_replication_map(
        &self,
        _dc: &ElassandraDatacenter,
        target_dc: &str,
        keyspace: &str,
        rf: i32,
    ) -> Result<(), ControllerError> {
        self.record(format!("update_replication {target_dc} {keyspace} {rf}"))
    }

    async fn remove_dc_from_replication_map(
        &self,
        _dc: &ElassandraDatacenter,
        target_dc: &str,
    ) -> Result<(), ControllerError> {
        self.record(format!("remove_dc {target_dc}"))
    }

    async fn decrease_rf_before_scaling_down(
        &self,
        _dc: &ElassandraDatacenter,
        new_size: i32,
    ) -> Result<(), ControllerError> {
        self.record(format!("decrease_rf {new_size}"))
    }
}

/// Plugin recording `register <name>` / `unregister <name>`
#[derive(Debug)]
pub struct RecordingPlugin {
    name: &'static str,
    enabled: bool,
    failing: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingPlugin {
    pub fn new(name: &'static str, enabled: bool) -> Self {
        Self {
            name,
            enabled,
            failing: false,
            calls: Arc::default(),
        }
    }

    /// Enabled plugin whose registration always fails
    pub fn failing(name: &'static str) -> Self {
        Self {
            failing: true,
            ..Self::new(name, true)
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: String) -> Result<(), ControllerError> {
        self.calls.lock().unwrap().push(call.clone());
        if self.failing {
            Err(ControllerError::Plugin(call))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &'static str {
        self.name
    }

    fn enabled(&self, _dc: &ElassandraDatacenter) -> bool {
        self.enabled
    }

    async fn register(&self, _dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
        self.record(format!("register {}", self.name))
    }

    async fn unregister(&self, _dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
        self.record(format!("unregister {}", self.name))
    }
}

/// Backup scheduler recording `schedule <dc>` / `cancel <ns/dc>`
#[derive(Debug, Clone, Default)]
pub struct RecordingBackups {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingBackups {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl BackupScheduler for RecordingBackups {
    fn schedule_backups(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("schedule {}", dc.metadata.name.as_deref().unwrap_or_default()));
        Ok(())
    }

    fn cancel_backups(&self, key: &ObjectKey) {
        self.calls.lock().unwrap().push(format!("cancel {key}"));
    }
}

/// Fakes wired into a [`Context`], kept around for assertions.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub sidecar: MockSidecarClient,
    pub session: RecordingSessionManager,
    pub backups: RecordingBackups,
    pub ctx: Arc<Context>,
}

/// Operator settings without delays
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        task_node_spacing: Duration::ZERO,
        decommission_retry_delay: Duration::ZERO,
        ..OperatorConfig::default()
    }
}

/// Harness over `store` with no plugins
pub fn harness(store: MemoryStore) -> Harness {
    harness_with(store, RecordingSessionManager::new(), PluginRegistry::new())
}

pub fn harness_with(store: MemoryStore, session: RecordingSessionManager, plugins: PluginRegistry) -> Harness {
    let store = Arc::new(store);
    let sidecar = MockSidecarClient::new();
    let backups = RecordingBackups::default();
    let ctx = Arc::new(Context::new(
        Arc::clone(&store) as Arc<dyn ResourceStore>,
        Arc::new(sidecar.clone()),
        Arc::new(session.clone()),
        plugins,
        Arc::new(backups.clone()),
        test_config(),
    ));
    Harness {
        store,
        sidecar,
        session,
        backups,
        ctx,
    }
}
