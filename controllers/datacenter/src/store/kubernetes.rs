//! Kubernetes-backed [`ResourceStore`].
//!
//! Child resources (headless Service, rack ConfigMap, rack StatefulSet) are
//! written with server-side apply under the operator's field manager. Custom
//! resource statuses are replaced whole, carrying `metadata.resourceVersion`,
//! so a concurrent writer makes the API server answer 409.

use super::{NodeInfo, ObjectKey, ResourceStore, WorkloadSet, WorkloadSetSpec};
use crate::error::ControllerError;
use crate::naming;
use async_trait::async_trait;
use crds::{ElassandraDatacenter, ElassandraTask, ZonePlacement};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Service};
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

const FIELD_MANAGER: &str = "elassandra-operator";

/// Maps API status codes onto the store's error contract.
fn map_kube_error(error: kube::Error, what: &str) -> ControllerError {
    match error {
        kube::Error::Api(ae) if ae.code == 409 => {
            ControllerError::Conflict(format!("{what}: {}", ae.message))
        }
        kube::Error::Api(ae) if ae.code == 404 => {
            ControllerError::NotFound(format!("{what}: {}", ae.message))
        }
        other => ControllerError::Kube(other),
    }
}

/// Resource store talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn datacenters(&self, namespace: &str) -> Api<ElassandraDatacenter> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn tasks(&self, namespace: &str) -> Api<ElassandraTask> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn apply<K>(&self, namespace: &str, name: &str, object: &K) -> Result<(), ControllerError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + serde::Serialize
            + serde::de::DeserializeOwned,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let pp = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(name, &pp, &Patch::Apply(object))
            .await
            .map_err(|e| map_kube_error(e, name))?;
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn read_datacenter(&self, key: &ObjectKey) -> Result<ElassandraDatacenter, ControllerError> {
        self.datacenters(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| map_kube_error(e, &key.to_string()))
    }

    async fn update_datacenter_status(
        &self,
        dc: &ElassandraDatacenter,
    ) -> Result<ElassandraDatacenter, ControllerError> {
        let key = ObjectKey::of(dc)?;
        let data = serde_json::to_vec(dc)?;
        self.datacenters(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), data)
            .await
            .map_err(|e| map_kube_error(e, &key.to_string()))
    }

    async fn add_finalizer(&self, key: &ObjectKey) -> Result<(), ControllerError> {
        let dc = self.read_datacenter(key).await?;
        if dc.finalizers().iter().any(|f| f == naming::FINALIZER) {
            return Ok(());
        }
        let mut finalizers = dc.finalizers().to_vec();
        finalizers.push(naming::FINALIZER.to_string());
        let patch = json!({
            "metadata": {
                "resourceVersion": dc.resource_version(),
                "finalizers": finalizers,
            }
        });
        self.datacenters(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, &key.to_string()))?;
        Ok(())
    }

    async fn remove_finalizer(&self, key: &ObjectKey) -> Result<(), ControllerError> {
        let dc = self.read_datacenter(key).await?;
        let finalizers: Vec<String> = dc
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != naming::FINALIZER)
            .cloned()
            .collect();
        if finalizers.len() == dc.finalizers().len() {
            return Ok(());
        }
        let patch = json!({
            "metadata": {
                "resourceVersion": dc.resource_version(),
                "finalizers": finalizers,
            }
        });
        self.datacenters(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, &key.to_string()))?;
        Ok(())
    }

    async fn list_workload_sets(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<WorkloadSet>, ControllerError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| map_kube_error(e, selector))?;
        Ok(list.items.iter().filter_map(to_workload_set).collect())
    }

    async fn create_or_replace_workload_set(
        &self,
        namespace: &str,
        spec: &WorkloadSetSpec,
    ) -> Result<(), ControllerError> {
        let service: Service = serde_json::from_value(render_service(namespace, spec))?;
        self.apply(namespace, &spec.service_name, &service).await?;

        let config_map: ConfigMap = serde_json::from_value(render_config_map(namespace, spec))?;
        self.apply(namespace, &spec.config_map_name, &config_map).await?;

        let sts: StatefulSet = serde_json::from_value(render_stateful_set(namespace, spec))?;
        self.apply(namespace, &spec.name, &sts).await?;

        debug!(
            name = %spec.name,
            replicas = spec.replicas,
            fingerprint = %spec.fingerprint,
            "StatefulSet applied"
        );
        Ok(())
    }

    async fn read_task(&self, key: &ObjectKey) -> Result<ElassandraTask, ControllerError> {
        self.tasks(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| map_kube_error(e, &key.to_string()))
    }

    async fn update_task_status(&self, task: &ElassandraTask) -> Result<ElassandraTask, ControllerError> {
        let key = ObjectKey::of(task)?;
        let data = serde_json::to_vec(task)?;
        self.tasks(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), data)
            .await
            .map_err(|e| map_kube_error(e, &key.to_string()))
    }

    async fn create_task(&self, namespace: &str, task: &ElassandraTask) -> Result<(), ControllerError> {
        self.tasks(namespace)
            .create(&PostParams::default(), task)
            .await
            .map_err(|e| map_kube_error(e, &task.name_any()))?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ControllerError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, "nodes"))?;
        Ok(nodes
            .items
            .iter()
            .map(|node| NodeInfo {
                name: node.name_any(),
                zone: node.labels().get(naming::ZONE_LABEL).cloned(),
            })
            .collect())
    }
}

/// Projects a StatefulSet carrying the rack labels onto a [`WorkloadSet`].
fn to_workload_set(sts: &StatefulSet) -> Option<WorkloadSet> {
    let labels = sts.labels();
    let rack_index = labels.get(naming::RACK_INDEX_LABEL)?.parse().ok()?;
    let zone = labels.get(naming::RACK_LABEL)?.clone();
    let spec = sts.spec.as_ref();
    let status = sts.status.as_ref();

    let replicas = spec.and_then(|s| s.replicas).unwrap_or(1);
    let ready_replicas = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let observed = status.and_then(|s| s.observed_generation);
    let revisions_match = match status {
        Some(s) => match (&s.current_revision, &s.update_revision) {
            (Some(current), Some(update)) => current == update,
            _ => true,
        },
        None => false,
    };
    let updated = revisions_match && observed.is_some() && observed >= sts.metadata.generation;

    Some(WorkloadSet {
        name: sts.name_any(),
        rack_index,
        zone,
        replicas,
        ready_replicas,
        updated,
        fingerprint: sts.annotations().get(naming::FINGERPRINT_ANNOTATION).cloned(),
    })
}

fn rack_labels(spec: &WorkloadSetSpec) -> serde_json::Value {
    let mut labels = spec.labels.clone();
    labels.insert(naming::RACK_LABEL.to_string(), spec.zone.clone());
    labels.insert(naming::RACK_INDEX_LABEL.to_string(), spec.rack_index.to_string());
    json!(labels)
}

fn render_service(namespace: &str, spec: &WorkloadSetSpec) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": spec.service_name,
            "namespace": namespace,
            "labels": spec.labels,
            "ownerReferences": owner_references(spec),
        },
        "spec": {
            "clusterIP": "None",
            "publishNotReadyAddresses": true,
            "selector": spec.labels,
            "ports": [
                { "name": "internode", "port": 7000 },
                { "name": "cql", "port": 9042 },
                { "name": "elasticsearch", "port": 9200 },
            ],
        },
    })
}

fn render_config_map(namespace: &str, spec: &WorkloadSetSpec) -> serde_json::Value {
    let mut data = spec.config.clone();
    data.insert("seeds".to_string(), spec.seeds.join(","));
    data.insert("seeders".to_string(), spec.seeders.join(","));
    data.insert("auto_bootstrap".to_string(), spec.auto_bootstrap.to_string());
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": spec.config_map_name,
            "namespace": namespace,
            "labels": rack_labels(spec),
            "ownerReferences": owner_references(spec),
        },
        "data": data,
    })
}

fn render_stateful_set(namespace: &str, spec: &WorkloadSetSpec) -> serde_json::Value {
    let labels = rack_labels(spec);
    let affinity_operator = match spec.placement {
        ZonePlacement::Strict => "requiredDuringSchedulingIgnoredDuringExecution",
        ZonePlacement::Preferred => "preferredDuringSchedulingIgnoredDuringExecution",
    };
    let zone_term = json!({
        "matchExpressions": [{
            "key": naming::ZONE_LABEL,
            "operator": "In",
            "values": [spec.zone],
        }]
    });
    let node_affinity = match spec.placement {
        ZonePlacement::Strict => keyed(affinity_operator, json!({ "nodeSelectorTerms": [zone_term] })),
        ZonePlacement::Preferred => keyed(affinity_operator, json!([{ "weight": 100, "preference": zone_term }])),
    };
    let mut pod_spec = json!({
        "affinity": { "nodeAffinity": node_affinity },
        "containers": [{
            "name": "elassandra",
            "image": spec.image,
            "envFrom": [{ "configMapRef": { "name": spec.config_map_name } }],
            "ports": [
                { "name": "internode", "containerPort": 7000 },
                { "name": "cql", "containerPort": 9042 },
                { "name": "elasticsearch", "containerPort": 9200 },
            ],
            "resources": {
                "requests": resource_requests(spec),
            },
            "volumeMounts": [{ "name": "data", "mountPath": "/var/lib/cassandra" }],
        }],
    });
    if spec.placement == ZonePlacement::Strict {
        // one Elassandra pod per node
        pod_spec["affinity"]["podAntiAffinity"] = json!({
            "requiredDuringSchedulingIgnoredDuringExecution": [{
                "topologyKey": "kubernetes.io/hostname",
                "labelSelector": { "matchLabels": keyed(naming::DATACENTER_LABEL, json!(spec.datacenter)) },
            }]
        });
    }

    json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": {
            "name": spec.name,
            "namespace": namespace,
            "labels": labels,
            "annotations": keyed(naming::FINGERPRINT_ANNOTATION, json!(spec.fingerprint)),
            "ownerReferences": owner_references(spec),
        },
        "spec": {
            "replicas": spec.replicas,
            "serviceName": spec.service_name,
            "podManagementPolicy": "OrderedReady",
            "updateStrategy": { "type": "RollingUpdate" },
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": {
                    "labels": labels,
                    "annotations": keyed(naming::FINGERPRINT_ANNOTATION, json!(spec.fingerprint)),
                },
                "spec": pod_spec,
            },
            "volumeClaimTemplates": [{
                "metadata": { "name": "data" },
                "spec": {
                    "accessModes": ["ReadWriteOnce"],
                    "resources": {
                        "requests": {
                            "storage": spec.data_volume_size.as_deref().unwrap_or("10Gi"),
                        },
                    },
                },
            }],
        },
    })
}

fn owner_references(spec: &WorkloadSetSpec) -> serde_json::Value {
    json!(spec.owner.iter().collect::<Vec<_>>())
}

/// Single-entry JSON object
fn keyed(key: &str, value: serde_json::Value) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(key.to_string(), value);
    serde_json::Value::Object(map)
}

fn resource_requests(spec: &WorkloadSetSpec) -> serde_json::Value {
    let mut requests = serde_json::Map::new();
    if let Some(cpu) = &spec.cpu {
        requests.insert("cpu".to_string(), json!(cpu));
    }
    if let Some(memory) = &spec.memory {
        requests.insert("memory".to_string(), json!(memory));
    }
    serde_json::Value::Object(requests)
}
