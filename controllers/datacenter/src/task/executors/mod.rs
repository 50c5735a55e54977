//! Task executors
//!
//! One executor per [`TaskKind`]. An executor only acts on the pod entries
//! still pending in the task status and records each pod's outcome there, so
//! re-running it on a partially processed task resumes where it stopped.

mod backup;
mod cleanup;
mod decommission;
mod rebuild;
mod remove_nodes;
mod repair;
mod replication;


use crate::context::Context;
use crate::error::ControllerError;
use crate::naming;
use crds::{ElassandraDatacenter, ElassandraTask, TaskKind, TaskPhase, TaskStatus};
use futures::future::join_all;
use sidecar_client::SidecarClientTrait;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How node operations of one task are started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// All at once
    Parallel,
    /// One start every interval, operations overlap
    Spaced(Duration),
    /// One after the other
    Sequential,
}

/// Datacenter a task runs against.
#[derive(Clone, Copy)]
pub struct Target<'a> {
    pub ctx: &'a Context,
    pub dc: &'a ElassandraDatacenter,
    pub namespace: &'a str,
}

impl std::fmt::Debug for Target<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("namespace", &self.namespace)
            .field("datacenter", &self.dc.spec.datacenter_name)
            .finish_non_exhaustive()
    }
}

impl Target<'_> {
    /// Address of the sidecar of `pod`
    pub fn host(&self, pod: &str) -> String {
        naming::pod_host(&self.dc.spec, self.namespace, pod)
    }

    pub fn sidecar(&self) -> &dyn SidecarClientTrait {
        self.ctx.sidecar.as_ref()
    }

    /// Start interval of throttled executors
    pub fn spacing(&self) -> Duration {
        self.ctx.config.task_node_spacing
    }
}

/// Checks the kind-specific preconditions of `task` against its datacenter.
pub fn validate(task: &ElassandraTask, dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
    if task.spec.cluster != dc.spec.cluster_name {
        return Err(ControllerError::InvalidSpec(format!(
            "task targets cluster {} but datacenter belongs to {}",
            task.spec.cluster, dc.spec.cluster_name
        )));
    }
    let own_dc = dc.spec.datacenter_name.as_str();
    validate_kind(&task.spec.kind, own_dc)
}

fn validate_kind(kind: &TaskKind, own_dc: &str) -> Result<(), ControllerError> {
    match kind {
        TaskKind::Backup(spec) if spec.repository.trim().is_empty() => {
            Err(ControllerError::InvalidSpec("backup repository is empty".to_string()))
        }
        TaskKind::Rebuild(spec) if spec.src_dc_name.is_empty() || spec.src_dc_name == own_dc => {
            Err(ControllerError::InvalidSpec(format!(
                "rebuild needs a source datacenter other than {own_dc}"
            )))
        }
        TaskKind::Replication(spec) if spec.dc_name.is_empty() => Err(ControllerError::InvalidSpec(
            "replication task has no target datacenter".to_string(),
        )),
        TaskKind::Replication(spec)
            if spec.action == crds::ReplicationAction::Add
                && (spec.replication_map.is_empty() || spec.replication_map.values().any(|rf| *rf <= 0)) =>
        {
            Err(ControllerError::InvalidSpec(
                "adding a datacenter needs a positive replication factor per keyspace".to_string(),
            ))
        }
        TaskKind::RemoveNodes(spec) if spec.dc_name.is_empty() || spec.dc_name == own_dc => {
            Err(ControllerError::InvalidSpec(format!(
                "remove-nodes needs a datacenter other than {own_dc}"
            )))
        }
        _ => Ok(()),
    }
}

/// Initial per-pod map of a task: every ready pod, or the first one for
/// kinds that act cluster-wide through a single node.
pub fn target_pods(kind: &TaskKind, dc: &ElassandraDatacenter) -> BTreeMap<String, TaskPhase> {
    let Some(status) = dc.status.as_ref() else {
        return BTreeMap::new();
    };
    let mut pods = status.rack_statuses.values().flat_map(|rack| {
        let ready = rack.ready_replicas.min(rack.desired_replicas).max(0);
        (0..ready).map(move |ordinal| naming::pod_name(&dc.spec, rack.index, ordinal))
    });
    match kind {
        TaskKind::Replication(_) | TaskKind::RemoveNodes(_) => pods
            .next()
            .map(|pod| BTreeMap::from([(pod, TaskPhase::Waiting)]))
            .unwrap_or_default(),
        _ => pods.map(|pod| (pod, TaskPhase::Waiting)).collect(),
    }
}

/// Runs the executor of `task` and returns the aggregate phase.
pub async fn run(
    target: Target<'_>,
    task: &ElassandraTask,
    status: &mut TaskStatus,
) -> Result<TaskPhase, ControllerError> {
    let task_name = task.metadata.name.as_deref().unwrap_or_default();
    match &task.spec.kind {
        TaskKind::Cleanup(spec) => cleanup::run(target, spec, status).await?,
        TaskKind::Repair(spec) => repair::run(target, spec, status).await?,
        TaskKind::Backup(spec) => backup::run(target, task_name, spec, status).await?,
        TaskKind::Decommission(spec) => decommission::run(target, spec, status).await?,
        TaskKind::Rebuild(spec) => rebuild::run(target, spec, status).await?,
        TaskKind::Replication(spec) => replication::run(target, spec, status).await?,
        TaskKind::RemoveNodes(spec) => remove_nodes::run(target, spec, status).await?,
    }
    Ok(status.aggregate_phase())
}

/// Runs `operation` on `pods` and records each outcome in `status`.
///
/// A failing pod is marked `Failed` and does not stop the others. Failure
/// messages are joined into `status.last_message`.
pub async fn for_each_pod<F, Fut>(status: &mut TaskStatus, pods: Vec<String>, pace: Pace, operation: F)
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<(), ControllerError>>,
{
    let results: Vec<(String, Result<(), ControllerError>)> = match pace {
        Pace::Sequential => {
            let mut results = Vec::with_capacity(pods.len());
            for pod in pods {
                let result = operation(pod.clone()).await;
                results.push((pod, result));
            }
            results
        }
        Pace::Parallel | Pace::Spaced(_) => {
            let interval = match pace {
                Pace::Spaced(interval) => interval,
                _ => Duration::ZERO,
            };
            join_all(pods.into_iter().zip(0u32..).map(|(pod, rank)| {
                let started = operation(pod.clone());
                async move {
                    if !interval.is_zero() {
                        tokio::time::sleep(interval * rank).await;
                    }
                    (pod, started.await)
                }
            }))
            .await
        }
    };

    let mut failures = Vec::new();
    for (pod, result) in results {
        let phase = match result {
            Ok(()) => {
                debug!(pod = %pod, "Node operation succeeded");
                TaskPhase::Succeed
            }
            Err(e) => {
                warn!(pod = %pod, error = %e, "Node operation failed");
                failures.push(format!("{pod}: {e}"));
                TaskPhase::Failed
            }
        };
        status.pods.insert(pod, phase);
    }
    if !failures.is_empty() {
        status.last_message = Some(failures.join("; "));
    }
}
