//! Kubernetes resource watchers.
//!
//! Each CRD gets one `kube_runtime::Controller`, which takes care of
//! reconnection, deduplication of queued objects and requeues. The reconcile
//! functions only translate between the controller's objects and the
//! reconcilers' [`ObjectKey`]s.
//!
//! The datacenter controller is also triggered by:
//! - StatefulSets it owns (rack readiness changes)
//! - finished tasks whose kind changes what the datacenter pass depends on

use crate::context::Context;
use crate::datacenter::DatacenterReconciler;
use crate::error::ControllerError;
use crate::store::ObjectKey;
use crate::task::TaskReconciler;
use crds::{ElassandraDatacenter, ElassandraTask};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::Api;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Debounce applied to every controller: bursts of events on one object
/// (status write, owned StatefulSet update) collapse into a single pass.
const DEBOUNCE: Duration = Duration::from_secs(2);

fn controller_config(ctx: &Context) -> ControllerConfig {
    ControllerConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(ctx.config.reconcile_concurrency)
}

/// Watches the operator's resources and drives both reconcilers.
pub struct Watcher {
    ctx: Arc<Context>,
    datacenter_api: Api<ElassandraDatacenter>,
    task_api: Api<ElassandraTask>,
    statefulset_api: Api<StatefulSet>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").field("ctx", &self.ctx).finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(
        ctx: Arc<Context>,
        datacenter_api: Api<ElassandraDatacenter>,
        task_api: Api<ElassandraTask>,
        statefulset_api: Api<StatefulSet>,
    ) -> Self {
        Self {
            ctx,
            datacenter_api,
            task_api,
            statefulset_api,
        }
    }

    /// Starts watching ElassandraDatacenter resources.
    pub async fn watch_datacenters(&self) -> Result<(), ControllerError> {
        info!("Starting ElassandraDatacenter watcher");

        Controller::new(self.datacenter_api.clone(), watcher::Config::default())
            .with_config(controller_config(&self.ctx))
            .owns(self.statefulset_api.clone(), watcher::Config::default())
            .watches(self.task_api.clone(), watcher::Config::default(), datacenter_of_finished_task)
            .run(reconcile_datacenter, datacenter_error_policy, Arc::clone(&self.ctx))
            .for_each(|res| async move {
                match res {
                    Ok((obj, action)) => debug!(datacenter = %obj, ?action, "Reconciled"),
                    Err(e) => warn!(error = %e, "ElassandraDatacenter controller error"),
                }
            })
            .await;

        info!("ElassandraDatacenter watcher stopped");
        Ok(())
    }

    /// Starts watching ElassandraTask resources.
    pub async fn watch_tasks(&self) -> Result<(), ControllerError> {
        info!("Starting ElassandraTask watcher");

        Controller::new(self.task_api.clone(), watcher::Config::default())
            .with_config(controller_config(&self.ctx))
            .run(reconcile_task, task_error_policy, Arc::clone(&self.ctx))
            .for_each(|res| async move {
                match res {
                    Ok((obj, action)) => debug!(task = %obj, ?action, "Reconciled"),
                    Err(e) => warn!(error = %e, "ElassandraTask controller error"),
                }
            })
            .await;

        info!("ElassandraTask watcher stopped");
        Ok(())
    }
}

/// Datacenter to re-reconcile when `task` ended, if its kind requires it.
fn datacenter_of_finished_task(task: ElassandraTask) -> Option<ObjectRef<ElassandraDatacenter>> {
    let finished = task.status.as_ref().is_some_and(|s| s.phase.is_terminal());
    if !finished || !task.spec.kind.retriggers_datacenter() {
        return None;
    }
    let namespace = task.metadata.namespace.as_deref()?;
    Some(ObjectRef::new(&task.spec.datacenter).within(namespace))
}

fn requeue(after: Option<Duration>) -> Action {
    after.map_or_else(Action::await_change, Action::requeue)
}

async fn reconcile_datacenter(
    dc: Arc<ElassandraDatacenter>,
    ctx: Arc<Context>,
) -> Result<Action, ControllerError> {
    let Some(_pass) = ctx.gate.enter() else {
        debug!("Shutting down, datacenter pass refused");
        return Ok(Action::await_change());
    };
    let key = ObjectKey::of(dc.as_ref())?;

    match DatacenterReconciler::new(Arc::clone(&ctx)).reconcile(&key).await {
        Ok(outcome) => {
            ctx.backoff.reset(&key.to_string());
            Ok(requeue(outcome.requeue_after()))
        }
        Err(ControllerError::NotFound(_)) => {
            debug!(datacenter = %key, "Datacenter gone");
            ctx.backoff.reset(&key.to_string());
            Ok(Action::await_change())
        }
        Err(e) => Err(e),
    }
}

fn datacenter_error_policy(dc: Arc<ElassandraDatacenter>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = ObjectKey::of(dc.as_ref()).map_or_else(|_| String::new(), |k| k.to_string());
    let delay = ctx.backoff.next(&key);
    if error.is_transient() {
        warn!(datacenter = %key, error = %error, delay = ?delay, "Datacenter pass failed, retrying");
    } else {
        error!(datacenter = %key, error = %error, delay = ?delay, "Datacenter pass failed");
    }
    Action::requeue(delay)
}

async fn reconcile_task(task: Arc<ElassandraTask>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let Some(_pass) = ctx.gate.enter() else {
        debug!("Shutting down, task pass refused");
        return Ok(Action::await_change());
    };
    let key = ObjectKey::of(task.as_ref())?;

    match TaskReconciler::new(Arc::clone(&ctx)).reconcile(&key).await {
        Ok(outcome) => {
            ctx.backoff.reset(&key.to_string());
            if outcome.retrigger_datacenter {
                info!(task = %key, datacenter = %task.spec.datacenter, "Task ended, datacenter queued");
            }
            Ok(requeue(outcome.requeue))
        }
        Err(ControllerError::NotFound(_)) => Ok(Action::await_change()),
        Err(e) => Err(e),
    }
}

fn task_error_policy(task: Arc<ElassandraTask>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = ObjectKey::of(task.as_ref()).map_or_else(|_| String::new(), |k| k.to_string());
    let delay = ctx.backoff.next(&key);
    warn!(task = %key, error = %error, delay = ?delay, "Task pass failed, retrying");
    Action::requeue(delay)
}
