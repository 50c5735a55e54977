//! Datacenter reconciliation
//!
//! A pass reads the datacenter, folds the live racks into its status, picks a
//! single action with [`decision::decide`] and executes it. The status is
//! written back only when the pass changed it, so repeating a pass against
//! unchanged inputs is a no-op.
//!
//! Failures never escape a pass as errors, except stale-write conflicts: they
//! are recorded as phase `Error` with the message and time, and the next
//! trigger re-evaluates from scratch.

pub mod config;
pub mod decision;
pub mod seeds;
pub mod status;
pub mod teardown;
pub mod zones;


use self::decision::{Decision, Observation};
use self::seeds::SeedPlan;
use self::status::{project, refresh_totals};
use self::zones::Zones;
use crate::context::Context;
use crate::error::ControllerError;
use crate::naming;
use crate::store::{ObjectKey, WorkloadSetSpec};
use chrono::Utc;
use crds::{DatacenterPhase, DatacenterStatus, ElassandraDatacenter, RackStatus};
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Requeue delay of datacenters in a transient phase
const TRANSIENT_REQUEUE: Duration = Duration::from_secs(10);

/// Result of one datacenter pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    /// Executed action, `None` when the pass was skipped or failed
    pub decision: Option<Decision>,
    pub phase: DatacenterPhase,
    /// Message recorded when the pass failed
    pub error: Option<String>,
    /// True if the status was written
    pub persisted: bool,
}

impl PassOutcome {
    fn skipped(phase: DatacenterPhase) -> Self {
        Self {
            decision: None,
            phase,
            error: None,
            persisted: false,
        }
    }

    /// Delay before the next pass, `None` to wait for a change.
    ///
    /// Rest states and `Error` wait for the next event.
    pub fn requeue_after(&self) -> Option<Duration> {
        if self.phase.is_stable() || self.phase == DatacenterPhase::Error {
            None
        } else {
            Some(TRANSIENT_REQUEUE)
        }
    }
}

/// Drives ElassandraDatacenter resources towards their spec.
#[derive(Debug, Clone)]
pub struct DatacenterReconciler {
    ctx: Arc<Context>,
}

impl DatacenterReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Runs one pass over the datacenter `key`.
    ///
    /// Returns `Err` only when the datacenter cannot be read, the status write
    /// lost an optimistic-concurrency race, or teardown failed.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<PassOutcome, ControllerError> {
        let mut dc = self.ctx.store.read_datacenter(key).await?;

        if dc.metadata.deletion_timestamp.is_some() {
            teardown::run(&self.ctx, key, &dc).await?;
            let phase = dc.status.as_ref().map(|s| s.phase).unwrap_or_default();
            return Ok(PassOutcome::skipped(phase));
        }

        if !dc.finalizers().iter().any(|f| f == naming::FINALIZER) {
            self.ctx.store.add_finalizer(key).await?;
            dc = self.ctx.store.read_datacenter(key).await?;
        }

        let before = dc.status.clone().unwrap_or_default();
        if before.block.is_locked() {
            info!(
                datacenter = %key,
                reasons = ?before.block.reasons,
                task = before.current_task.as_deref().unwrap_or("-"),
                "Datacenter is blocked by a maintenance task, skipping pass"
            );
            return Ok(PassOutcome::skipped(before.phase));
        }

        let mut status = before.clone();
        let (decision, failure) = match self.step(key, &dc, &mut status).await {
            Ok(decision) => (Some(decision), None),
            Err(ControllerError::Conflict(message)) => {
                return Err(ControllerError::Conflict(message));
            }
            Err(e) => {
                let message = e.to_string();
                error!(datacenter = %key, error = %message, "Datacenter pass failed");
                if status.phase == DatacenterPhase::Error
                    && status.last_error.as_deref() == Some(message.as_str())
                {
                    debug!(datacenter = %key, "Error already recorded");
                } else {
                    status.record_error(message.clone(), Utc::now());
                }
                (None, Some(message))
            }
        };
        status.observed_generation = dc.metadata.generation;

        let persisted = status != before;
        if persisted {
            if before.phase != status.phase {
                info!(datacenter = %key, from = %before.phase, to = %status.phase, "Datacenter phase changed");
            }
            dc.status = Some(status.clone());
            self.ctx.store.update_datacenter_status(&dc).await?;
        } else {
            debug!(datacenter = %key, "Status unchanged, nothing to persist");
        }

        Ok(PassOutcome {
            decision,
            phase: status.phase,
            error: failure,
            persisted,
        })
    }

    /// Observes the live racks, decides and executes one action.
    async fn step(
        &self,
        key: &ObjectKey,
        dc: &ElassandraDatacenter,
        status: &mut DatacenterStatus,
    ) -> Result<Decision, ControllerError> {
        let nodes = self.ctx.store.list_nodes().await?;
        let sets = self
            .ctx
            .store
            .list_workload_sets(&key.namespace, &naming::selector(&key.name))
            .await?;
        let zones = Zones::build(&nodes, &sets);
        project(status, &zones)?;

        let fingerprint = config::fingerprint(&dc.spec)?;
        status.config_fingerprint = Some(fingerprint.clone());

        let decision = decision::decide(&Observation {
            spec: &dc.spec,
            status,
            zones: &zones,
            fingerprint: &fingerprint,
        })?;
        debug!(datacenter = %key, decision = decision.name(), "Decided next action");

        self.execute(key, dc, status, &decision, &fingerprint).await?;
        Ok(decision)
    }

    async fn execute(
        &self,
        key: &ObjectKey,
        dc: &ElassandraDatacenter,
        status: &mut DatacenterStatus,
        decision: &Decision,
        fingerprint: &str,
    ) -> Result<(), ControllerError> {
        match decision {
            Decision::Park { racks } => {
                for index in racks {
                    let rack = rack_mut(status, *index)?;
                    rack.parked_replicas = Some(rack.desired_replicas);
                    self.apply_rack(key, dc, status, *index, 0, fingerprint).await?;
                }
                info!(datacenter = %key, racks = ?racks, "Parking datacenter");
                status.phase = DatacenterPhase::Updating;
            }
            Decision::MarkParked => {
                info!(datacenter = %key, "Datacenter parked");
                status.phase = DatacenterPhase::Parked;
            }
            Decision::Unpark { racks } => {
                for (index, replicas) in racks {
                    self.apply_rack(key, dc, status, *index, *replicas, fingerprint).await?;
                }
                for rack in status.rack_statuses.values_mut() {
                    rack.parked_replicas = None;
                }
                info!(datacenter = %key, racks = ?racks, "Datacenter unparked");
                status.phase = DatacenterPhase::Running;
            }
            Decision::RollingUpdate { rack } => {
                let replicas = rack_mut(status, *rack)?.desired_replicas;
                info!(datacenter = %key, rack = rack, fingerprint = fingerprint, "Rolling update of rack");
                self.apply_rack(key, dc, status, *rack, replicas, fingerprint).await?;
                status.phase = DatacenterPhase::Updating;
            }
            Decision::CreateRack { zone } => {
                let index = status.assign_rack_index(zone);
                info!(datacenter = %key, zone = %zone, rack = index, "Creating rack");
                self.apply_rack(key, dc, status, index, 1, fingerprint).await?;
                status.phase = growing_phase(status);
                status.last_good_fingerprint = Some(fingerprint.to_string());
            }
            Decision::ScaleUp { rack, replicas } => {
                info!(datacenter = %key, rack = rack, replicas = replicas, "Scaling rack up");
                self.apply_rack(key, dc, status, *rack, *replicas, fingerprint).await?;
                status.phase = growing_phase(status);
                status.last_good_fingerprint = Some(fingerprint.to_string());
            }
            Decision::ScaleDown { rack, replicas } => {
                self.scale_down(key, dc, status, *rack, *replicas, fingerprint).await?;
                status.phase = DatacenterPhase::ScalingDown;
                status.last_good_fingerprint = Some(fingerprint.to_string());
            }
            Decision::Wait { reason } => {
                debug!(datacenter = %key, reason = %reason, "Waiting");
            }
            Decision::Settle => {
                status.phase = DatacenterPhase::Running;
                status.last_error = None;
                status.last_error_time = None;
                status.last_good_fingerprint = Some(fingerprint.to_string());
                self.settle(dc, status).await?;
            }
        }
        Ok(())
    }

    /// Decommissions the highest ordinal of `rack`, then shrinks the rack to `replicas`.
    ///
    /// The managed keyspaces' RF is lowered first when the datacenter shrinks
    /// below the size they were last reconciled for. The rack keeps its size
    /// when the decommission call keeps failing.
    async fn scale_down(
        &self,
        key: &ObjectKey,
        dc: &ElassandraDatacenter,
        status: &mut DatacenterStatus,
        rack: i32,
        replicas: i32,
        fingerprint: &str,
    ) -> Result<(), ControllerError> {
        let new_size = status.replicas - 1;
        if status.bootstrapped && status.keyspace_manager_replicas > new_size {
            info!(datacenter = %key, new_size = new_size, "Decreasing replication factor before scale down");
            self.ctx
                .session
                .decrease_rf_before_scaling_down(&with_status(dc, status), new_size)
                .await?;
            status.keyspace_manager_replicas = new_size;
        }

        let pod = naming::pod_name(&dc.spec, rack, replicas);
        let host = naming::pod_host(&dc.spec, &key.namespace, &pod);
        info!(datacenter = %key, pod = %pod, "Decommissioning node");
        let sidecar = Arc::clone(&self.ctx.sidecar);
        self.ctx
            .decommission_retry()
            .run("decommission", || {
                let sidecar = Arc::clone(&sidecar);
                let host = host.clone();
                async move { sidecar.decommission(&host).await }
            })
            .await
            .map_err(|e| ControllerError::Decommission(format!("{pod}: {e}")))?;

        info!(datacenter = %key, rack = rack, replicas = replicas, "Scaling rack down");
        self.apply_rack(key, dc, status, rack, replicas, fingerprint).await
    }

    /// Housekeeping of a converged datacenter.
    async fn settle(
        &self,
        dc: &ElassandraDatacenter,
        status: &mut DatacenterStatus,
    ) -> Result<(), ControllerError> {
        if status.bootstrapped && status.ready_replicas > 0 {
            let view = with_status(dc, status);
            self.ctx.session.reconcile_keyspaces(&view).await?;
            self.ctx.session.reconcile_roles(&view).await?;
            status.keyspace_manager_replicas = status.ready_replicas;
        }

        if status.ready_replicas == dc.spec.replicas {
            let view = with_status(dc, status);
            let mut registered = status.registered_plugins.clone();
            if self.ctx.plugins.reconcile_all(&view, &mut registered).await {
                status.registered_plugins = registered;
            }
            self.ctx.backups.schedule_backups(&view)?;
        }
        Ok(())
    }

    /// Writes the workload set of rack `index` with `replicas` and the current
    /// configuration, then records the new desired state in `status`.
    async fn apply_rack(
        &self,
        key: &ObjectKey,
        dc: &ElassandraDatacenter,
        status: &mut DatacenterStatus,
        index: i32,
        replicas: i32,
        fingerprint: &str,
    ) -> Result<(), ControllerError> {
        let zone = usize::try_from(index)
            .ok()
            .and_then(|i| status.zones.get(i))
            .cloned()
            .ok_or_else(|| ControllerError::Inconsistent(format!("rack {index} has no zone")))?;

        let rack = status
            .rack_statuses
            .entry(index)
            .or_insert_with(|| RackStatus::new(zone.clone(), index));
        let ready = rack.ready_replicas;
        rack.observe(replicas, ready);
        rack.fingerprint = Some(fingerprint.to_string());
        refresh_totals(status);

        let plan = seeds::select(&key.namespace, &dc.spec, status);
        let spec = workload_set_spec(dc, &zone, index, replicas, fingerprint, &plan);
        self.ctx
            .store
            .create_or_replace_workload_set(&key.namespace, &spec)
            .await?;
        debug!(datacenter = %key, workload_set = %spec.name, replicas = replicas, "Workload set applied");

        status.seeds = plan.seeds;
        Ok(())
    }
}

fn rack_mut(status: &mut DatacenterStatus, index: i32) -> Result<&mut RackStatus, ControllerError> {
    status
        .rack_statuses
        .get_mut(&index)
        .ok_or_else(|| ControllerError::Inconsistent(format!("rack {index} has no status")))
}

/// `Creating` until the first node joined, `ScalingUp` afterwards.
fn growing_phase(status: &DatacenterStatus) -> DatacenterPhase {
    if !status.bootstrapped && status.phase == DatacenterPhase::Creating {
        DatacenterPhase::Creating
    } else {
        DatacenterPhase::ScalingUp
    }
}

/// Copy of `dc` carrying the in-flight status, handed to collaborators.
fn with_status(dc: &ElassandraDatacenter, status: &DatacenterStatus) -> ElassandraDatacenter {
    let mut view = dc.clone();
    view.status = Some(status.clone());
    view
}

fn workload_set_spec(
    dc: &ElassandraDatacenter,
    zone: &str,
    index: i32,
    replicas: i32,
    fingerprint: &str,
    plan: &SeedPlan,
) -> WorkloadSetSpec {
    let spec = &dc.spec;
    let resources = spec.resources.clone().unwrap_or_default();
    WorkloadSetSpec {
        name: naming::workload_set_name(spec, index),
        datacenter: dc.name_any(),
        rack_index: index,
        zone: zone.to_string(),
        replicas,
        fingerprint: fingerprint.to_string(),
        image: spec.image.clone(),
        placement: spec.placement,
        service_name: naming::service_name(spec),
        config_map_name: naming::rack_config_name(spec, index),
        config: config::rack_config(spec, zone),
        seeds: plan.seeds.clone(),
        seeders: plan.seeders.clone(),
        auto_bootstrap: plan.auto_bootstrap,
        labels: naming::common_labels(&dc.name_any(), spec),
        owner: dc.controller_owner_ref(&()),
        cpu: resources.cpu,
        memory: resources.memory,
        data_volume_size: spec.data_volume_size.clone(),
    }
}
