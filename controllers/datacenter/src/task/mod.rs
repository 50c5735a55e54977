//! Task reconciliation
//!
//! Moves an ElassandraTask through `Waiting -> Running -> Succeed|Failed`,
//! holding its datacenter's block while the executor runs. `Ignored` ends
//! tasks that fail validation or whose datacenter does not exist.

pub mod executors;
pub mod lock;

#[cfg(test)]
mod reconciler_test;

use self::executors::Target;
use self::lock::LockState;
use crate::context::Context;
use crate::error::ControllerError;
use crate::store::ObjectKey;
use chrono::Utc;
use crds::{BlockReason, ElassandraDatacenter, ElassandraTask, TaskPhase, TaskStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of one task pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub phase: TaskPhase,
    /// Delay before the next pass, `None` to wait for a change
    pub requeue: Option<Duration>,
    /// The datacenter should be reconciled now that the task ended
    pub retrigger_datacenter: bool,
}

/// Drives ElassandraTask resources.
#[derive(Debug, Clone)]
pub struct TaskReconciler {
    ctx: Arc<Context>,
}

impl TaskReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Runs one pass over the task `key`.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<TaskOutcome, ControllerError> {
        let mut task = self.ctx.store.read_task(key).await?;
        let dc_key = ObjectKey::new(key.namespace.clone(), task.spec.datacenter.clone());
        let reason = task.spec.kind.block_reason();
        let before = task.status.clone();
        let mut status = before.clone().unwrap_or_default();

        if status.phase.is_terminal() {
            let released = self.release(&dc_key, key, reason).await;
            return Ok(TaskOutcome {
                phase: status.phase,
                requeue: (!released).then_some(self.ctx.config.waiting_task_requeue),
                retrigger_datacenter: false,
            });
        }

        let dc = match self.ctx.store.read_datacenter(&dc_key).await {
            Ok(dc) => dc,
            Err(ControllerError::NotFound(_)) => {
                warn!(task = %key, datacenter = %dc_key, "Datacenter not found, ignoring task");
                finish(&mut status, TaskPhase::Ignored, Some(format!("datacenter {dc_key} not found")));
                self.persist(&mut task, before.as_ref(), status.clone()).await?;
                return Ok(outcome(&task, status.phase, None));
            }
            Err(e) => return Err(e),
        };

        if status.phase == TaskPhase::Waiting {
            if let Some(waiting) = self.start(key, &dc_key, &mut task, &dc, &mut status).await? {
                return Ok(waiting);
            }
        } else {
            // resumed: the block may have been lost with the previous pass
            match lock::acquire(self.ctx.store.as_ref(), &dc_key, &key.name, reason).await {
                Ok(LockState::Acquired) => {}
                Ok(LockState::Busy { holder }) => {
                    warn!(task = %key, holder = %holder, "Resumed task finds the block held by another task, waiting");
                    status.last_message = Some(format!("waiting for {holder}"));
                    self.persist(&mut task, before.as_ref(), status.clone()).await?;
                    return Ok(outcome(&task, status.phase, Some(self.ctx.config.waiting_task_requeue)));
                }
                Err(ControllerError::Conflict(message)) => return Err(ControllerError::Conflict(message)),
                Err(e) => warn!(task = %key, error = %e, "Failed to lock datacenter, running anyway"),
            }
        }

        info!(task = %key, kind = task.spec.kind.name(), pods = status.pods.len(), "Running task");
        let target = Target {
            ctx: self.ctx.as_ref(),
            dc: &dc,
            namespace: &key.namespace,
        };
        match executors::run(target, &task, &mut status).await {
            Ok(phase) => {
                info!(task = %key, phase = %phase, "Task finished");
                status.phase = phase;
            }
            Err(e) => {
                error!(task = %key, error = %e, "Task failed");
                status.phase = TaskPhase::Failed;
                status.last_message = Some(e.to_string());
            }
        }
        status.end_time = Some(Utc::now());

        let persisted = self.persist(&mut task, before.as_ref(), status.clone()).await;
        let released = self.release(&dc_key, key, reason).await;
        persisted?;

        let mut result = outcome(&task, status.phase, None);
        if !released {
            result.requeue = Some(self.ctx.config.waiting_task_requeue);
        }
        Ok(result)
    }

    /// Validates a waiting task, takes the block and marks the task running.
    ///
    /// Returns an outcome when the task cannot start on this pass.
    async fn start(
        &self,
        key: &ObjectKey,
        dc_key: &ObjectKey,
        task: &mut ElassandraTask,
        dc: &ElassandraDatacenter,
        status: &mut TaskStatus,
    ) -> Result<Option<TaskOutcome>, ControllerError> {
        let before = task.status.clone();
        let requeue = Some(self.ctx.config.waiting_task_requeue);

        let dc_phase = dc.status.as_ref().map(|s| s.phase).unwrap_or_default();
        if !dc_phase.accepts_tasks() {
            debug!(task = %key, phase = %dc_phase, "Datacenter does not accept tasks yet");
            status.last_message = Some(format!("datacenter is {dc_phase}"));
            self.persist(task, before.as_ref(), status.clone()).await?;
            return Ok(Some(outcome(task, status.phase, requeue)));
        }

        if let Err(e) = executors::validate(task, dc) {
            warn!(task = %key, error = %e, "Invalid task, ignoring");
            finish(status, TaskPhase::Ignored, Some(e.to_string()));
            self.persist(task, before.as_ref(), status.clone()).await?;
            return Ok(Some(outcome(task, status.phase, None)));
        }

        let pods = executors::target_pods(&task.spec.kind, dc);
        if pods.is_empty() {
            debug!(task = %key, "Datacenter has no ready node yet");
            status.last_message = Some(format!("datacenter {} has no ready node", dc.spec.datacenter_name));
            self.persist(task, before.as_ref(), status.clone()).await?;
            return Ok(Some(outcome(task, status.phase, requeue)));
        }

        let reason = task.spec.kind.block_reason();
        match lock::acquire(self.ctx.store.as_ref(), dc_key, &key.name, reason).await {
            Ok(LockState::Acquired) => {}
            Ok(LockState::Busy { holder }) => {
                info!(task = %key, holder = %holder, "Datacenter locked by another task, waiting");
                status.last_message = Some(format!("waiting for {holder}"));
                self.persist(task, before.as_ref(), status.clone()).await?;
                return Ok(Some(outcome(task, status.phase, requeue)));
            }
            Err(ControllerError::Conflict(message)) => {
                debug!(task = %key, error = %message, "Datacenter changed while locking, retrying later");
                return Ok(Some(outcome(task, status.phase, requeue)));
            }
            Err(e) => warn!(task = %key, error = %e, "Failed to lock datacenter, running anyway"),
        }

        status.pods = pods;
        status.phase = TaskPhase::Running;
        status.start_time = Some(Utc::now());
        status.last_message = None;
        self.persist(task, before.as_ref(), status.clone()).await?;
        Ok(None)
    }

    /// Writes `status` if it differs from `before`.
    async fn persist(
        &self,
        task: &mut ElassandraTask,
        before: Option<&TaskStatus>,
        status: TaskStatus,
    ) -> Result<(), ControllerError> {
        if before == Some(&status) {
            return Ok(());
        }
        task.status = Some(status);
        *task = self.ctx.store.update_task_status(task).await?;
        Ok(())
    }

    /// Best-effort unlock, returns false if it must be retried.
    async fn release(&self, dc_key: &ObjectKey, key: &ObjectKey, reason: BlockReason) -> bool {
        match lock::release(self.ctx.store.as_ref(), dc_key, &key.name, reason).await {
            Ok(_) | Err(ControllerError::NotFound(_)) => true,
            Err(e) => {
                warn!(task = %key, datacenter = %dc_key, error = %e, "Failed to unlock datacenter");
                false
            }
        }
    }
}

fn outcome(task: &ElassandraTask, phase: TaskPhase, requeue: Option<Duration>) -> TaskOutcome {
    TaskOutcome {
        phase,
        requeue,
        retrigger_datacenter: matches!(phase, TaskPhase::Succeed | TaskPhase::Failed)
            && task.spec.kind.retriggers_datacenter(),
    }
}

fn finish(status: &mut TaskStatus, phase: TaskPhase, message: Option<String>) {
    status.phase = phase;
    status.last_message = message;
    status.end_time = Some(Utc::now());
}
