//! Periodic backups
//!
//! Each `spec.scheduledBackups` entry gets one tokio task that sleeps until the
//! next cron occurrence and then submits an `ElassandraTask` carrying a backup
//! sub-spec. The task reconciler runs it like any other submitted task.

use crate::error::ControllerError;
use crate::store::{ObjectKey, ResourceStore};
use chrono::{DateTime, Utc};
use crds::{BackupTaskSpec, ElassandraDatacenter, ElassandraTask, ScheduledBackup, TaskKind, TaskSpec};
use croner::Cron;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const SCHEDULE_LABEL: &str = "elassandra.strapdata.com/backup-schedule";

/// Keeps the periodic backups of each datacenter in line with its spec.
pub trait BackupScheduler: Send + Sync {
    /// (Re)schedules the backups of `dc`. Unchanged schedules keep running.
    fn schedule_backups(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError>;

    fn cancel_backups(&self, key: &ObjectKey);
}

pub fn parse_cron(expression: &str) -> Result<Cron, ControllerError> {
    Cron::new(expression)
        .with_seconds_optional()
        .parse()
        .map_err(|e| ControllerError::InvalidSpec(format!("invalid cron expression {expression:?}: {e}")))
}

/// Task submitted for the occurrence `at` of `schedule`.
pub fn backup_task(
    key: &ObjectKey,
    cluster: &str,
    schedule: &ScheduledBackup,
    at: DateTime<Utc>,
) -> ElassandraTask {
    let name = format!("{}-{}-{}", key.name, schedule.name, at.format("%Y%m%d%H%M%S")).to_lowercase();
    let backup = BackupTaskSpec {
        snapshot_tag: schedule.backup.snapshot_tag.clone().or_else(|| Some(name.clone())),
        ..schedule.backup.clone()
    };
    let mut task = ElassandraTask::new(
        &name,
        TaskSpec {
            cluster: cluster.to_string(),
            datacenter: key.name.clone(),
            kind: TaskKind::Backup(backup),
        },
    );
    task.metadata.namespace = Some(key.namespace.clone());
    task.metadata.labels = Some(BTreeMap::from([(
        SCHEDULE_LABEL.to_string(),
        schedule.name.clone(),
    )]));
    task
}

#[derive(Debug)]
struct ScheduledJob {
    schedule: ScheduledBackup,
    handle: JoinHandle<()>,
}

/// Cron-driven scheduler submitting backup tasks through the resource store.
pub struct CronBackupScheduler {
    store: Arc<dyn ResourceStore>,
    jobs: Mutex<HashMap<ObjectKey, Vec<ScheduledJob>>>,
}

impl std::fmt::Debug for CronBackupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronBackupScheduler").finish_non_exhaustive()
    }
}

impl CronBackupScheduler {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of running schedules of a datacenter
    #[cfg(test)]
    pub fn scheduled(&self, key: &ObjectKey) -> usize {
        self.jobs
            .lock()
            .map(|jobs| jobs.get(key).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl BackupScheduler for CronBackupScheduler {
    fn schedule_backups(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
        let key = ObjectKey::of(dc)?;
        let desired = &dc.spec.scheduled_backups;
        let parsed = desired
            .iter()
            .map(|schedule| parse_cron(&schedule.cron).map(|cron| (schedule.clone(), cron)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| ControllerError::Backup("backup scheduler state poisoned".to_string()))?;

        if let Some(existing) = jobs.get(&key) {
            let unchanged = existing.len() == desired.len()
                && existing
                    .iter()
                    .zip(desired)
                    .all(|(job, schedule)| job.schedule == *schedule && !job.handle.is_finished());
            if unchanged {
                return Ok(());
            }
        }

        if let Some(old) = jobs.remove(&key) {
            for job in old {
                job.handle.abort();
            }
        }
        if parsed.is_empty() {
            return Ok(());
        }

        let cluster = dc.spec.cluster_name.clone();
        let started: Vec<ScheduledJob> = parsed
            .into_iter()
            .map(|(schedule, cron)| {
                info!(datacenter = %key, schedule = %schedule.name, cron = %schedule.cron, "Backup scheduled");
                let handle = tokio::spawn(run_schedule(
                    Arc::clone(&self.store),
                    key.clone(),
                    cluster.clone(),
                    schedule.clone(),
                    cron,
                ));
                ScheduledJob { schedule, handle }
            })
            .collect();
        jobs.insert(key, started);
        Ok(())
    }

    fn cancel_backups(&self, key: &ObjectKey) {
        let Ok(mut jobs) = self.jobs.lock() else {
            return;
        };
        if let Some(old) = jobs.remove(key) {
            info!(datacenter = %key, count = old.len(), "Backups cancelled");
            for job in old {
                job.handle.abort();
            }
        }
    }
}

async fn run_schedule(
    store: Arc<dyn ResourceStore>,
    key: ObjectKey,
    cluster: String,
    schedule: ScheduledBackup,
    cron: Cron,
) {
    loop {
        let now = Utc::now();
        let next = match cron.find_next_occurrence(&now, false) {
            Ok(next) => next,
            Err(e) => {
                warn!(datacenter = %key, schedule = %schedule.name, error = %e, "No next backup occurrence");
                return;
            }
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        let task = backup_task(&key, &cluster, &schedule, next);
        match store.create_task(&key.namespace, &task).await {
            Ok(()) => info!(datacenter = %key, task = ?task.metadata.name, "Backup task submitted"),
            Err(e) => warn!(datacenter = %key, schedule = %schedule.name, error = %e, "Backup task submission failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryStore, test_datacenter};
    use chrono::TimeZone;

    fn hourly(name: &str) -> ScheduledBackup {
        ScheduledBackup {
            name: name.to_string(),
            cron: "0 * * * *".to_string(),
            backup: BackupTaskSpec {
                repository: "s3://backups".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_invalid_cron_is_a_spec_error() {
        let err = parse_cron("not a cron").unwrap_err();
        assert!(matches!(err, ControllerError::InvalidSpec(_)));
    }

    #[test]
    fn test_backup_task_naming() {
        let key = ObjectKey::new("db", "dc1");
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 0, 0).unwrap();
        let task = backup_task(&key, "cl1", &hourly("nightly"), at);

        assert_eq!(task.metadata.name.as_deref(), Some("dc1-nightly-20260304050000"));
        assert_eq!(task.metadata.namespace.as_deref(), Some("db"));
        assert_eq!(task.spec.datacenter, "dc1");
        match &task.spec.kind {
            TaskKind::Backup(backup) => {
                assert_eq!(backup.repository, "s3://backups");
                assert_eq!(backup.snapshot_tag.as_deref(), Some("dc1-nightly-20260304050000"));
            }
            other => panic!("unexpected task kind {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent_and_cancellable() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = CronBackupScheduler::new(store);
        let mut dc = test_datacenter("dc1", 3);
        dc.spec.scheduled_backups = vec![hourly("a"), hourly("b")];
        let key = ObjectKey::of(&dc).unwrap();

        scheduler.schedule_backups(&dc).unwrap();
        assert_eq!(scheduler.scheduled(&key), 2);
        scheduler.schedule_backups(&dc).unwrap();
        assert_eq!(scheduler.scheduled(&key), 2);

        dc.spec.scheduled_backups.pop();
        scheduler.schedule_backups(&dc).unwrap();
        assert_eq!(scheduler.scheduled(&key), 1);

        scheduler.cancel_backups(&key);
        assert_eq!(scheduler.scheduled(&key), 0);
    }

    #[tokio::test]
    async fn test_occurrence_submits_backup_task() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = CronBackupScheduler::new(Arc::clone(&store) as Arc<dyn ResourceStore>);
        let mut dc = test_datacenter("dc1", 3);
        dc.spec.scheduled_backups = vec![ScheduledBackup {
            cron: "* * * * * *".to_string(),
            ..hourly("every-second")
        }];

        scheduler.schedule_backups(&dc).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.cancel_backups(&ObjectKey::of(&dc).unwrap());

        let tasks = store.tasks();
        assert!(!tasks.is_empty());
        assert!(tasks.iter().all(|t| matches!(t.spec.kind, TaskKind::Backup(_))));
    }
}
