//! Backup: snapshot and upload on every node at once.

use super::{Pace, Target, for_each_pod};
use crate::error::ControllerError;
use crds::{BackupTaskSpec, TaskStatus};
use sidecar_client::{BackupRequest, BackupStatus};

pub(super) async fn run(
    target: Target<'_>,
    task_name: &str,
    spec: &BackupTaskSpec,
    status: &mut TaskStatus,
) -> Result<(), ControllerError> {
    let request = BackupRequest {
        snapshot_tag: spec.snapshot_tag.clone().unwrap_or_else(|| task_name.to_string()),
        repository: spec.repository.clone(),
        keyspaces: spec.keyspaces.clone(),
    };
    let request = &request;
    let pods = status.waiting_pods();
    for_each_pod(status, pods, Pace::Parallel, |pod| async move {
        let host = target.host(&pod);
        let response = target.sidecar().backup(&host, request).await?;
        match response.status {
            BackupStatus::Succeed => Ok(()),
            BackupStatus::Failed => Err(ControllerError::Backup(
                response.message.unwrap_or_else(|| "upload failed".to_string()),
            )),
        }
    })
    .await;
    Ok(())
}
