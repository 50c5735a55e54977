//! Replication: adds a datacenter to, or removes it from, the managed
//! keyspaces' replication maps. Runs once, attributed to a single node.

use super::{Pace, Target, for_each_pod};
use crate::error::ControllerError;
use crds::{ReplicationAction, ReplicationTaskSpec, TaskStatus};
use tracing::info;

pub(super) async fn run(
    target: Target<'_>,
    spec: &ReplicationTaskSpec,
    status: &mut TaskStatus,
) -> Result<(), ControllerError> {
    let session = target.ctx.session.as_ref();
    let dc = target.dc;
    let pods = status.waiting_pods();
    for_each_pod(status, pods, Pace::Sequential, |pod| async move {
        match spec.action {
            ReplicationAction::Add => {
                for (keyspace, rf) in &spec.replication_map {
                    session
                        .update_keyspace_replication_map(dc, &spec.dc_name, keyspace, *rf)
                        .await?;
                }
            }
            ReplicationAction::Remove => {
                session.remove_dc_from_replication_map(dc, &spec.dc_name).await?;
            }
        }
        info!(pod = %pod, target_dc = %spec.dc_name, action = ?spec.action, "Replication maps updated");
        Ok(())
    })
    .await;
    Ok(())
}
