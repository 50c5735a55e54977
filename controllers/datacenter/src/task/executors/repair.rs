//! Repair: anti-entropy repair of every node, throttled like cleanup.

use super::{Pace, Target, for_each_pod};
use crate::error::ControllerError;
use crds::{RepairTaskSpec, TaskStatus};

pub(super) async fn run(
    target: Target<'_>,
    spec: &RepairTaskSpec,
    status: &mut TaskStatus,
) -> Result<(), ControllerError> {
    let keyspace = spec.keyspace.as_deref();
    let pods = status.waiting_pods();
    for_each_pod(status, pods, Pace::Spaced(target.spacing()), |pod| async move {
        let host = target.host(&pod);
        target.sidecar().repair(&host, keyspace).await?;
        Ok(())
    })
    .await;
    Ok(())
}
