//! Cleanup: drops the data a node no longer owns, one node start every spacing interval.

use super::{Pace, Target, for_each_pod};
use crate::error::ControllerError;
use crds::{CleanupTaskSpec, TaskStatus};

pub(super) async fn run(
    target: Target<'_>,
    spec: &CleanupTaskSpec,
    status: &mut TaskStatus,
) -> Result<(), ControllerError> {
    let keyspace = spec.keyspace.as_deref();
    let pods = status.waiting_pods();
    for_each_pod(status, pods, Pace::Spaced(target.spacing()), |pod| async move {
        let host = target.host(&pod);
        target.sidecar().cleanup(&host, keyspace).await?;
        Ok(())
    })
    .await;
    Ok(())
}
