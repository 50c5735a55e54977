//! Remove nodes: drops the ring members of another datacenter, through a single node.

use super::{Pace, Target, for_each_pod};
use crate::error::ControllerError;
use crds::{RemoveNodesTaskSpec, TaskStatus};

pub(super) async fn run(
    target: Target<'_>,
    spec: &RemoveNodesTaskSpec,
    status: &mut TaskStatus,
) -> Result<(), ControllerError> {
    let dc_name = spec.dc_name.as_str();
    let pods = status.waiting_pods();
    for_each_pod(status, pods, Pace::Sequential, |pod| async move {
        let host = target.host(&pod);
        target.sidecar().remove_dc_nodes(&host, dc_name).await?;
        Ok(())
    })
    .await;
    Ok(())
}
