//! Decommission: removes every node of the datacenter from the ring.
//!
//! Nodes leave one at a time, highest ordinal first. A node the sidecar
//! already reports as decommissioned is skipped, so a resumed task does not
//! decommission twice.

use super::{Pace, Target, for_each_pod};
use crate::error::ControllerError;
use crds::{DecommissionTaskSpec, TaskStatus};
use sidecar_client::OperationMode;
use std::cmp::Reverse;
use tracing::{debug, info};

pub(super) async fn run(
    target: Target<'_>,
    spec: &DecommissionTaskSpec,
    status: &mut TaskStatus,
) -> Result<(), ControllerError> {
    let dc = target.dc;
    let bootstrapped = dc.status.as_ref().is_some_and(|s| s.bootstrapped);
    if spec.remove_from_replication && bootstrapped {
        info!(datacenter = %dc.spec.datacenter_name, "Removing datacenter from replication maps");
        target
            .ctx
            .session
            .remove_dc_from_replication_map(dc, &dc.spec.datacenter_name)
            .await?;
    }

    let mut pods = status.waiting_pods();
    pods.sort_by_key(|pod| Reverse(ordinal_key(pod)));
    for_each_pod(status, pods, Pace::Sequential, |pod| async move {
        let host = target.host(&pod);
        if target.sidecar().operation_mode(&host).await? == OperationMode::Decommissioned {
            debug!(pod = %pod, "Already decommissioned");
            return Ok(());
        }
        target.sidecar().decommission(&host).await?;
        Ok(())
    })
    .await;
    Ok(())
}

/// (ordinal, rack index) parsed from a `<base>-<rack>-<ordinal>` pod name.
pub(super) fn ordinal_key(pod: &str) -> (i32, i32) {
    let mut parts = pod.rsplit('-').map(|p| p.parse::<i32>().unwrap_or(-1));
    let ordinal = parts.next().unwrap_or(-1);
    let rack = parts.next().unwrap_or(-1);
    (ordinal, rack)
}
