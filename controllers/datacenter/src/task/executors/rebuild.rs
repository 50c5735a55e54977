//! Rebuild: streams data from another datacenter into every node, one node at a time.

use super::{Pace, Target, for_each_pod};
use crate::error::ControllerError;
use crds::{RebuildTaskSpec, TaskStatus};
use tracing::debug;

pub(super) async fn run(
    target: Target<'_>,
    spec: &RebuildTaskSpec,
    status: &mut TaskStatus,
) -> Result<(), ControllerError> {
    let src_dc = spec.src_dc_name.as_str();
    let keyspace = spec.keyspace.as_deref();
    let pods = status.waiting_pods();
    for_each_pod(status, pods, Pace::Sequential, |pod| async move {
        let host = target.host(&pod);
        // flush before streaming
        target.sidecar().flush(&host, keyspace).await?;
        debug!(pod = %pod, src_dc = src_dc, "Flushed, rebuilding");
        target.sidecar().rebuild(&host, src_dc, keyspace).await?;
        Ok(())
    })
    .await;
    Ok(())
}
