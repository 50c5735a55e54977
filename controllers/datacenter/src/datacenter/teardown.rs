//! Datacenter deletion
//!
//! Runs while the datacenter carries the operator finalizer and a deletion
//! timestamp. Child resources are garbage collected through their owner
//! references, so only cluster-side state and side services are cleaned up.

use crate::context::Context;
use crate::error::ControllerError;
use crate::naming;
use crate::store::ObjectKey;
use crds::ElassandraDatacenter;
use kube::ResourceExt;
use tracing::{info, warn};

/// Cancels backups, removes the datacenter from the replication maps,
/// unregisters plugins, then releases the finalizer.
///
/// Cleanup failures are logged and do not hold the deletion back.
pub async fn run(ctx: &Context, key: &ObjectKey, dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
    if !dc.finalizers().iter().any(|f| f == naming::FINALIZER) {
        return Ok(());
    }
    info!(datacenter = %key, "Tearing down datacenter");

    ctx.backups.cancel_backups(key);

    let bootstrapped = dc.status.as_ref().is_some_and(|s| s.bootstrapped);
    if bootstrapped {
        if let Err(e) = ctx
            .session
            .remove_dc_from_replication_map(dc, &dc.spec.datacenter_name)
            .await
        {
            warn!(datacenter = %key, error = %e, "Failed to remove datacenter from replication maps");
        }
    }

    if let Err(e) = ctx.plugins.delete_all(dc).await {
        warn!(datacenter = %key, error = %e, "Failed to unregister plugins");
    }

    ctx.store.remove_finalizer(key).await?;
    info!(datacenter = %key, "Finalizer removed");
    Ok(())
}
