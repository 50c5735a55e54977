//! Database session manager
//!
//! Keyspace replication and role management need a CQL session to the
//! datacenter. The operator binary ships without a CQL driver: production
//! wiring uses [`LoggingSessionManager`], which only logs the statements it
//! would run. Nothing is applied to the cluster. Replication tasks still end
//! SUCCEED and the status still records `keyspaceManagerReplicas`, so those
//! reflect the plan, not the schema.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{DatacenterSpec, ElassandraDatacenter};
use tracing::info;

/// Cluster-side schema operations used by the reconcilers.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Aligns the managed keyspaces' replication with the datacenter size.
    async fn reconcile_keyspaces(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError>;

    async fn reconcile_roles(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError>;

    async fn update_keyspace_replication_map(
        &self,
        dc: &ElassandraDatacenter,
        target_dc: &str,
        keyspace: &str,
        rf: i32,
    ) -> Result<(), ControllerError>;

    async fn remove_dc_from_replication_map(
        &self,
        dc: &ElassandraDatacenter,
        target_dc: &str,
    ) -> Result<(), ControllerError>;

    /// Lowers the managed keyspaces' RF so that `new_size` nodes can hold it.
    async fn decrease_rf_before_scaling_down(
        &self,
        dc: &ElassandraDatacenter,
        new_size: i32,
    ) -> Result<(), ControllerError>;
}

/// RF of a managed keyspace in a datacenter of `size` nodes.
pub fn effective_rf(requested: i32, size: i32) -> i32 {
    requested.min(size).max(0)
}

/// `ALTER KEYSPACE` statement setting the RF of `target_dc`.
pub fn alter_replication(keyspace: &str, target_dc: &str, rf: i32) -> String {
    format!(
        "ALTER KEYSPACE \"{keyspace}\" WITH replication = {{'class': 'NetworkTopologyStrategy', '{target_dc}': {rf}}}"
    )
}

/// Statements bringing every managed keyspace to its effective RF for `size` nodes.
pub fn keyspace_statements(spec: &DatacenterSpec, size: i32) -> Vec<String> {
    spec.managed_keyspaces
        .iter()
        .map(|ks| alter_replication(&ks.keyspace, &spec.datacenter_name, effective_rf(ks.rf, size)))
        .collect()
}

/// Session manager that logs the statements it would run, without applying them.
///
/// Every log line carries `applied = false`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSessionManager;

#[async_trait]
impl SessionManager for LoggingSessionManager {
    async fn reconcile_keyspaces(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
        let size = dc.status.as_ref().map_or(0, |s| s.ready_replicas);
        for statement in keyspace_statements(&dc.spec, size) {
            info!(datacenter = %dc.spec.datacenter_name, %statement, applied = false, "Keyspace replication not applied, no CQL session");
        }
        Ok(())
    }

    async fn reconcile_roles(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
        for role in &dc.spec.managed_roles {
            info!(
                datacenter = %dc.spec.datacenter_name,
                role = %role.username,
                superuser = role.superuser,
                applied = false,
                "Role not applied, no CQL session"
            );
        }
        Ok(())
    }

    async fn update_keyspace_replication_map(
        &self,
        dc: &ElassandraDatacenter,
        target_dc: &str,
        keyspace: &str,
        rf: i32,
    ) -> Result<(), ControllerError> {
        info!(
            datacenter = %dc.spec.datacenter_name,
            statement = %alter_replication(keyspace, target_dc, rf),
            applied = false,
            "Replication update not applied, no CQL session"
        );
        Ok(())
    }

    async fn remove_dc_from_replication_map(
        &self,
        dc: &ElassandraDatacenter,
        target_dc: &str,
    ) -> Result<(), ControllerError> {
        for ks in &dc.spec.managed_keyspaces {
            info!(
                datacenter = %dc.spec.datacenter_name,
                statement = %alter_replication(&ks.keyspace, target_dc, 0),
                applied = false,
                "Replication removal not applied, no CQL session"
            );
        }
        Ok(())
    }

    async fn decrease_rf_before_scaling_down(
        &self,
        dc: &ElassandraDatacenter,
        new_size: i32,
    ) -> Result<(), ControllerError> {
        for statement in keyspace_statements(&dc.spec, new_size) {
            info!(datacenter = %dc.spec.datacenter_name, %statement, new_size, applied = false, "RF decrease not applied, no CQL session");
        }
        Ok(())
    }
}
