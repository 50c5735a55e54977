//! Elassandra Operator
//!
//! Kubernetes operator managing Elassandra datacenters:
//! - ElassandraDatacenter: racks as StatefulSets spread over zones, scaled one
//!   node at a time, rolled on configuration changes, parked and unparked
//! - ElassandraTask: maintenance operations (cleanup, repair, backup, rebuild,
//!   decommission, replication, node removal) run under the datacenter's block

mod backoff;
mod backup_scheduler;
mod config;
mod context;
mod controller;
mod datacenter;
mod error;
mod naming;
mod plugins;
mod probes;
mod retry;
mod session;
mod shutdown;
mod store;
mod task;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Elassandra Operator");

    let config = OperatorConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Sidecar: {}://<pod>:{}", config.sidecar_scheme, config.sidecar_port);
    info!("  Reconcile concurrency: {}", config.reconcile_concurrency);
    info!("  Probe port: {}", config.probe_port);
    info!("  Reaper: {}", config.reaper_url.as_deref().unwrap_or("disabled"));

    let controller = Controller::new(config).await?;
    controller.run().await?;

    info!("Elassandra Operator stopped");
    Ok(())
}
