//! Main controller implementation.
//!
//! Builds the shared [`Context`] from the operator configuration, spawns the
//! datacenter and task watchers plus the probe server, and waits for either
//! one of them to exit or a shutdown signal.

use crate::backup_scheduler::CronBackupScheduler;
use crate::config::OperatorConfig;
use crate::context::Context;
use crate::error::ControllerError;
use crate::plugins::{PluginRegistry, ReaperPlugin};
use crate::probes;
use crate::session::LoggingSessionManager;
use crate::store::{KubeStore, ResourceStore};
use crate::watcher::Watcher;
use crds::{ElassandraDatacenter, ElassandraTask};
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::ListParams;
use kube::{Api, Client};
use sidecar_client::SidecarClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Upper bound on the wait for in-flight passes at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Main controller for Elassandra datacenters and tasks.
#[derive(Debug)]
pub struct Controller {
    ctx: Arc<Context>,
    datacenter_watcher: JoinHandle<Result<(), ControllerError>>,
    task_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing Elassandra Operator");

        let client = Client::try_default().await?;

        let namespace = config.namespace.clone();
        let datacenter_api: Api<ElassandraDatacenter> = api(&client, namespace.as_deref());
        let task_api: Api<ElassandraTask> = api(&client, namespace.as_deref());
        let statefulset_api: Api<StatefulSet> = api(&client, namespace.as_deref());

        // Fail fast when the CRDs are missing rather than spinning on watch errors
        for (kind, probe) in [
            ("ElassandraDatacenter", datacenter_api.list(&ListParams::default().limit(1)).await.map(|_| ())),
            ("ElassandraTask", task_api.list(&ListParams::default().limit(1)).await.map(|_| ())),
        ] {
            if let Err(e) = probe {
                error!("Cannot list {} resources: {}", kind, e);
                error!("Please ensure the CRDs are installed (cargo run --bin crdgen | kubectl apply -f -)");
                return Err(ControllerError::InvalidConfig(format!("{kind} CRD not available: {e}")));
            }
        }

        let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::new(client));
        let sidecar = SidecarClient::new(config.sidecar_scheme.clone(), config.sidecar_port)?;

        let mut plugins = PluginRegistry::new();
        if let Some(url) = &config.reaper_url {
            info!("Reaper plugin enabled at {}", url);
            plugins = plugins.with(ReaperPlugin::new(url.clone())?);
        }

        warn!("No CQL session configured: keyspace, role and replication changes are logged, not applied");
        let backups = Arc::new(CronBackupScheduler::new(Arc::clone(&store)));
        let probe_port = config.probe_port;
        let ctx = Arc::new(Context::new(
            store,
            Arc::new(sidecar),
            Arc::new(LoggingSessionManager),
            plugins,
            backups,
            config,
        ));

        let watcher_instance = Arc::new(Watcher::new(
            Arc::clone(&ctx),
            datacenter_api,
            task_api,
            statefulset_api,
        ));

        let datacenter_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_datacenters().await })
        };

        let task_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_tasks().await })
        };

        let probe_server = tokio::spawn(probes::serve(probe_port, ctx.gate.clone()));

        Ok(Self {
            ctx,
            datacenter_watcher,
            task_watcher,
            probe_server,
        })
    }

    /// Runs until a watcher exits or the process is asked to stop.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Elassandra Operator running");

        tokio::select! {
            result = &mut self.datacenter_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ElassandraDatacenter watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("ElassandraDatacenter watcher error: {}", e)))?;
            }
            result = &mut self.task_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ElassandraTask watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("ElassandraTask watcher error: {}", e)))?;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))??;
            }
            () = shutdown_signal() => {
                self.drain().await;
            }
        }

        Ok(())
    }

    async fn drain(&self) {
        info!(in_flight = self.ctx.gate.in_flight(), "Shutdown requested, draining reconciliations");
        self.ctx.gate.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.ctx.gate.drained()).await.is_err() {
            warn!(
                in_flight = self.ctx.gate.in_flight(),
                "Drain timed out, abandoning in-flight passes"
            );
        } else {
            info!("All reconciliations drained");
        }
        self.datacenter_watcher.abort();
        self.task_watcher.abort();
        self.probe_server.abort();
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
