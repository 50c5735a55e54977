//! Shared reconciliation context.

use crate::backoff::BackoffTracker;
use crate::backup_scheduler::BackupScheduler;
use crate::config::OperatorConfig;
use crate::plugins::PluginRegistry;
use crate::retry::RetryPolicy;
use crate::session::SessionManager;
use crate::shutdown::ShutdownGate;
use crate::store::ResourceStore;
use sidecar_client::SidecarClientTrait;
use std::sync::Arc;

/// Collaborators and settings shared by both reconcilers.
pub struct Context {
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) sidecar: Arc<dyn SidecarClientTrait>,
    pub(crate) session: Arc<dyn SessionManager>,
    pub(crate) plugins: PluginRegistry,
    pub(crate) backups: Arc<dyn BackupScheduler>,
    pub(crate) config: OperatorConfig,
    pub(crate) gate: ShutdownGate,
    /// Requeue delays of objects whose pass returned an error
    pub(crate) backoff: BackoffTracker,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("plugins", &self.plugins)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        sidecar: Arc<dyn SidecarClientTrait>,
        session: Arc<dyn SessionManager>,
        plugins: PluginRegistry,
        backups: Arc<dyn BackupScheduler>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            sidecar,
            session,
            plugins,
            backups,
            config,
            gate: ShutdownGate::new(),
            backoff: BackoffTracker::default(),
        }
    }

    /// Retry policy of the decommission call issued by a scale-down.
    pub fn decommission_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.decommission_max_attempts,
            self.config.decommission_retry_delay,
        )
    }
}
