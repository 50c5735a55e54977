//! Datacenter plugins
//!
//! Auxiliary services registered once a datacenter is fully ready, and
//! unregistered when the plugin gets disabled or the datacenter is deleted.
//! The registry reports which plugins are registered; the datacenter
//! reconciler persists that set in the status.

mod reaper;

pub use reaper::ReaperPlugin;

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::ElassandraDatacenter;
use std::collections::BTreeSet;
use tracing::{info, warn};

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn enabled(&self, dc: &ElassandraDatacenter) -> bool;

    async fn register(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError>;

    async fn unregister(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError>;
}

/// Ordered set of plugins.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.plugins.iter().map(|p| p.name())).finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Registers enabled plugins and unregisters disabled ones.
    ///
    /// `registered` holds the names persisted in the status and is updated in
    /// place. A failing plugin is logged and retried on the next pass.
    /// Returns true if `registered` changed.
    pub async fn reconcile_all(
        &self,
        dc: &ElassandraDatacenter,
        registered: &mut BTreeSet<String>,
    ) -> bool {
        let mut changed = false;
        for plugin in &self.plugins {
            let name = plugin.name();
            let is_registered = registered.contains(name);
            if plugin.enabled(dc) && !is_registered {
                match plugin.register(dc).await {
                    Ok(()) => {
                        info!(plugin = name, datacenter = %dc.spec.datacenter_name, "Plugin registered");
                        registered.insert(name.to_string());
                        changed = true;
                    }
                    Err(e) => warn!(plugin = name, error = %e, "Plugin registration failed"),
                }
            } else if !plugin.enabled(dc) && is_registered {
                match plugin.unregister(dc).await {
                    Ok(()) => {
                        info!(plugin = name, datacenter = %dc.spec.datacenter_name, "Plugin unregistered");
                        registered.remove(name);
                        changed = true;
                    }
                    Err(e) => warn!(plugin = name, error = %e, "Plugin removal failed"),
                }
            }
        }
        changed
    }

    /// Unregisters every plugin recorded in the status.
    pub async fn delete_all(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
        let registered = dc
            .status
            .as_ref()
            .map(|s| s.registered_plugins.clone())
            .unwrap_or_default();
        let mut failures = Vec::new();
        for plugin in self.plugins.iter().filter(|p| registered.contains(p.name())) {
            if let Err(e) = plugin.unregister(dc).await {
                failures.push(format!("{}: {e}", plugin.name()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::Plugin(failures.join(", ")))
        }
    }
}
