//! Operator configuration loaded from environment variables.

use crate::error::ControllerError;
use std::env;
use std::time::Duration;

/// Runtime settings of the operator.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace to watch, all namespaces when `None`
    pub namespace: Option<String>,
    /// Port of the node administrative sidecar
    pub sidecar_port: u16,
    /// `http` or `https`
    pub sidecar_scheme: String,
    /// Delay between two node operation starts for throttled executors
    pub task_node_spacing: Duration,
    /// Decommission attempts before the scale-down step fails
    pub decommission_max_attempts: u32,
    /// Fixed delay between decommission attempts
    pub decommission_retry_delay: Duration,
    /// Concurrent reconciliations per controller
    pub reconcile_concurrency: u16,
    /// Port of the `/healthz` and `/readyz` endpoints
    pub probe_port: u16,
    /// Requeue interval of tasks waiting for their datacenter
    pub waiting_task_requeue: Duration,
    /// Cassandra Reaper base URL, enables the Reaper plugin when set
    pub reaper_url: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            sidecar_port: 8080,
            sidecar_scheme: "http".to_string(),
            task_node_spacing: Duration::from_secs(10),
            decommission_max_attempts: 5,
            decommission_retry_delay: Duration::from_secs(2),
            reconcile_concurrency: 4,
            probe_port: 8081,
            waiting_task_requeue: Duration::from_secs(10),
            reaper_url: None,
        }
    }
}

impl OperatorConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sidecar_scheme = non_empty("SIDECAR_SCHEME").unwrap_or(defaults.sidecar_scheme);
        if sidecar_scheme != "http" && sidecar_scheme != "https" {
            return Err(ControllerError::InvalidConfig(format!(
                "SIDECAR_SCHEME must be http or https, got {sidecar_scheme}"
            )));
        }

        let decommission_max_attempts =
            parse_or(&non_empty, "DECOMMISSION_MAX_ATTEMPTS", defaults.decommission_max_attempts)?;
        if decommission_max_attempts == 0 {
            return Err(ControllerError::InvalidConfig(
                "DECOMMISSION_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            namespace: non_empty("WATCH_NAMESPACE"),
            sidecar_port: parse_or(&non_empty, "SIDECAR_PORT", defaults.sidecar_port)?,
            sidecar_scheme,
            task_node_spacing: Duration::from_secs(parse_or(&non_empty, "TASK_NODE_SPACING_SECS", 10)?),
            decommission_max_attempts,
            decommission_retry_delay: Duration::from_secs(parse_or(
                &non_empty,
                "DECOMMISSION_RETRY_DELAY_SECS",
                2,
            )?),
            reconcile_concurrency: parse_or(&non_empty, "RECONCILE_CONCURRENCY", defaults.reconcile_concurrency)?,
            probe_port: parse_or(&non_empty, "PROBE_PORT", defaults.probe_port)?,
            waiting_task_requeue: Duration::from_secs(parse_or(&non_empty, "WAITING_TASK_REQUEUE_SECS", 10)?),
            reaper_url: non_empty("REAPER_URL").map(|u| u.trim_end_matches('/').to_string()),
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{key} has an invalid value: {raw}"))
        }),
        None => Ok(default),
    }
}
