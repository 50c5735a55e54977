//! Controller-specific error types.
//!
//! This module defines the errors raised by the Elassandra operator that are
//! not covered by upstream library errors.

use kube::Error as KubeError;
use sidecar_client::SidecarError;
use thiserror::Error;

/// Errors that can occur in the Elassandra operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Node administrative endpoint error
    #[error("Sidecar error: {0}")]
    Sidecar(#[from] SidecarError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local I/O error (probe listener)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid operator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid desired spec
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// No zone can take the requested scale step
    #[error("No eligible zone: {0}")]
    NoEligibleZone(String),

    /// Stale resource version on write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Node decommission failed after retries
    #[error("Decommission failed: {0}")]
    Decommission(String),

    /// Database session operation failed
    #[error("Session error: {0}")]
    Session(String),

    /// Plugin registration failed
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Backup scheduling or execution failed
    #[error("Backup error: {0}")]
    Backup(String),

    /// Observed state violates a reconciliation invariant
    #[error("Inconsistent state: {0}")]
    Inconsistent(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Transient errors clear up on their own and are worth re-driving.
    ///
    /// Configuration errors (bad spec, no eligible zone, broken invariants)
    /// need a spec change or an external resubmission instead.
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Kube(_)
            | ControllerError::Sidecar(_)
            | ControllerError::Io(_)
            | ControllerError::Conflict(_)
            | ControllerError::Decommission(_)
            | ControllerError::Session(_)
            | ControllerError::Plugin(_)
            | ControllerError::Backup(_)
            | ControllerError::Watch(_) => true,
            ControllerError::Serialization(_)
            | ControllerError::InvalidConfig(_)
            | ControllerError::InvalidSpec(_)
            | ControllerError::NoEligibleZone(_)
            | ControllerError::NotFound(_)
            | ControllerError::Inconsistent(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ControllerError::Conflict("dc1".to_string()).is_transient());
        assert!(ControllerError::Decommission("node".to_string()).is_transient());
        assert!(ControllerError::Sidecar(SidecarError::Unavailable("down".to_string())).is_transient());
        assert!(!ControllerError::InvalidSpec("replicas".to_string()).is_transient());
        assert!(!ControllerError::NoEligibleZone("scale up".to_string()).is_transient());
        assert!(!ControllerError::Inconsistent("scale".to_string()).is_transient());
    }
}
