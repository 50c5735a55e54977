//! Sidecar client errors

use thiserror::Error;

/// Errors that can occur when calling a node sidecar
#[derive(Debug, Error)]
pub enum SidecarError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The sidecar answered with a non-success status
    #[error("Sidecar API error on {host}: {message}")]
    Api { host: String, message: String },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The node is not reachable or not ready to accept operations
    #[error("Node unavailable: {0}")]
    Unavailable(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
