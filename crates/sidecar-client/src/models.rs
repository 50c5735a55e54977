//! Sidecar API request and response models

use serde::{Deserialize, Serialize};

/// Snapshot upload request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
    /// Snapshot tag
    pub snapshot_tag: String,

    /// Target repository (e.g. "s3://bucket/prefix")
    pub repository: String,

    /// Keyspaces to back up, all when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyspaces: Vec<String>,
}

/// Outcome of a node backup
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    Succeed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupResponse {
    pub status: BackupStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Node operating mode as reported by the sidecar
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationMode {
    Starting,
    Normal,
    Joining,
    Leaving,
    Decommissioned,
    Draining,
    Drained,
}
