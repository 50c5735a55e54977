//! SidecarClient trait for mocking
//!
//! This trait abstracts the SidecarClient to enable mocking in unit tests.
//! The concrete SidecarClient implements this trait, and tests can use mock implementations.

use crate::error::SidecarError;
use crate::models::*;

/// Trait for per-node administrative operations
///
/// Every method targets a single node identified by its host name. Calls are
/// idempotent from the caller's perspective and can be retried.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait SidecarClientTrait: Send + Sync {
    /// Current operating mode of the node
    async fn operation_mode(&self, host: &str) -> Result<OperationMode, SidecarError>;

    /// Stream the node's data to the rest of the ring and leave it
    async fn decommission(&self, host: &str) -> Result<(), SidecarError>;

    /// Remove data the node no longer owns
    async fn cleanup(&self, host: &str, keyspace: Option<&str>) -> Result<(), SidecarError>;

    /// Primary-range repair
    async fn repair(&self, host: &str, keyspace: Option<&str>) -> Result<(), SidecarError>;

    /// Flush memtables to disk
    async fn flush(&self, host: &str, keyspace: Option<&str>) -> Result<(), SidecarError>;

    /// Stream data from another datacenter
    async fn rebuild(&self, host: &str, src_dc: &str, keyspace: Option<&str>) -> Result<(), SidecarError>;

    /// Remove every node of a (dead) datacenter from the ring
    async fn remove_dc_nodes(&self, host: &str, dc_name: &str) -> Result<(), SidecarError>;

    /// Snapshot and upload the node's data
    async fn backup(&self, host: &str, request: &BackupRequest) -> Result<BackupResponse, SidecarError>;
}
