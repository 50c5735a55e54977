//! Sidecar REST API client

use crate::common::HttpClient;
use crate::error::SidecarError;
use crate::models::*;
use crate::sidecar_trait::SidecarClientTrait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

/// Sidecar REST API client
///
/// Long-running operations (repair, rebuild, decommission) block until the node
/// reports completion, so no overall request timeout is set.
pub struct SidecarClient {
    http: HttpClient,
}

impl SidecarClient {
    /// Create a new sidecar client reaching every node on `scheme://<host>:<port>`
    pub fn new(scheme: String, port: u16) -> Result<Self, SidecarError> {
        if scheme != "http" && scheme != "https" {
            return Err(SidecarError::InvalidRequest(format!(
                "unsupported sidecar scheme: {}",
                scheme
            )));
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http: HttpClient::new(client, scheme, port),
        })
    }
}

#[async_trait::async_trait]
impl SidecarClientTrait for SidecarClient {
    async fn operation_mode(&self, host: &str) -> Result<OperationMode, SidecarError> {
        self.http.get(host, "/status/operation-mode").await
    }

    async fn decommission(&self, host: &str) -> Result<(), SidecarError> {
        info!("Decommissioning node {}", host);
        self.http.post_operation(host, "/operations/decommission", &[]).await
    }

    async fn cleanup(&self, host: &str, keyspace: Option<&str>) -> Result<(), SidecarError> {
        info!("Cleanup on {} (keyspace: {})", host, keyspace.unwrap_or("all"));
        self.http
            .post_operation(host, "/operations/cleanup", &[("keyspace", keyspace)])
            .await
    }

    async fn repair(&self, host: &str, keyspace: Option<&str>) -> Result<(), SidecarError> {
        info!("Repair on {} (keyspace: {})", host, keyspace.unwrap_or("all"));
        self.http
            .post_operation(host, "/operations/repair", &[("keyspace", keyspace)])
            .await
    }

    async fn flush(&self, host: &str, keyspace: Option<&str>) -> Result<(), SidecarError> {
        self.http
            .post_operation(host, "/operations/flush", &[("keyspace", keyspace)])
            .await
    }

    async fn rebuild(&self, host: &str, src_dc: &str, keyspace: Option<&str>) -> Result<(), SidecarError> {
        if src_dc.is_empty() {
            return Err(SidecarError::InvalidRequest("rebuild requires a source datacenter".to_string()));
        }
        info!("Rebuild of {} from {}", host, src_dc);
        self.http
            .post_operation(
                host,
                "/operations/rebuild",
                &[("source_dc", Some(src_dc)), ("keyspace", keyspace)],
            )
            .await
    }

    async fn remove_dc_nodes(&self, host: &str, dc_name: &str) -> Result<(), SidecarError> {
        info!("Removing nodes of datacenter {} via {}", dc_name, host);
        self.http
            .post_operation(host, "/operations/remove-dc-nodes", &[("dc", Some(dc_name))])
            .await
    }

    async fn backup(&self, host: &str, request: &BackupRequest) -> Result<BackupResponse, SidecarError> {
        info!("Backup {} of {} to {}", request.snapshot_tag, host, request.repository);
        let body = serde_json::to_value(request)?;
        self.http.post_json(host, "/backups", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_scheme() {
        assert!(SidecarClient::new("ftp".to_string(), 8080).is_err());
        assert!(SidecarClient::new("https".to_string(), 8443).is_ok());
    }
}
