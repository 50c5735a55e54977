//! Mock SidecarClient for unit testing
//!
//! Records every call in order and can be configured to fail on given hosts,
//! so executors can be tested without running Elassandra nodes.

use crate::error::SidecarError;
use crate::models::*;
use crate::sidecar_trait::SidecarClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A recorded sidecar call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidecarCall {
    Decommission { host: String },
    Cleanup { host: String, keyspace: Option<String> },
    Repair { host: String, keyspace: Option<String> },
    Flush { host: String, keyspace: Option<String> },
    Rebuild { host: String, src_dc: String, keyspace: Option<String> },
    RemoveDcNodes { host: String, dc_name: String },
    Backup { host: String, snapshot_tag: String },
}

impl SidecarCall {
    /// Host the call targeted
    pub fn host(&self) -> &str {
        match self {
            SidecarCall::Decommission { host }
            | SidecarCall::Cleanup { host, .. }
            | SidecarCall::Repair { host, .. }
            | SidecarCall::Flush { host, .. }
            | SidecarCall::Rebuild { host, .. }
            | SidecarCall::RemoveDcNodes { host, .. }
            | SidecarCall::Backup { host, .. } => host,
        }
    }
}

/// Mock SidecarClient for testing
#[derive(Clone, Default)]
pub struct MockSidecarClient {
    calls: Arc<Mutex<Vec<SidecarCall>>>,
    // host -> remaining failures (None = always fail)
    failures: Arc<Mutex<HashMap<String, Option<u32>>>>,
    modes: Arc<Mutex<HashMap<String, OperationMode>>>,
}

impl MockSidecarClient {
    /// Create a new mock client where every call succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `host` fail
    pub fn fail_host(&self, host: impl Into<String>) {
        self.failures.lock().unwrap().insert(host.into(), None);
    }

    /// Make the next `count` calls to `host` fail
    pub fn fail_host_times(&self, host: impl Into<String>, count: u32) {
        self.failures.lock().unwrap().insert(host.into(), Some(count));
    }

    /// Set the operating mode reported for `host`
    pub fn set_operation_mode(&self, host: impl Into<String>, mode: OperationMode) {
        self.modes.lock().unwrap().insert(host.into(), mode);
    }

    /// Calls recorded so far, in order
    pub fn calls(&self) -> Vec<SidecarCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: SidecarCall) -> Result<(), SidecarError> {
        let host = call.host().to_string();
        self.calls.lock().unwrap().push(call);

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&host) {
            Some(None) => Err(SidecarError::Unavailable(host)),
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(SidecarError::Unavailable(host))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl SidecarClientTrait for MockSidecarClient {
    async fn operation_mode(&self, host: &str) -> Result<OperationMode, SidecarError> {
        Ok(self
            .modes
            .lock()
            .unwrap()
            .get(host)
            .copied()
            .unwrap_or(OperationMode::Normal))
    }

    async fn decommission(&self, host: &str) -> Result<(), SidecarError> {
        self.record(SidecarCall::Decommission { host: host.to_string() })
    }

    async fn cleanup(&self, host: &str, keyspace: Option<&str>) -> Result<(), SidecarError> {
        self.record(SidecarCall::Cleanup {
            host: host.to_string(),
            keyspace: keyspace.map(str::to_string),
        })
    }

    async fn repair(&self, host: &str, keyspace: Option<&str>) -> Result<(), SidecarError> {
        self.record(SidecarCall::Repair {
            host: host.to_string(),
            keyspace: keyspace.map(str::to_string),
        })
    }

    async fn flush(&self, host: &str, keyspace: Option<&str>) -> Result<(), SidecarError> {
        self.record(SidecarCall::Flush {
            host: host.to_string(),
            keyspace: keyspace.map(str::to_string),
        })
    }

    async fn rebuild(&self, host: &str, src_dc: &str, keyspace: Option<&str>) -> Result<(), SidecarError> {
        self.record(SidecarCall::Rebuild {
            host: host.to_string(),
            src_dc: src_dc.to_string(),
            keyspace: keyspace.map(str::to_string),
        })
    }

    async fn remove_dc_nodes(&self, host: &str, dc_name: &str) -> Result<(), SidecarError> {
        self.record(SidecarCall::RemoveDcNodes {
            host: host.to_string(),
            dc_name: dc_name.to_string(),
        })
    }

    async fn backup(&self, host: &str, request: &BackupRequest) -> Result<BackupResponse, SidecarError> {
        self.record(SidecarCall::Backup {
            host: host.to_string(),
            snapshot_tag: request.snapshot_tag.clone(),
        })?;
        Ok(BackupResponse {
            status: BackupStatus::Succeed,
            message: None,
        })
    }
}
