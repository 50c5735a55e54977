//! Cassandra Reaper registration
//!
//! Registers the cluster in a Reaper instance through its REST API so that
//! repairs can be scheduled there.

use super::Plugin;
use crate::error::ControllerError;
use crate::naming;
use async_trait::async_trait;
use crds::ElassandraDatacenter;
use kube::ResourceExt;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ReaperPlugin {
    client: Client,
    base_url: String,
}

impl ReaperPlugin {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ControllerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ControllerError::InvalidConfig(format!("Reaper HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn seed_host(dc: &ElassandraDatacenter) -> String {
        let namespace = dc.namespace().unwrap_or_default();
        let pod = naming::pod_name(&dc.spec, 0, 0);
        naming::pod_host(&dc.spec, &namespace, &pod)
    }
}

#[async_trait]
impl Plugin for ReaperPlugin {
    fn name(&self) -> &'static str {
        "reaper"
    }

    fn enabled(&self, dc: &ElassandraDatacenter) -> bool {
        dc.spec.reaper.as_ref().is_some_and(|r| r.enabled)
    }

    async fn register(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
        let url = format!("{}/cluster", self.base_url);
        let seed = Self::seed_host(dc);
        debug!(%url, %seed, "Registering cluster in Reaper");
        let response = self
            .client
            .post(&url)
            .query(&[("seedHost", seed.as_str())])
            .send()
            .await
            .map_err(|e| ControllerError::Plugin(format!("reaper: {e}")))?;
        let status = response.status();
        // 409: already registered
        if status.is_success() || status.as_u16() == 409 {
            Ok(())
        } else {
            Err(ControllerError::Plugin(format!("reaper returned {status} for {url}")))
        }
    }

    async fn unregister(&self, dc: &ElassandraDatacenter) -> Result<(), ControllerError> {
        let url = format!("{}/cluster/{}", self.base_url, dc.spec.cluster_name);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ControllerError::Plugin(format!("reaper: {e}")))?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            Ok(())
        } else {
            Err(ControllerError::Plugin(format!("reaper returned {status} for {url}")))
        }
    }
}
