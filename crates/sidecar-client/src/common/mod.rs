//! Common utilities for the sidecar API client
//!
//! Provides shared request plumbing used by every operation.

use crate::error::SidecarError;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

/// HTTP client wrapper addressing node sidecars by host name
pub struct HttpClient {
    client: Client,
    scheme: String,
    port: u16,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, scheme: String, port: u16) -> Self {
        Self {
            client,
            scheme,
            port,
        }
    }

    /// Sidecar port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Build a full URL for `path` on `host`, appending non-empty query parameters
    pub fn build_url(&self, host: &str, path: &str, query: &[(&str, Option<&str>)]) -> String {
        let mut url = format!("{}://{}:{}{}", self.scheme, host, self.port, path);
        let params: Vec<String> = query
            .iter()
            .filter_map(|(k, v)| v.map(|v| format!("{}={}", k, urlencoding::encode(v))))
            .collect();
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    /// POST an operation that returns no body
    pub async fn post_operation(
        &self,
        host: &str,
        path: &str,
        query: &[(&str, Option<&str>)],
    ) -> Result<(), SidecarError> {
        let url = self.build_url(host, path, query);
        debug!("POST {}", url);

        let response = self.client.post(&url).send().await.map_err(|e| {
            if e.is_connect() {
                SidecarError::Unavailable(format!("{}: {}", host, e))
            } else {
                SidecarError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SidecarError::Api {
                host: host.to_string(),
                message: format!("POST {} failed: {} - {}", path, status, body),
            });
        }
        Ok(())
    }

    /// POST a JSON body and decode a JSON response
    pub async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        host: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, SidecarError> {
        let url = self.build_url(host, path, &[]);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SidecarError::Api {
                host: host.to_string(),
                message: format!("POST {} failed: {} - {}", path, status, body),
            });
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// GET a JSON document
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, host: &str, path: &str) -> Result<T, SidecarError> {
        let url = self.build_url(host, path, &[]);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SidecarError::Api {
                host: host.to_string(),
                message: format!("GET {} failed: {} - {}", path, status, body),
            });
        }

        response.json().await.map_err(SidecarError::Http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_skips_absent_params() {
        let http = HttpClient::new(Client::new(), "http".to_string(), 8080);
        assert_eq!(
            http.build_url("node-0", "/operations/cleanup", &[("keyspace", None)]),
            "http://node-0:8080/operations/cleanup"
        );
        assert_eq!(
            http.build_url(
                "node-0",
                "/operations/rebuild",
                &[("source_dc", Some("dc 2")), ("keyspace", Some("ks1"))]
            ),
            "http://node-0:8080/operations/rebuild?source_dc=dc%202&keyspace=ks1"
        );
    }
}
