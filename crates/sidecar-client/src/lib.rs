//! Elassandra Sidecar Client
//!
//! Client for the administrative HTTP API exposed by the sidecar container
//! running next to every Elassandra node. Each call targets one node and maps
//! onto a nodetool-like operation.
//!
//! # Example
//!
//! ```no_run
//! use sidecar_client::{SidecarClient, SidecarClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SidecarClient::new("http".to_string(), 8080)?;
//!
//! // Flush then clean up one keyspace on a node
//! let host = "cl1-dc1-zone-a-0.elassandra-cl1-dc1.default.svc.cluster.local";
//! client.flush(host, Some("ks1")).await?;
//! client.cleanup(host, Some("ks1")).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod sidecar_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::SidecarClient;
pub use common::HttpClient;
pub use error::SidecarError;
pub use models::*;
pub use sidecar_trait::SidecarClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockSidecarClient, SidecarCall};
