//! Elassandra Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Elassandra datacenter operator:
//! - `ElassandraDatacenter`: desired topology of one datacenter plus its observed status
//! - `ElassandraTask`: a maintenance operation (cleanup, repair, backup, ...) run against a datacenter

pub mod block;
pub mod datacenter;
pub mod rack;
pub mod task;

pub use block::*;
pub use datacenter::*;
pub use rack::*;
pub use task::*;

/// API group shared by every CRD of the operator
pub const API_GROUP: &str = "elassandra.strapdata.com";
