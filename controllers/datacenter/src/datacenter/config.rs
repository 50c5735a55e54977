//! Rack configuration rendering and configuration fingerprint.
//!
//! The fingerprint covers the spec fields that require a rolling restart when
//! they change, plus the datacenter-wide generated configuration. Replica
//! counts, seeds and housekeeping settings (keyspaces, roles, backups,
//! plugins) are left out so that changing them never restarts a rack.

use crate::error::ControllerError;
use crds::{DatacenterSpec, ElasticsearchSpec, ResourceSpec, SecuritySpec, ZonePlacement};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Spec fields a running node reads at startup
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintInput<'a> {
    cluster_name: &'a str,
    datacenter_name: &'a str,
    image: &'a str,
    placement: ZonePlacement,
    security: &'a SecuritySpec,
    elasticsearch: &'a ElasticsearchSpec,
    resources: Option<&'a ResourceSpec>,
    data_volume_size: Option<&'a str>,
    jvm_options: &'a [String],
    config: &'a BTreeMap<String, String>,
}

/// Datacenter-wide configuration shared by every rack.
pub fn datacenter_config(spec: &DatacenterSpec) -> BTreeMap<String, String> {
    let mut config = BTreeMap::new();
    config.insert("CASSANDRA_CLUSTER_NAME".to_string(), spec.cluster_name.clone());
    config.insert("CASSANDRA_DC".to_string(), spec.datacenter_name.clone());
    config.insert(
        "CASSANDRA_ENDPOINT_SNITCH".to_string(),
        "GossipingPropertyFileSnitch".to_string(),
    );
    config.insert(
        "CASSANDRA_AUTHENTICATOR".to_string(),
        if spec.security.authentication {
            "PasswordAuthenticator"
        } else {
            "AllowAllAuthenticator"
        }
        .to_string(),
    );
    config.insert(
        "CASSANDRA_SSL_ENABLED".to_string(),
        spec.security.ssl.to_string(),
    );
    config.insert(
        "CASSANDRA_ENCRYPTION_ENABLED".to_string(),
        spec.security.encryption.to_string(),
    );
    config.insert(
        "ELASTICSEARCH_ENABLED".to_string(),
        spec.elasticsearch.enabled.to_string(),
    );
    config.insert(
        "ELASTICSEARCH_ENTERPRISE".to_string(),
        spec.elasticsearch.enterprise.to_string(),
    );
    if !spec.jvm_options.is_empty() {
        config.insert("JVM_OPTS".to_string(), spec.jvm_options.join(" "));
    }
    for (key, value) in &spec.user_config {
        config.insert(key.clone(), value.clone());
    }
    config
}

/// Configuration of one rack: the datacenter configuration plus rack identity.
pub fn rack_config(spec: &DatacenterSpec, rack: &str) -> BTreeMap<String, String> {
    let mut config = datacenter_config(spec);
    config.insert("CASSANDRA_RACK".to_string(), rack.to_string());
    config
}

/// Short hash of the restart-relevant spec fields and generated configuration.
pub fn fingerprint(spec: &DatacenterSpec) -> Result<String, ControllerError> {
    let config = datacenter_config(spec);
    let input = FingerprintInput {
        cluster_name: &spec.cluster_name,
        datacenter_name: &spec.datacenter_name,
        image: &spec.image,
        placement: spec.placement,
        security: &spec.security,
        elasticsearch: &spec.elasticsearch,
        resources: spec.resources.as_ref(),
        data_volume_size: spec.data_volume_size.as_deref(),
        jvm_options: &spec.jvm_options,
        config: &config,
    };
    // struct fields and BTreeMap keys serialize in a fixed order
    let canonical = serde_json::to_vec(&input)?;
    let digest = Sha256::digest(&canonical);
    Ok(digest.iter().take(4).map(|b| format!("{b:02x}")).collect())
}
