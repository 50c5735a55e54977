//! Names, labels and DNS addresses of the resources owned by a datacenter.

use crds::DatacenterSpec;
use std::collections::BTreeMap;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "elassandra-operator";
pub const DATACENTER_LABEL: &str = "elassandra.strapdata.com/datacenter";
pub const CLUSTER_LABEL: &str = "elassandra.strapdata.com/cluster";
pub const RACK_LABEL: &str = "elassandra.strapdata.com/rack";
pub const RACK_INDEX_LABEL: &str = "elassandra.strapdata.com/rack-index";
pub const FINGERPRINT_ANNOTATION: &str = "elassandra.strapdata.com/config-fingerprint";
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const FINALIZER: &str = "elassandra.strapdata.com/finalizer";

/// Zone assigned to nodes carrying no zone label.
pub const DEFAULT_ZONE: &str = "default";

/// `elassandra-<cluster>-<dc>`, lowercased
pub fn base_name(spec: &DatacenterSpec) -> String {
    format!("elassandra-{}-{}", spec.cluster_name, spec.datacenter_name).to_lowercase()
}

/// Headless service resolving the pods of every rack
pub fn service_name(spec: &DatacenterSpec) -> String {
    base_name(spec)
}

/// StatefulSet backing rack `rack_index`
pub fn workload_set_name(spec: &DatacenterSpec, rack_index: i32) -> String {
    format!("{}-{}", base_name(spec), rack_index)
}

/// ConfigMap holding the generated configuration of rack `rack_index`
pub fn rack_config_name(spec: &DatacenterSpec, rack_index: i32) -> String {
    format!("{}-config", workload_set_name(spec, rack_index))
}

pub fn pod_name(spec: &DatacenterSpec, rack_index: i32, ordinal: i32) -> String {
    format!("{}-{}", workload_set_name(spec, rack_index), ordinal)
}

/// Stable DNS name of a pod behind the headless service.
pub fn pod_host(spec: &DatacenterSpec, namespace: &str, pod: &str) -> String {
    format!("{pod}.{}.{namespace}.svc.cluster.local", service_name(spec))
}

/// Label selector matching every workload set of the datacenter resource `dc_name`.
pub fn selector(dc_name: &str) -> String {
    format!("{DATACENTER_LABEL}={dc_name},{MANAGED_BY_LABEL}={MANAGED_BY}")
}

/// Labels shared by every resource of a datacenter.
pub fn common_labels(dc_name: &str, spec: &DatacenterSpec) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (DATACENTER_LABEL.to_string(), dc_name.to_string()),
        (CLUSTER_LABEL.to_string(), spec.cluster_name.clone()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_spec;

    #[test]
    fn test_names() {
        let spec = test_spec("Cl1", "DC1", 3);
        assert_eq!(workload_set_name(&spec, 0), "elassandra-cl1-dc1-0");
        assert_eq!(pod_name(&spec, 1, 2), "elassandra-cl1-dc1-1-2");
        assert_eq!(
            pod_host(&spec, "db", "elassandra-cl1-dc1-0-0"),
            "elassandra-cl1-dc1-0-0.elassandra-cl1-dc1.db.svc.cluster.local"
        );
        assert_eq!(
            selector("dc1"),
            "elassandra.strapdata.com/datacenter=dc1,app.kubernetes.io/managed-by=elassandra-operator"
        );
    }
}
