//! Seed selection

use crate::naming;
use crds::{DatacenterSpec, DatacenterStatus};

/// Seeds handed to every rack of the datacenter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeedPlan {
    /// Seed node addresses
    pub seeds: Vec<String>,
    /// Seed discovery URLs of a remote cluster
    pub seeders: Vec<String>,
    pub auto_bootstrap: bool,
}

/// Chooses the seeds for the next workload set write.
///
/// Once bootstrapped, the first pod of every placed rack is a seed (plus the
/// remote seeds, if any). Before that, a datacenter joining an existing
/// cluster uses the remote seeds with auto-bootstrap disabled, and a new
/// cluster uses the first pod of its lowest rack as single seed.
pub fn select(namespace: &str, spec: &DatacenterSpec, status: &DatacenterStatus) -> SeedPlan {
    let first_pod = |index: i32| {
        let pod = naming::pod_name(spec, index, 0);
        naming::pod_host(spec, namespace, &pod)
    };
    let joins_remote = !spec.remote_seeds.is_empty() || !spec.remote_seeders.is_empty();

    if status.bootstrapped {
        let mut seeds: Vec<String> = status
            .rack_statuses
            .values()
            .filter(|rack| rack.desired_replicas > 0 || rack.seed_bootstrapped)
            .map(|rack| first_pod(rack.index))
            .collect();
        seeds.extend(spec.remote_seeds.iter().cloned());
        return SeedPlan {
            seeds,
            seeders: spec.remote_seeders.clone(),
            auto_bootstrap: true,
        };
    }

    if joins_remote {
        return SeedPlan {
            seeds: spec.remote_seeds.clone(),
            seeders: spec.remote_seeders.clone(),
            auto_bootstrap: false,
        };
    }

    SeedPlan {
        seeds: status
            .rack_statuses
            .keys()
            .next()
            .map(|index| vec![first_pod(*index)])
            .unwrap_or_default(),
        seeders: Vec::new(),
        auto_bootstrap: true,
    }
}
