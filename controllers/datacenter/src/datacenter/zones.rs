//! Rack/zone model
//!
//! Rebuilt on every pass from the live node topology and the live workload
//! sets. Nothing here is persisted: the rack index is the join key with the
//! persisted [`crds::RackStatus`].

use crate::naming::DEFAULT_ZONE;
use crate::store::{NodeInfo, WorkloadSet};
use crds::ZonePlacement;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One placement zone and the rack pinned to it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    /// Zone label value, or the default zone for unlabelled nodes
    pub name: String,
    /// Number of Kubernetes nodes labelled with this zone
    pub node_count: i32,
    /// Rack pinned to this zone
    pub workload_set: Option<WorkloadSet>,
}

impl Zone {
    /// Desired replicas of the rack, 0 without one.
    pub fn replicas(&self) -> i32 {
        self.workload_set.as_ref().map_or(0, |ws| ws.replicas)
    }

    /// Ready replicas of the rack, 0 without one.
    pub fn ready_replicas(&self) -> i32 {
        self.workload_set.as_ref().map_or(0, |ws| ws.ready_replicas)
    }

    /// Index of the rack pinned here, `None` while the zone hosts no rack
    pub fn rack_index(&self) -> Option<i32> {
        self.workload_set.as_ref().map(|ws| ws.rack_index)
    }

    /// Nodes not hosting a replica of this datacenter yet
    pub fn free_capacity(&self) -> i32 {
        self.node_count - self.replicas()
    }

    /// True when the rack converged, or when no rack exists in the zone.
    pub fn is_ready(&self) -> bool {
        self.workload_set.as_ref().is_none_or(WorkloadSet::is_ready)
    }

    /// A rollout of the rack's definition is still in progress
    pub fn is_updating(&self) -> bool {
        self.workload_set.as_ref().is_some_and(|ws| !ws.updated)
    }

    /// Fewer replicas ready than desired
    pub fn is_scaling_up(&self) -> bool {
        self.workload_set.as_ref().is_some_and(|ws| ws.ready_replicas < ws.replicas)
    }

    /// More replicas ready than desired, a node is leaving
    pub fn is_scaling_down(&self) -> bool {
        self.workload_set.as_ref().is_some_and(|ws| ws.ready_replicas > ws.replicas)
    }

    fn can_grow(&self, placement: ZonePlacement) -> bool {
        match placement {
            ZonePlacement::Strict => self.free_capacity() > 0,
            ZonePlacement::Preferred => self.node_count > 0,
        }
    }
}

/// Selection order shared by scale up (minimum) and scale down (maximum):
/// fewest replicas, then most free capacity, then zone name.
fn selection_order(a: &Zone, b: &Zone) -> Ordering {
    a.replicas()
        .cmp(&b.replicas())
        .then_with(|| b.free_capacity().cmp(&a.free_capacity()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Every zone known from the topology or hosting a rack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zones {
    zones: BTreeMap<String, Zone>,
}

impl Zones {
    /// Builds the zone list from node labels and the datacenter's workload sets.
    pub fn build(nodes: &[NodeInfo], workload_sets: &[WorkloadSet]) -> Self {
        let mut zones: BTreeMap<String, Zone> = BTreeMap::new();
        for node in nodes {
            let name = node.zone.as_deref().unwrap_or(DEFAULT_ZONE);
            zones
                .entry(name.to_string())
                .or_insert_with(|| Zone {
                    name: name.to_string(),
                    node_count: 0,
                    workload_set: None,
                })
                .node_count += 1;
        }
        for ws in workload_sets {
            zones
                .entry(ws.zone.clone())
                .or_insert_with(|| Zone {
                    name: ws.zone.clone(),
                    node_count: 0,
                    workload_set: None,
                })
                .workload_set = Some(ws.clone());
        }
        Self { zones }
    }

    /// Zone by label value
    pub fn get(&self, name: &str) -> Option<&Zone> {
        self.zones.get(name)
    }

    /// Zones in name order
    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    /// Zones hosting a rack, in rack index order
    pub fn racks(&self) -> Vec<&Zone> {
        let mut racks: Vec<&Zone> = self.zones.values().filter(|z| z.workload_set.is_some()).collect();
        racks.sort_by_key(|z| z.rack_index());
        racks
    }

    /// Desired replicas summed over every rack
    pub fn total_replicas(&self) -> i32 {
        self.zones.values().map(Zone::replicas).sum()
    }

    /// True when every rack converged.
    pub fn all_ready(&self) -> bool {
        self.zones.values().all(Zone::is_ready)
    }

    /// True when every rack has zero desired and zero ready replicas.
    ///
    /// Also true when the datacenter has no rack at all.
    pub fn all_parked(&self) -> bool {
        self.zones
            .values()
            .filter(|z| z.workload_set.is_some())
            .all(|z| z.replicas() == 0 && z.ready_replicas() == 0)
    }

    /// Some rack still waits for a new node to become ready
    pub fn any_scaling_up(&self) -> bool {
        self.zones.values().any(Zone::is_scaling_up)
    }

    /// Some rack still waits for a node to leave
    pub fn any_scaling_down(&self) -> bool {
        self.zones.values().any(Zone::is_scaling_down)
    }

    /// Best zone to add one replica to.
    pub fn select_scale_up(&self, placement: ZonePlacement) -> Option<&Zone> {
        self.zones
            .values()
            .filter(|z| z.can_grow(placement))
            .min_by(|a, b| selection_order(a, b))
    }

    /// Best zone to remove one replica from.
    pub fn select_scale_down(&self) -> Option<&Zone> {
        self.zones
            .values()
            .filter(|z| z.replicas() > 0)
            .max_by(|a, b| selection_order(a, b))
    }

    /// First rack, by index, whose applied fingerprint differs from `fingerprint`.
    pub fn first_drifted(&self, fingerprint: &str) -> Option<&Zone> {
        self.racks().into_iter().find(|z| {
            z.workload_set
                .as_ref()
                .is_some_and(|ws| ws.fingerprint.as_deref() != Some(fingerprint))
        })
    }
}
