//! Per-rack observed status

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Rack health derived from desired and ready replica counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum Health {
    /// Every desired replica is ready
    Green,
    /// A single replica is missing
    Yellow,
    /// More than one replica is missing, or more are running than desired
    #[default]
    Red,
}

impl Health {
    /// Computes the health of a rack from its replica counts.
    pub fn from_counts(desired: i32, ready: i32) -> Self {
        if ready == desired {
            Health::Green
        } else if ready + 1 == desired {
            Health::Yellow
        } else {
            Health::Red
        }
    }
}

/// Observed state of one rack.
///
/// Racks are keyed by `index`, which is assigned once from the position of the
/// zone name in the datacenter's ordered zone list and never reassigned.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RackStatus {
    /// Rack name (the zone name)
    pub name: String,

    /// Stable rack index
    pub index: i32,

    /// Desired replica count of the rack's StatefulSet
    #[serde(default)]
    pub desired_replicas: i32,

    /// Ready replica count reported by the rack's StatefulSet
    #[serde(default)]
    pub ready_replicas: i32,

    /// Derived health
    #[serde(default)]
    pub health: Health,

    /// Configuration fingerprint applied by the last rolling update of this rack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// True once the rack's seed node has joined the cluster
    #[serde(default)]
    pub seed_bootstrapped: bool,

    /// Replica count to restore when the datacenter is unparked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parked_replicas: Option<i32>,
}

impl RackStatus {
    /// Creates the status of a freshly placed rack.
    pub fn new(name: impl Into<String>, index: i32) -> Self {
        Self {
            name: name.into(),
            index,
            ..Default::default()
        }
    }

    /// Records replica counts observed on the rack's StatefulSet and recomputes health.
    pub fn observe(&mut self, desired: i32, ready: i32) {
        self.desired_replicas = desired;
        self.ready_replicas = ready;
        self.health = Health::from_counts(desired, ready);
        if ready > 0 {
            self.seed_bootstrapped = true;
        }
    }
}
