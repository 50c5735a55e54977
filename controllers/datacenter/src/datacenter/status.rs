//! Datacenter status projection
//!
//! Folds the live zone view into the persisted status: per-rack replica
//! counts and health, totals, and the bootstrap flag.

use super::zones::Zones;
use crate::error::ControllerError;
use crds::{DatacenterStatus, RackStatus};

/// Refreshes the rack statuses and totals from `zones`.
///
/// Racks whose workload set disappeared keep their last status. Fails when a
/// workload set claims a rack index already assigned to another zone.
pub fn project(status: &mut DatacenterStatus, zones: &Zones) -> Result<(), ControllerError> {
    for zone in zones.racks() {
        let Some(ws) = zone.workload_set.as_ref() else {
            continue;
        };
        match status.rack_index(&zone.name) {
            Some(index) if index != ws.rack_index => {
                return Err(ControllerError::Inconsistent(format!(
                    "zone {} owns rack index {index} but workload set {} carries index {}",
                    zone.name, ws.name, ws.rack_index
                )));
            }
            Some(_) => {}
            None => {
                let assigned = status.assign_rack_index(&zone.name);
                if assigned != ws.rack_index {
                    return Err(ControllerError::Inconsistent(format!(
                        "workload set {} carries rack index {} but zone {} maps to index {assigned}",
                        ws.name, ws.rack_index, zone.name
                    )));
                }
            }
        }

        let rack = status
            .rack_statuses
            .entry(ws.rack_index)
            .or_insert_with(|| RackStatus::new(zone.name.clone(), ws.rack_index));
        rack.observe(ws.replicas, ws.ready_replicas);
        rack.fingerprint.clone_from(&ws.fingerprint);
    }

    refresh_totals(status);
    Ok(())
}

/// Recomputes the datacenter totals from the rack statuses.
pub fn refresh_totals(status: &mut DatacenterStatus) {
    status.replicas = status.rack_statuses.values().map(|r| r.desired_replicas).sum();
    status.ready_replicas = status.rack_statuses.values().map(|r| r.ready_replicas).sum();
    if status.ready_replicas > 0 {
        status.bootstrapped = true;
    }
}
