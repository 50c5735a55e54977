//! Datacenter decision function
//!
//! Pure: given the desired spec, the projected status and the live zone view,
//! picks the single next action of a reconciliation pass. Rules are evaluated
//! in priority order:
//!
//! 1. park / wait for drain / mark parked
//! 2. unpark
//! 3. rolling update of the first drifted rack (only once every rack is ready)
//! 4. wait for racks to converge
//! 5. scale up by one replica
//! 6. scale down by one replica
//! 7. settle

use super::zones::Zones;
use crate::error::ControllerError;
use crds::{DatacenterPhase, DatacenterSpec, DatacenterStatus};

/// Inputs of one decision.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub spec: &'a DatacenterSpec,
    pub status: &'a DatacenterStatus,
    pub zones: &'a Zones,
    /// Fingerprint of the desired configuration
    pub fingerprint: &'a str,
}

/// The single action of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Set the replicas of these racks to zero
    Park { racks: Vec<i32> },
    /// Every rack is drained
    MarkParked,
    /// Restore the replicas recorded when parking, as (rack index, replicas)
    Unpark { racks: Vec<(i32, i32)> },
    /// Reapply the definition of one rack with the current configuration
    RollingUpdate { rack: i32 },
    /// Place the first rack in a zone, with one replica
    CreateRack { zone: String },
    /// Grow a rack by one node; `replicas` is the new replica count
    ScaleUp { rack: i32, replicas: i32 },
    /// Shrink a rack by one node, after the RF was lowered to fit
    ScaleDown { rack: i32, replicas: i32 },
    /// Nothing to do until the live state changes
    Wait { reason: String },
    /// Converged: run housekeeping
    Settle,
}

impl Decision {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Decision::Park { .. } => "park",
            Decision::MarkParked => "mark-parked",
            Decision::Unpark { .. } => "unpark",
            Decision::RollingUpdate { .. } => "rolling-update",
            Decision::CreateRack { .. } => "create-rack",
            Decision::ScaleUp { .. } => "scale-up",
            Decision::ScaleDown { .. } => "scale-down",
            Decision::Wait { .. } => "wait",
            Decision::Settle => "settle",
        }
    }
}

pub fn decide(obs: &Observation<'_>) -> Result<Decision, ControllerError> {
    let Observation {
        spec,
        status,
        zones,
        fingerprint,
    } = *obs;

    if spec.replicas <= 0 {
        return Err(ControllerError::InvalidSpec(format!(
            "replicas must be greater than 0, got {}",
            spec.replicas
        )));
    }

    if spec.parked {
        if status.phase == DatacenterPhase::Parked {
            return Ok(Decision::Wait {
                reason: "parked".to_string(),
            });
        }
        let racks: Vec<i32> = zones
            .racks()
            .iter()
            .filter(|z| z.replicas() > 0)
            .filter_map(|z| z.rack_index())
            .collect();
        if !racks.is_empty() {
            return Ok(Decision::Park { racks });
        }
        if !zones.all_parked() {
            return Ok(Decision::Wait {
                reason: "waiting for racks to drain".to_string(),
            });
        }
        return Ok(Decision::MarkParked);
    }

    if status.phase == DatacenterPhase::Parked {
        let racks: Vec<(i32, i32)> = status
            .rack_statuses
            .values()
            .filter_map(|rack| rack.parked_replicas.map(|replicas| (rack.index, replicas)))
            .collect();
        return Ok(Decision::Unpark { racks });
    }

    if zones.any_scaling_up() && zones.any_scaling_down() {
        return Err(ControllerError::Inconsistent(
            "racks are scaling up and down at the same time".to_string(),
        ));
    }

    if let Some(zone) = zones.first_drifted(fingerprint) {
        if !zones.all_ready() {
            return Ok(Decision::Wait {
                reason: format!("rolling update of rack {} waits for ready racks", zone.name),
            });
        }
        if let Some(rack) = zone.rack_index() {
            return Ok(Decision::RollingUpdate { rack });
        }
    }

    if !zones.all_ready() {
        let reason = match zones.iter().find(|z| z.is_updating()) {
            Some(zone) => format!("waiting for rolling update of rack {}", zone.name),
            None => "waiting for racks to be ready".to_string(),
        };
        return Ok(Decision::Wait { reason });
    }

    let total = zones.total_replicas();
    if total < spec.replicas {
        let zone = zones.select_scale_up(spec.placement).ok_or_else(|| {
            ControllerError::NoEligibleZone(format!(
                "no zone has free capacity to grow from {total} to {} replicas",
                spec.replicas
            ))
        })?;
        return Ok(match zone.rack_index() {
            Some(rack) => Decision::ScaleUp {
                rack,
                replicas: zone.replicas() + 1,
            },
            None => Decision::CreateRack {
                zone: zone.name.clone(),
            },
        });
    }

    if total > spec.replicas {
        let zone = zones.select_scale_down().ok_or_else(|| {
            ControllerError::NoEligibleZone("no rack has replicas to remove".to_string())
        })?;
        let rack = zone.rack_index().ok_or_else(|| {
            ControllerError::Inconsistent(format!("zone {} has replicas but no rack", zone.name))
        })?;
        return Ok(Decision::ScaleDown {
            rack,
            replicas: zone.replicas() - 1,
        });
    }

    Ok(Decision::Settle)
}
