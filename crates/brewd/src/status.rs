//! A combined status snapshot, shaped for whatever out-of-process command
//! surface eventually serves it. Building this here keeps that surface a
//! thin read-only adapter with no business logic of its own.

use std::sync::Arc;

use power_arbiter::{CurrentLimiter, LimiterSnapshot};
use serde::Serialize;

use crate::temperature::TemperatureManager;
use crate::valve::{ValveController, ValveMode};

#[derive(Debug, Clone, Serialize)]
pub struct RigStatus {
    pub limiter: LimiterSnapshot,
    pub valve_mode: ValveMode,
    pub probes: Vec<crate::temperature::ProbeStats>,
}

pub fn build_status(
    limiter: &Arc<CurrentLimiter>,
    valve: &Arc<ValveController>,
    temperature_manager: &Arc<TemperatureManager>,
) -> RigStatus {
    let probes = temperature_manager
        .list_probes()
        .into_iter()
        .filter_map(|id| temperature_manager.get_probe_stats(&id).ok())
        .collect();

    RigStatus {
        limiter: limiter.snapshot(),
        valve_mode: valve.mode(),
        probes,
    }
}
