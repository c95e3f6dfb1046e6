use serde::{Deserialize, Serialize};

use crate::config::EstimationParams;

/// Estimated environmental cost of a number of calls.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Footprint {
    pub kwh: f64,
    pub water_liters: f64,
    pub co2_kg: f64,
}

/// Energy, water and CO2 for `call_count` calls.
/// Linear in the call count; values are kept at full precision.
pub fn footprint(
    call_count: u64,
    kwh_per_call: f64,
    pue: f64,
    water_l_per_kwh: f64,
    co2_kg_per_kwh: f64,
) -> Footprint {
    let kwh = call_count as f64 * kwh_per_call * pue;
    Footprint {
        kwh,
        water_liters: kwh * water_l_per_kwh,
        co2_kg: kwh * co2_kg_per_kwh,
    }
}

impl EstimationParams {
    pub fn footprint(&self, call_count: u64) -> Footprint {
        footprint(
            call_count,
            self.kwh_per_call,
            self.pue,
            self.water_l_per_kwh,
            self.co2_kg_per_kwh,
        )
    }
}
