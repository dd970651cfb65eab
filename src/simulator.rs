//! Synthetic BMS readings.
//!
//! The simulator produces payloads with the same keys as the device, so they flow
//! through the regular decoder. Values are random but stay inside plausible ranges
//! for a 4S lithium-ion pack.

use crate::protocol::RawPayload;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use std::ops::RangeInclusive;

pub const PACK_VOLTAGE_RANGE: RangeInclusive<u32> = 14000..=16800;
pub const CURRENT_RANGE: RangeInclusive<u32> = 25..=500;
pub const TEMPERATURE_RANGE: RangeInclusive<i32> = 15..=45;
pub const CYCLE_COUNT_RANGE: RangeInclusive<u32> = 0..=500;
pub const STATUS_RANGE: RangeInclusive<u32> = 0..=31;
pub const CELL_VOLTAGE_RANGE: RangeInclusive<u32> = 3700..=3900;
pub const REMAIN_CAPACITY_RANGE: RangeInclusive<u32> = 1000..=2000;
pub const CELL_COUNT: usize = 4;
pub const FULL_CAPACITY: u32 = 2500;
pub const GAUGE_TYPE: &str = "BQ27545";

#[derive(Debug, Serialize)]
struct SimulatedReading {
    #[serde(rename = "PackVoltage_mV")]
    pack_voltage: u32,
    #[serde(rename = "Current_mA")]
    current: u32,
    #[serde(rename = "Temperature_C")]
    temperature: i32,
    #[serde(rename = "CycleCount")]
    cycle_count: u32,
    #[serde(rename = "SafetyStatus")]
    safety_status: u32,
    #[serde(rename = "PF_Status")]
    pf_status: u32,
    #[serde(rename = "GaugeType")]
    gauge_type: &'static str,
    #[serde(rename = "Cells")]
    cells: Vec<u32>,
    #[serde(rename = "RemainCapacity_mAh")]
    remain_capacity: u32,
    #[serde(rename = "FullCapacity_mAh")]
    full_capacity: u32,
}

/// Source of synthetic readings, usable without any connected device.
#[derive(Debug)]
pub struct SimulatedSource {
    rng: StdRng,
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic source, the same seed yields the same sequence of payloads.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generates one payload. Never fails; an internal fault yields an empty payload.
    pub fn generate(&mut self) -> RawPayload {
        let rng = &mut self.rng;
        let cells = (0..CELL_COUNT)
            .map(|_| rng.gen_range(CELL_VOLTAGE_RANGE))
            .collect();
        let reading = SimulatedReading {
            pack_voltage: rng.gen_range(PACK_VOLTAGE_RANGE),
            current: rng.gen_range(CURRENT_RANGE),
            temperature: rng.gen_range(TEMPERATURE_RANGE),
            cycle_count: rng.gen_range(CYCLE_COUNT_RANGE),
            safety_status: rng.gen_range(STATUS_RANGE),
            pf_status: rng.gen_range(STATUS_RANGE),
            gauge_type: GAUGE_TYPE,
            cells,
            remain_capacity: rng.gen_range(REMAIN_CAPACITY_RANGE),
            full_capacity: FULL_CAPACITY,
        };
        log::trace!("Simulated {:?}", reading);

        match serde_json::to_value(&reading) {
            Ok(Value::Object(payload)) => payload,
            Ok(other) => {
                log::error!("Simulated reading is not an object: {other}");
                RawPayload::new()
            }
            Err(e) => {
                log::error!("Error generating simulated reading: {e}");
                RawPayload::new()
            }
        }
    }
}
