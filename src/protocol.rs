use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Command token sent to the device to request a full reading.
pub const READ_COMMAND: &str = "READ_ALL";

/// Marker shown in place of any value the device did not report.
pub const FALLBACK_MARKER: &str = "---";

/// Decoded safety status when no alert bit is set.
pub const SAFETY_NOMINAL: &str = "OK";

/// Decoded permanent failure status when no failure bit is set.
pub const PF_NOMINAL: &str = "No Permanent Failure";

/// Status text used when the raw bitfield is missing from the payload.
pub const STATUS_UNKNOWN: &str = "Unknown";

/// Keys of the JSON object sent by the device.
pub mod keys {
    pub const PACK_VOLTAGE: &str = "PackVoltage_mV";
    pub const CURRENT: &str = "Current_mA";
    pub const TEMPERATURE: &str = "Temperature_C";
    pub const CYCLE_COUNT: &str = "CycleCount";
    pub const SAFETY_STATUS: &str = "SafetyStatus";
    pub const PF_STATUS: &str = "PF_Status";
    pub const GAUGE_TYPE: &str = "GaugeType";
    pub const CELLS: &str = "Cells";
    pub const REMAIN_CAPACITY: &str = "RemainCapacity_mAh";
    pub const FULL_CAPACITY: &str = "FullCapacity_mAh";
}

/// The parsed, not yet interpreted, response of the device.
pub type RawPayload = serde_json::Map<String, Value>;

macro_rules! read_bit {
    ($value:expr,$position:expr) => {
        ($value >> $position) & 1 != 0
    };
}

/// Alerts reported in the `SafetyStatus` bitfield. Bit 0 carries no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SafetyFlag {
    Overvoltage,
    Undervoltage,
    Overtemperature,
    ShortCircuit,
}

impl SafetyFlag {
    /// Returns the set flags in ascending bit order.
    pub fn decode(value: u32) -> Vec<Self> {
        let mut result = Vec::new();

        macro_rules! ck_and_add {
            ($position:expr,$flag:expr) => {
                if read_bit!(value, $position) {
                    result.push($flag);
                }
            };
        }

        ck_and_add!(1, SafetyFlag::Overvoltage);
        ck_and_add!(2, SafetyFlag::Undervoltage);
        ck_and_add!(3, SafetyFlag::Overtemperature);
        ck_and_add!(4, SafetyFlag::ShortCircuit);

        result
    }
}

impl fmt::Display for SafetyFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SafetyFlag::Overvoltage => write!(f, "Overvoltage"),
            SafetyFlag::Undervoltage => write!(f, "Undervoltage"),
            SafetyFlag::Overtemperature => write!(f, "Overtemperature"),
            SafetyFlag::ShortCircuit => write!(f, "Short Circuit"),
        }
    }
}

/// Latched failures reported in the `PF_Status` bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PermanentFailureFlag {
    FuseBlowEvent,
    CellOvervoltage,
    CellUndervoltage,
    Overtemperature,
    ChargeTimeout,
}

impl PermanentFailureFlag {
    /// Returns the set flags in ascending bit order.
    pub fn decode(value: u32) -> Vec<Self> {
        let mut result = Vec::new();

        macro_rules! ck_and_add {
            ($position:expr,$flag:expr) => {
                if read_bit!(value, $position) {
                    result.push($flag);
                }
            };
        }

        ck_and_add!(0, PermanentFailureFlag::FuseBlowEvent);
        ck_and_add!(1, PermanentFailureFlag::CellOvervoltage);
        ck_and_add!(2, PermanentFailureFlag::CellUndervoltage);
        ck_and_add!(3, PermanentFailureFlag::Overtemperature);
        ck_and_add!(4, PermanentFailureFlag::ChargeTimeout);

        result
    }
}

impl fmt::Display for PermanentFailureFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PermanentFailureFlag::FuseBlowEvent => write!(f, "Fuse Blow Event"),
            PermanentFailureFlag::CellOvervoltage => write!(f, "Cell Overvoltage"),
            PermanentFailureFlag::CellUndervoltage => write!(f, "Cell Undervoltage"),
            PermanentFailureFlag::Overtemperature => write!(f, "Overtemperature"),
            PermanentFailureFlag::ChargeTimeout => write!(f, "Charge Timeout"),
        }
    }
}

fn join_labels<T: fmt::Display>(flags: &[T], nominal: &str) -> String {
    if flags.is_empty() {
        return nominal.to_string();
    }
    flags
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Human readable safety alerts, `"OK"` when none is set.
pub fn decode_safety_status(value: u32) -> String {
    join_labels(&SafetyFlag::decode(value), SAFETY_NOMINAL)
}

/// Human readable permanent failures, `"No Permanent Failure"` when none is set.
pub fn decode_pf_status(value: u32) -> String {
    join_labels(&PermanentFailureFlag::decode(value), PF_NOMINAL)
}

/// Parses one response line into its JSON object.
pub fn parse(raw_line: &str) -> Result<RawPayload> {
    let line = raw_line.trim();
    if line.is_empty() {
        return Err(Error::EmptyResponse);
    }
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(payload)) => Ok(payload),
        Ok(other) => Err(Error::MalformedPayload {
            raw: raw_line.to_string(),
            reason: format!("expected a JSON object, got {}", value_kind(&other)),
        }),
        Err(err) => {
            log::warn!("Cannot parse payload - error={} raw={:?}", err, raw_line);
            Err(Error::MalformedPayload {
                raw: raw_line.to_string(),
                reason: err.to_string(),
            })
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// Floats are rounded, the reference firmware reports temperature with one decimal.
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|v| v.is_finite())
            .map(|v| v.round() as i64)
    })
}

fn integer_field(payload: &RawPayload, key: &str) -> Option<i64> {
    match payload.get(key) {
        None | Some(Value::Null) => {
            log::debug!("Field {key} missing, using fallback");
            None
        }
        Some(value) => {
            let result = as_integer(value);
            if result.is_none() {
                log::warn!("Field {key} is not numeric: {value}");
            }
            result
        }
    }
}

fn bitfield(payload: &RawPayload, key: &str) -> Option<u32> {
    let value = integer_field(payload, key)?;
    match u32::try_from(value) {
        Ok(bits) => Some(bits),
        Err(_) => {
            log::warn!("Field {key} out of range: {value}");
            None
        }
    }
}

fn text_field(payload: &RawPayload, key: &str) -> Option<String> {
    match payload.get(key) {
        Some(Value::String(text)) => Some(text.clone()),
        None | Some(Value::Null) => {
            log::debug!("Field {key} missing, using fallback");
            None
        }
        Some(other) => Some(other.to_string()),
    }
}

fn cells_field(payload: &RawPayload) -> Vec<u32> {
    let Some(entries) = payload.get(keys::CELLS) else {
        log::debug!("Field {} missing, no cell voltages", keys::CELLS);
        return Vec::new();
    };
    let Some(entries) = entries.as_array() else {
        log::warn!("Field {} is not a list: {entries}", keys::CELLS);
        return Vec::new();
    };
    entries
        .iter()
        .enumerate()
        .filter_map(|(n, entry)| {
            let volt = as_integer(entry).and_then(|v| u32::try_from(v).ok());
            if volt.is_none() {
                log::warn!("Skipping cell #{} with invalid voltage {}", n + 1, entry);
            }
            volt
        })
        .collect()
}

/// One decoded, immutable reading of the BMS.
///
/// Values the device did not report are `None` and render as [`FALLBACK_MARKER`].
/// A missing status bitfield decodes to [`STATUS_UNKNOWN`], so such a snapshot is
/// never [nominal](Snapshot::is_nominal).
/// `current_ma` is passed through with whatever sign the device uses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pack_voltage_mv: Option<i64>,
    current_ma: Option<i64>,
    temperature_c: Option<i64>,
    cycle_count: Option<i64>,
    safety_status_raw: Option<u32>,
    pf_status_raw: Option<u32>,
    gauge_type: Option<String>,
    cells: Vec<u32>,
    remain_capacity_mah: Option<i64>,
    full_capacity_mah: Option<i64>,
    safety_status_text: String,
    pf_status_text: String,
}

impl Snapshot {
    /// Interprets a parsed payload. Missing or mistyped fields never fail the decode.
    pub fn decode(payload: &RawPayload) -> Self {
        let safety_status_raw = bitfield(payload, keys::SAFETY_STATUS);
        let pf_status_raw = bitfield(payload, keys::PF_STATUS);
        let snapshot = Self {
            pack_voltage_mv: integer_field(payload, keys::PACK_VOLTAGE),
            current_ma: integer_field(payload, keys::CURRENT),
            temperature_c: integer_field(payload, keys::TEMPERATURE),
            cycle_count: integer_field(payload, keys::CYCLE_COUNT),
            safety_status_raw,
            pf_status_raw,
            gauge_type: text_field(payload, keys::GAUGE_TYPE),
            cells: cells_field(payload),
            remain_capacity_mah: integer_field(payload, keys::REMAIN_CAPACITY),
            full_capacity_mah: integer_field(payload, keys::FULL_CAPACITY),
            safety_status_text: safety_status_raw
                .map(decode_safety_status)
                .unwrap_or_else(|| STATUS_UNKNOWN.to_string()),
            pf_status_text: pf_status_raw
                .map(decode_pf_status)
                .unwrap_or_else(|| STATUS_UNKNOWN.to_string()),
        };
        log::trace!("Decoded {:?}", snapshot);
        snapshot
    }

    /// Parses and decodes one response line.
    pub fn from_line(raw_line: &str) -> Result<Self> {
        Ok(Self::decode(&parse(raw_line)?))
    }

    pub fn pack_voltage_mv(&self) -> Option<i64> {
        self.pack_voltage_mv
    }

    pub fn current_ma(&self) -> Option<i64> {
        self.current_ma
    }

    pub fn temperature_c(&self) -> Option<i64> {
        self.temperature_c
    }

    pub fn cycle_count(&self) -> Option<i64> {
        self.cycle_count
    }

    pub fn safety_status_raw(&self) -> Option<u32> {
        self.safety_status_raw
    }

    pub fn pf_status_raw(&self) -> Option<u32> {
        self.pf_status_raw
    }

    pub fn gauge_type(&self) -> Option<&str> {
        self.gauge_type.as_deref()
    }

    /// Cell voltages in mV, index 0 is physical cell 1.
    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    pub fn remain_capacity_mah(&self) -> Option<i64> {
        self.remain_capacity_mah
    }

    pub fn full_capacity_mah(&self) -> Option<i64> {
        self.full_capacity_mah
    }

    pub fn safety_status_text(&self) -> &str {
        &self.safety_status_text
    }

    pub fn pf_status_text(&self) -> &str {
        &self.pf_status_text
    }

    /// True only if both decoded texts are exactly the nominal ones.
    pub fn is_nominal(&self) -> bool {
        self.safety_status_text == SAFETY_NOMINAL && self.pf_status_text == PF_NOMINAL
    }

    pub fn cell_statistics(&self) -> Option<CellStatistics> {
        CellStatistics::from_cells(&self.cells)
    }
}

/// Spread of the cell voltages, all in mV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CellStatistics {
    pub min: u32,
    pub max: u32,
    pub delta: u32,
    /// Arithmetic mean truncated to an integer.
    pub average: u32,
}

impl CellStatistics {
    pub fn from_cells(cells: &[u32]) -> Option<Self> {
        let min = *cells.iter().min()?;
        let max = *cells.iter().max()?;
        let sum: u64 = cells.iter().map(|&v| u64::from(v)).sum();
        Some(Self {
            min,
            max,
            delta: max - min,
            average: (sum / cells.len() as u64) as u32,
        })
    }
}

impl fmt::Display for CellStatistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Min: {}mV | Max: {}mV | Delta: {}mV | Avg: {}mV",
            self.min, self.max, self.delta, self.average
        )
    }
}
