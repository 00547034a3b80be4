use serde::ser::Error;
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

use crate::meter::Measurement;

/// Latest corrected measurement plus the running energy total, as served to clients.
/// Fields are written with a fixed number of decimals (`230.00`, `0.000`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Snapshot {
    #[serde(rename = "Vrms", serialize_with = "two_decimals")]
    pub vrms: f64,
    #[serde(rename = "Irms", serialize_with = "three_decimals")]
    pub irms: f64,
    #[serde(rename = "Power", serialize_with = "two_decimals")]
    pub power: f64,
    #[serde(rename = "kWh", serialize_with = "three_decimals")]
    pub kwh: f64,
}

impl Snapshot {
    pub fn new(measurement: Measurement, kwh: f64) -> Self {
        Self {
            vrms: measurement.vrms,
            irms: measurement.irms,
            power: measurement.power,
            kwh,
        }
    }
}

fn fixed_decimals<S: Serializer>(value: f64, decimals: usize, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(S::Error::custom(format!("cannot serialize non-finite reading {}", value)));
    }
    let number = RawValue::from_string(format!("{:.*}", decimals, value)).map_err(S::Error::custom)?;
    number.serialize(serializer)
}

fn two_decimals<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    fixed_decimals(*value, 2, serializer)
}

fn three_decimals<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    fixed_decimals(*value, 3, serializer)
}
