//! Measurement Model
//!
//! Typed values produced by the characteristic decoders. A measurement is created once by a
//! decoder and never modified afterwards; sessions only ever append them.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::PrimitiveDateTime;

/// Unit flag of a Weight Measurement payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightUnit {
    Kilograms,
    Pounds,
}

/// Unit flag of a Blood Pressure Measurement payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PressureUnit {
    MmHg,
    KPa,
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightUnit::Kilograms => write!(f, "kg"),
            WeightUnit::Pounds => write!(f, "lb"),
        }
    }
}

impl fmt::Display for PressureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PressureUnit::MmHg => write!(f, "mmHg"),
            PressureUnit::KPa => write!(f, "kPa"),
        }
    }
}

/// A decoded Weight Measurement (0x2A9D).
///
/// `weight` and `height` are expressed in the unit announced by the payload; pounds are
/// never converted to kilograms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightMeasurement {
    pub weight: f64,
    pub unit: WeightUnit,
    pub measured_at: Option<PrimitiveDateTime>,
    pub user_id: Option<u8>,
    pub bmi: Option<f64>,
    pub height: Option<f64>,
}

/// A decoded Blood Pressure Measurement (0x2A35).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureMeasurement {
    pub systolic: f64,
    pub diastolic: f64,
    pub mean_arterial_pressure: f64,
    pub unit: PressureUnit,
    pub measured_at: Option<PrimitiveDateTime>,
    /// Beats per minute.
    pub pulse_rate: Option<f64>,
    pub user_id: Option<u8>,
    /// Raw measurement status bitfield (body movement, cuff fit, irregular pulse, ...).
    pub status: Option<u16>,
}

/// A measurement received from a health device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Measurement {
    Weight(WeightMeasurement),
    BloodPressure(BloodPressureMeasurement),
}

impl Measurement {
    /// Returns the device-reported time of the measurement, if any.
    pub fn get_measured_at(&self) -> Option<PrimitiveDateTime> {
        match self {
            Measurement::Weight(m) => m.measured_at,
            Measurement::BloodPressure(m) => m.measured_at,
        }
    }

    /// Returns the device-local user index, if any.
    pub fn get_user_id(&self) -> Option<u8> {
        match self {
            Measurement::Weight(m) => m.user_id,
            Measurement::BloodPressure(m) => m.user_id,
        }
    }

    pub fn as_weight(&self) -> Option<&WeightMeasurement> {
        match self {
            Measurement::Weight(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_blood_pressure(&self) -> Option<&BloodPressureMeasurement> {
        match self {
            Measurement::BloodPressure(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Weight(m) => {
                write!(f, "weight {:.3} {}", m.weight, m.unit)?;
                if let Some(bmi) = m.bmi {
                    write!(f, ", bmi {:.1}", bmi)?;
                }
                if let Some(height) = m.height {
                    write!(f, ", height {:.3}", height)?;
                }
                if let Some(user) = m.user_id {
                    write!(f, ", user {}", user)?;
                }
                if let Some(at) = m.measured_at {
                    write!(f, " at {}", at)?;
                }
                Ok(())
            }
            Measurement::BloodPressure(m) => {
                write!(
                    f,
                    "blood pressure {}/{} (map {}) {}",
                    m.systolic, m.diastolic, m.mean_arterial_pressure, m.unit
                )?;
                if let Some(pulse) = m.pulse_rate {
                    write!(f, ", pulse {} bpm", pulse)?;
                }
                if let Some(user) = m.user_id {
                    write!(f, ", user {}", user)?;
                }
                if let Some(at) = m.measured_at {
                    write!(f, " at {}", at)?;
                }
                Ok(())
            }
        }
    }
}
