//! Weight Measurement decoder
//!
//! Parses the Bluetooth SIG Weight Measurement characteristic (0x2A9D) of the Weight Scale
//! service (0x181D):
//! - flags byte (unit, timestamp, user id, BMI and height)
//! - weight, scaled by the unit's resolution
//! - optional fields in flag order

use crate::core::constants::{WEIGHT_MEASUREMENT_UUID, WEIGHT_SCALE_SERVICE_UUID};
use crate::core::error::DecodeError;
use crate::decoder::reader::PayloadReader;
use crate::is_bit_set;
use crate::model::measurement::{Measurement, WeightMeasurement, WeightUnit};
use crate::model::uuid::BtUuid;

/// Kilograms per raw unit.
pub const WEIGHT_RESOLUTION_SI: f64 = 0.005;
/// Pounds per raw unit.
pub const WEIGHT_RESOLUTION_IMPERIAL: f64 = 0.01;
pub const BMI_RESOLUTION: f64 = 0.1;
pub const HEIGHT_RESOLUTION_SI: f64 = 0.005;
pub const HEIGHT_RESOLUTION_IMPERIAL: f64 = 0.1;

pub const FLAG_IMPERIAL: u8 = 0;
pub const FLAG_TIMESTAMP: u8 = 1;
pub const FLAG_USER_ID: u8 = 2;
pub const FLAG_BMI_HEIGHT: u8 = 3;

/// Checks whether the characteristic is the Weight Measurement of a Weight Scale.
pub fn recognizes(service: &BtUuid, characteristic: &BtUuid) -> bool {
    *service == WEIGHT_SCALE_SERVICE_UUID && *characteristic == WEIGHT_MEASUREMENT_UUID
}

/// Decodes a Weight Measurement payload.
///
/// # Arguments
/// * `data` - The raw characteristic value.
///
/// # Errors
/// `TruncatedPayload` when the payload is shorter than its own flags announce,
/// `InvalidTimestamp` when a present timestamp holds impossible values.
pub fn decode(data: &[u8]) -> Result<Measurement, DecodeError> {
    let mut reader = PayloadReader::new(data);
    let flags = reader.u8("flags")?;

    let unit = if is_bit_set!(flags, FLAG_IMPERIAL) {
        WeightUnit::Pounds
    } else {
        WeightUnit::Kilograms
    };
    let (weight_resolution, height_resolution) = match unit {
        WeightUnit::Kilograms => (WEIGHT_RESOLUTION_SI, HEIGHT_RESOLUTION_SI),
        WeightUnit::Pounds => (WEIGHT_RESOLUTION_IMPERIAL, HEIGHT_RESOLUTION_IMPERIAL),
    };

    let weight = f64::from(reader.u16("weight")?) * weight_resolution;

    let measured_at = if is_bit_set!(flags, FLAG_TIMESTAMP) {
        reader.date_time()?
    } else {
        None
    };

    let user_id = if is_bit_set!(flags, FLAG_USER_ID) {
        Some(reader.u8("user id")?)
    } else {
        None
    };

    let (bmi, height) = if is_bit_set!(flags, FLAG_BMI_HEIGHT) {
        let bmi = f64::from(reader.u16("bmi")?) * BMI_RESOLUTION;
        let height = f64::from(reader.u16("height")?) * height_resolution;
        (Some(bmi), Some(height))
    } else {
        (None, None)
    };

    Ok(Measurement::Weight(WeightMeasurement {
        weight,
        unit,
        measured_at,
        user_id,
        bmi,
        height,
    }))
}
