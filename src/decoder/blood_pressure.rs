//! Blood Pressure Measurement decoder
//!
//! Parses the Bluetooth SIG Blood Pressure Measurement characteristic (0x2A35) of the Blood
//! Pressure service (0x1810). The three pressures and the pulse rate are SFLOATs.

use crate::core::constants::{BLOOD_PRESSURE_MEASUREMENT_UUID, BLOOD_PRESSURE_SERVICE_UUID};
use crate::core::error::DecodeError;
use crate::decoder::reader::PayloadReader;
use crate::decoder::sfloat::SFloat;
use crate::is_bit_set;
use crate::model::measurement::{BloodPressureMeasurement, Measurement, PressureUnit};
use crate::model::uuid::BtUuid;

pub const FLAG_KPA: u8 = 0;
pub const FLAG_TIMESTAMP: u8 = 1;
pub const FLAG_PULSE_RATE: u8 = 2;
pub const FLAG_USER_ID: u8 = 3;
pub const FLAG_MEASUREMENT_STATUS: u8 = 4;

/// Checks whether the characteristic is the Blood Pressure Measurement of a Blood Pressure service.
pub fn recognizes(service: &BtUuid, characteristic: &BtUuid) -> bool {
    *service == BLOOD_PRESSURE_SERVICE_UUID && *characteristic == BLOOD_PRESSURE_MEASUREMENT_UUID
}

fn pressure(reader: &mut PayloadReader<'_>, field: &'static str) -> Result<f64, DecodeError> {
    let raw = reader.u16(field)?;
    SFloat::from_raw(raw)
        .value()
        .ok_or(DecodeError::ReservedValue { field, raw })
}

/// Decodes a Blood Pressure Measurement payload.
///
/// A reserved SFLOAT in one of the pressures fails the decode; a reserved pulse rate is
/// reported as absent.
pub fn decode(data: &[u8]) -> Result<Measurement, DecodeError> {
    let mut reader = PayloadReader::new(data);
    let flags = reader.u8("flags")?;

    let unit = if is_bit_set!(flags, FLAG_KPA) {
        PressureUnit::KPa
    } else {
        PressureUnit::MmHg
    };

    let systolic = pressure(&mut reader, "systolic")?;
    let diastolic = pressure(&mut reader, "diastolic")?;
    let mean_arterial_pressure = pressure(&mut reader, "mean arterial pressure")?;

    let measured_at = if is_bit_set!(flags, FLAG_TIMESTAMP) {
        reader.date_time()?
    } else {
        None
    };

    let pulse_rate = if is_bit_set!(flags, FLAG_PULSE_RATE) {
        SFloat::from_raw(reader.u16("pulse rate")?).value()
    } else {
        None
    };

    let user_id = if is_bit_set!(flags, FLAG_USER_ID) {
        Some(reader.u8("user id")?)
    } else {
        None
    };

    let status = if is_bit_set!(flags, FLAG_MEASUREMENT_STATUS) {
        Some(reader.u16("measurement status")?)
    } else {
        None
    };

    Ok(Measurement::BloodPressure(BloodPressureMeasurement {
        systolic,
        diastolic,
        mean_arterial_pressure,
        unit,
        measured_at,
        pulse_rate,
        user_id,
        status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::sfloat;
    use time::macros::datetime;

    fn unwrap_bp(m: Measurement) -> BloodPressureMeasurement {
        match m {
            Measurement::BloodPressure(bp) => bp,
            other => panic!("expected blood pressure, got {other:?}"),
        }
    }

    #[test]
    fn test_recognizes() {
        assert!(recognizes(
            &BLOOD_PRESSURE_SERVICE_UUID,
            &BLOOD_PRESSURE_MEASUREMENT_UUID
        ));
        assert!(!recognizes(
            &BLOOD_PRESSURE_SERVICE_UUID,
            &BtUuid::from_u16(0x2A36)
        ));
    }

    #[test]
    fn test_pressures_only() {
        let bp = unwrap_bp(decode(&[0x00, 0x78, 0x00, 0x50, 0x00, 0x5D, 0x00]).unwrap());
        assert_eq!(bp.systolic, 120.0);
        assert_eq!(bp.diastolic, 80.0);
        assert_eq!(bp.mean_arterial_pressure, 93.0);
        assert_eq!(bp.unit, PressureUnit::MmHg);
        assert_eq!(bp.measured_at, None);
        assert_eq!(bp.pulse_rate, None);
        assert_eq!(bp.user_id, None);
        assert_eq!(bp.status, None);
    }

    #[test]
    fn test_all_fields() {
        let payload = [
            0x1E, // timestamp, pulse, user, status
            0x7F, 0x00, // 127
            0x52, 0x00, // 82
            0x60, 0x00, // 96
            0xE8, 0x07, 6, 15, 8, 45, 0, // 2024-06-15 08:45:00
            0x48, 0x00, // 72 bpm
            0x02, // user 2
            0x04, 0x00, // irregular pulse
        ];
        let bp = unwrap_bp(decode(&payload).unwrap());
        assert_eq!((bp.systolic, bp.diastolic, bp.mean_arterial_pressure), (127.0, 82.0, 96.0));
        assert_eq!(bp.measured_at, Some(datetime!(2024-06-15 8:45)));
        assert_eq!(bp.pulse_rate, Some(72.0));
        assert_eq!(bp.user_id, Some(2));
        assert_eq!(bp.status, Some(0x0004));
    }

    #[test]
    fn test_kpa_is_not_converted() {
        // 16.0 / 10.7 / 12.5 kPa, all with exponent -1
        let payload = [0x01, 0xA0, 0xF0, 0x6B, 0xF0, 0x7D, 0xF0];
        let bp = unwrap_bp(decode(&payload).unwrap());
        assert_eq!(bp.unit, PressureUnit::KPa);
        assert_eq!(bp.systolic, 16.0);
        assert_eq!(bp.diastolic, 10.7);
        assert_eq!(bp.mean_arterial_pressure, 12.5);
    }

    #[test]
    fn test_reserved_pressure_fails() {
        let [lo, hi] = sfloat::NAN.to_le_bytes();
        let payload = [0x00, lo, hi, 0x50, 0x00, 0x5D, 0x00];
        assert_eq!(
            decode(&payload).unwrap_err(),
            DecodeError::ReservedValue {
                field: "systolic",
                raw: sfloat::NAN
            }
        );
    }

    #[test]
    fn test_reserved_pulse_rate_is_absent() {
        let [lo, hi] = sfloat::NRES.to_le_bytes();
        let payload = [0x04, 0x78, 0x00, 0x50, 0x00, 0x5D, 0x00, lo, hi];
        let bp = unwrap_bp(decode(&payload).unwrap());
        assert_eq!(bp.pulse_rate, None);
    }

    #[test]
    fn test_truncated_before_last_field() {
        let payload = [
            0x1E, 0x7F, 0x00, 0x52, 0x00, 0x60, 0x00, 0xE8, 0x07, 6, 15, 8, 45, 0, 0x48, 0x00,
            0x02, 0x04,
        ];
        assert!(matches!(
            decode(&payload),
            Err(DecodeError::TruncatedPayload {
                field: "measurement status",
                needed: 2,
                available: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_truncated_pressures() {
        assert!(matches!(
            decode(&[0x00, 0x78, 0x00, 0x50]),
            Err(DecodeError::TruncatedPayload { field: "diastolic", .. })
        ));
    }
}
