//! IEEE-11073 16-bit SFLOAT
//!
//! Layout: the high nibble is a signed base-10 exponent, the low twelve bits are a signed
//! mantissa. A handful of mantissa values with a zero exponent are reserved as markers.

/// Not a Number.
pub const NAN: u16 = 0x07FF;
/// Not at this resolution.
pub const NRES: u16 = 0x0800;
pub const POSITIVE_INFINITY: u16 = 0x07FE;
pub const NEGATIVE_INFINITY: u16 = 0x0802;
/// Reserved for future use.
pub const RESERVED: u16 = 0x0801;

/// A decoded SFLOAT.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SFloat {
    Value(f64),
    NaN,
    NRes,
    PositiveInfinity,
    NegativeInfinity,
    Reserved,
}

impl SFloat {
    /// Decodes the raw little-endian-assembled 16-bit value.
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            NAN => return SFloat::NaN,
            NRES => return SFloat::NRes,
            POSITIVE_INFINITY => return SFloat::PositiveInfinity,
            NEGATIVE_INFINITY => return SFloat::NegativeInfinity,
            RESERVED => return SFloat::Reserved,
            _ => {}
        }

        let exponent = (((raw >> 12) as i8) << 4) >> 4;
        let mantissa = (raw & 0x0FFF) as i16;
        let mantissa = if mantissa >= 0x0800 {
            mantissa - 0x1000
        } else {
            mantissa
        };

        // dividing keeps values such as 72.5 exact
        let scale = 10f64.powi(i32::from(exponent.unsigned_abs()));
        let value = if exponent < 0 {
            f64::from(mantissa) / scale
        } else {
            f64::from(mantissa) * scale
        };
        SFloat::Value(value)
    }

    /// Returns the finite value, if this is not one of the reserved markers.
    pub fn value(self) -> Option<f64> {
        match self {
            SFloat::Value(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_values() {
        assert_eq!(SFloat::from_raw(0x0078), SFloat::Value(120.0));
        assert_eq!(SFloat::from_raw(0x0000), SFloat::Value(0.0));
        assert_eq!(SFloat::from_raw(0x1007), SFloat::Value(70.0));
        assert_eq!(SFloat::from_raw(0x0FFF), SFloat::Value(-1.0));
    }

    #[test]
    fn test_negative_exponent() {
        // 725 * 10^-1
        assert_eq!(SFloat::from_raw(0xF2D5), SFloat::Value(72.5));
        // 160 * 10^-1
        assert_eq!(SFloat::from_raw(0xF0A0), SFloat::Value(16.0));
        // -5 * 10^-2
        assert_eq!(SFloat::from_raw(0xEFFB), SFloat::Value(-0.05));
    }

    #[test]
    fn test_reserved_markers() {
        assert_eq!(SFloat::from_raw(NAN), SFloat::NaN);
        assert_eq!(SFloat::from_raw(NRES), SFloat::NRes);
        assert_eq!(SFloat::from_raw(POSITIVE_INFINITY), SFloat::PositiveInfinity);
        assert_eq!(SFloat::from_raw(NEGATIVE_INFINITY), SFloat::NegativeInfinity);
        assert_eq!(SFloat::from_raw(RESERVED), SFloat::Reserved);
        assert_eq!(SFloat::from_raw(NAN).value(), None);
        assert_eq!(SFloat::from_raw(0x0050).value(), Some(80.0));
    }
}
