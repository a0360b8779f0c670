use crate::core::error::DecodeError;
use crate::get_u16_little_endian;
use time::{Date, Month, PrimitiveDateTime, Time};

/// Number of bytes of a SIG Date Time field.
pub(crate) const DATE_TIME_LEN: usize = 7;

/// Sequential little-endian reader over a characteristic payload.
///
/// Every read names the field it is after so that a short payload reports exactly which
/// flagged field was missing.
pub(crate) struct PayloadReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.bytes.len().saturating_sub(self.offset);
        if available < len {
            return Err(DecodeError::TruncatedPayload {
                field,
                offset: self.offset,
                needed: len,
                available,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(field, 1)?[0])
    }

    pub(crate) fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let slice = self.take(field, 2)?;
        Ok(get_u16_little_endian!(slice, 0))
    }

    /// Reads a SIG Date Time field.
    ///
    /// A zero year, month or day means "not known" and yields `None`.
    pub(crate) fn date_time(&mut self) -> Result<Option<PrimitiveDateTime>, DecodeError> {
        let raw = self.take("timestamp", DATE_TIME_LEN)?;
        let year = get_u16_little_endian!(raw, 0);
        let (month, day, hour, minute, second) = (raw[2], raw[3], raw[4], raw[5], raw[6]);
        if year == 0 || month == 0 || day == 0 {
            return Ok(None);
        }
        let invalid = || DecodeError::InvalidTimestamp {
            year,
            month,
            day,
            hour,
            minute,
            second,
        };
        let month = Month::try_from(month).map_err(|_| invalid())?;
        let date = Date::from_calendar_date(i32::from(year), month, day).map_err(|_| invalid())?;
        let time = Time::from_hms(hour, minute, second).map_err(|_| invalid())?;
        Ok(Some(PrimitiveDateTime::new(date, time)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_sequential_reads() {
        let mut reader = PayloadReader::new(&[0x01, 0x34, 0x12]);
        assert_eq!(reader.u8("flags"), Ok(0x01));
        assert_eq!(reader.u16("value"), Ok(0x1234));
        assert_eq!(
            reader.u8("extra"),
            Err(DecodeError::TruncatedPayload {
                field: "extra",
                offset: 3,
                needed: 1,
                available: 0
            })
        );
    }

    #[test]
    fn test_date_time() {
        let bytes = [0xE8, 0x07, 3, 1, 7, 30, 15];
        let mut reader = PayloadReader::new(&bytes);
        assert_eq!(reader.date_time(), Ok(Some(datetime!(2024-03-01 7:30:15))));
    }

    #[test]
    fn test_date_time_unknown_fields() {
        for bytes in [
            [0, 0, 3, 1, 7, 30, 15],
            [0xE8, 0x07, 0, 1, 7, 30, 15],
            [0xE8, 0x07, 3, 0, 7, 30, 15],
        ] {
            assert_eq!(PayloadReader::new(&bytes).date_time(), Ok(None));
        }
    }

    #[test]
    fn test_date_time_nonsense() {
        for bytes in [
            [0xE8, 0x07, 13, 1, 0, 0, 0],
            [0xE8, 0x07, 2, 30, 0, 0, 0],
            [0xE8, 0x07, 3, 1, 24, 0, 0],
            [0xE8, 0x07, 3, 1, 0, 60, 0],
        ] {
            assert!(matches!(
                PayloadReader::new(&bytes).date_time(),
                Err(DecodeError::InvalidTimestamp { .. })
            ));
        }
    }

    #[test]
    fn test_date_time_truncated() {
        let mut reader = PayloadReader::new(&[0xE8, 0x07, 3]);
        assert!(matches!(
            reader.date_time(),
            Err(DecodeError::TruncatedPayload {
                field: "timestamp",
                needed: 7,
                available: 3,
                ..
            })
        ));
    }
}
