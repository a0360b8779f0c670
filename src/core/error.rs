use thiserror::Error;

/// Errors raised while building configuration values.
///
/// These surface at construction or load time, never while scanning.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid uuid format: {0}")]
    InvalidUuidFormat(String),

    #[error("discovery criteria must name at least one service uuid")]
    EmptyDiscoveryCriteria,

    #[error("device catalog is empty")]
    EmptyCatalog,

    #[error("event capacity must be at least 1")]
    ZeroEventCapacity,

    #[error("cannot read {path}: {cause}")]
    Unreadable { path: String, cause: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Error type for characteristic payload decoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("truncated payload: {field} needs {needed} bytes at offset {offset}, got {available}")]
    TruncatedPayload {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid timestamp {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")]
    InvalidTimestamp {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    },

    #[error("reserved sfloat value 0x{raw:04X} in {field}")]
    ReservedValue { field: &'static str, raw: u16 },
}

/// Errors returned by the service operations themselves.
///
/// Adapter and permission problems are reported through the published state instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("a scan is already active")]
    AlreadyScanning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::InvalidUuidFormat("xyz".to_string());
        assert_eq!(err.to_string(), "invalid uuid format: xyz");

        let err = DecodeError::TruncatedPayload {
            field: "user id",
            offset: 10,
            needed: 1,
            available: 0,
        };
        assert_eq!(
            err.to_string(),
            "truncated payload: user id needs 1 bytes at offset 10, got 0"
        );

        let err = DecodeError::InvalidTimestamp {
            year: 2024,
            month: 13,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert_eq!(err.to_string(), "invalid timestamp 2024-13-01 00:00:00");

        let err = DecodeError::ReservedValue {
            field: "systolic",
            raw: 0x07FF,
        };
        assert_eq!(err.to_string(), "reserved sfloat value 0x07FF in systolic");

        assert_eq!(
            ServiceError::AlreadyScanning.to_string(),
            "a scan is already active"
        );
    }
}
