//! Vitals BLE
//!
//! Bluetooth Low Energy subsystem for health devices. It scans for weight scales and blood
//! pressure monitors, keeps one connection per device, decodes the Bluetooth SIG measurement
//! characteristics and collects the readings in per-device sessions.

/// Core utilities used throughout the crate.
pub mod core {
    /// Crate-wide constants.
    pub mod constants;
    /// Error types.
    pub mod error;
    /// Events published by the service.
    pub mod events;
    /// Custom macros for byte parsing.
    pub mod macros;
}

/// Data models of the crate's domain.
pub mod model {
    /// Discovery criteria and the device description tree.
    pub mod discovery;
    /// Decoded measurements.
    pub mod measurement;
    /// Per-device measurement sessions.
    pub mod session;
    /// The published service state.
    pub mod state;
    /// Bluetooth UUIDs.
    pub mod uuid;
}

/// Characteristic decoders.
pub mod decoder {
    /// Blood Pressure Measurement.
    pub mod blood_pressure;
    /// Dispatch of characteristic values to decoders.
    pub mod mapper;
    mod reader;
    /// IEEE-11073 16-bit float.
    pub mod sfloat;
    /// Weight Measurement.
    pub mod weight;
}

/// Interfaces between the service, the platform and the application.
pub mod api {
    /// Traits the platform Bluetooth stack is consumed through.
    pub mod platform;
    /// The application facing service trait.
    pub mod service;
}

/// Implementations of the service and the platform traits.
pub mod components {
    /// btleplug backed platform.
    pub mod btleplug;
    /// Lifecycle of one peripheral link.
    pub mod connection;
    /// Supervisor of a scan run.
    pub mod scanner;
    /// The BLE service.
    pub mod service;
    /// In-process simulated platform.
    pub mod simulated;
}

/// Service configuration.
pub mod config;

pub use crate::api::service::BleServiceApi;
pub use crate::components::service::BleService;
pub use crate::config::ServiceConfig;
pub use crate::core::error::{ConfigError, DecodeError, ServiceError};
pub use crate::core::events::BleServiceEvent;
pub use crate::model::state::BleServiceState;
