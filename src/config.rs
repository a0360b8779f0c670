//! Service Configuration
//!
//! JSON configuration of the BLE service: event buffer size, enabled decoders and the catalog
//! of supported devices. Every field is optional and falls back to its default.
use crate::core::constants::DEFAULT_EVENT_CAPACITY;
use crate::core::error::ConfigError;
use crate::decoder::mapper::{CharacteristicDecoder, MeasurementMapper};
use crate::model::discovery::{DeviceCatalog, DiscoveryCriteria};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Capacity of the event broadcast buffer. Slower subscribers lose the oldest events.
    pub event_capacity: usize,
    /// Decoders in dispatch order.
    pub decoders: Vec<CharacteristicDecoder>,
    pub devices: DeviceCatalog,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            decoders: CharacteristicDecoder::ALL.to_vec(),
            devices: DeviceCatalog::default(),
        }
    }
}

impl ServiceConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            cause: e.to_string(),
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn store(&self, path: &Path) -> Result<(), ConfigError> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        fs::write(path, json).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            cause: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        self.devices.discovery_criteria().map(|_| ())
    }

    /// Scan criteria covering every configured device.
    pub fn discovery_criteria(&self) -> Result<DiscoveryCriteria, ConfigError> {
        self.devices.discovery_criteria()
    }

    pub fn mapper(&self) -> MeasurementMapper {
        MeasurementMapper::new(self.decoders.iter().copied())
    }
}
