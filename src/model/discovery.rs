//! Discovery Model
//!
//! Declarative description of the supported devices:
//! - `DiscoveryCriteria` decide whether an advertisement is a supported device
//! - `DeviceDescription` trees say which characteristics are read or subscribed once connected
//! - `DeviceCatalog` picks the description governing a connection

use crate::api::platform::Advertisement;
use crate::core::constants::{
    BLOOD_PRESSURE_FEATURE_UUID, BLOOD_PRESSURE_MEASUREMENT_UUID, BLOOD_PRESSURE_SERVICE_UUID,
    WEIGHT_MEASUREMENT_UUID, WEIGHT_SCALE_FEATURE_UUID, WEIGHT_SCALE_SERVICE_UUID,
};
use crate::core::error::ConfigError;
use crate::model::uuid::BtUuid;
use serde::{Deserialize, Serialize};

/// Rules deciding whether an advertisement belongs to a supported device.
///
/// Both variants hold a non-empty service list, which doubles as the platform scan filter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCriteria", into = "RawCriteria")]
pub enum DiscoveryCriteria {
    /// Any of the services is advertised.
    AdvertisedServices(Vec<BtUuid>),
    /// Manufacturer data for `manufacturer_id` is present and any of the services is advertised.
    AccessoryIdentifier {
        manufacturer_id: u16,
        services: Vec<BtUuid>,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawCriteria {
    AdvertisedServices {
        services: Vec<BtUuid>,
    },
    AccessoryIdentifier {
        manufacturer_id: u16,
        services: Vec<BtUuid>,
    },
}

impl TryFrom<RawCriteria> for DiscoveryCriteria {
    type Error = ConfigError;

    fn try_from(raw: RawCriteria) -> Result<Self, Self::Error> {
        match raw {
            RawCriteria::AdvertisedServices { services } => Self::advertised_services(services),
            RawCriteria::AccessoryIdentifier {
                manufacturer_id,
                services,
            } => Self::accessory_identifier(manufacturer_id, services),
        }
    }
}

impl From<DiscoveryCriteria> for RawCriteria {
    fn from(criteria: DiscoveryCriteria) -> Self {
        match criteria {
            DiscoveryCriteria::AdvertisedServices(services) => {
                RawCriteria::AdvertisedServices { services }
            }
            DiscoveryCriteria::AccessoryIdentifier {
                manufacturer_id,
                services,
            } => RawCriteria::AccessoryIdentifier {
                manufacturer_id,
                services,
            },
        }
    }
}

fn dedup(services: impl IntoIterator<Item = BtUuid>) -> Vec<BtUuid> {
    let mut unique = Vec::new();
    for service in services {
        if !unique.contains(&service) {
            unique.push(service);
        }
    }
    unique
}

impl DiscoveryCriteria {
    /// # Errors
    /// `ConfigError::EmptyDiscoveryCriteria` if `services` is empty.
    pub fn advertised_services(
        services: impl IntoIterator<Item = BtUuid>,
    ) -> Result<Self, ConfigError> {
        let services = dedup(services);
        if services.is_empty() {
            return Err(ConfigError::EmptyDiscoveryCriteria);
        }
        Ok(Self::AdvertisedServices(services))
    }

    /// # Errors
    /// `ConfigError::EmptyDiscoveryCriteria` if `services` is empty.
    pub fn accessory_identifier(
        manufacturer_id: u16,
        services: impl IntoIterator<Item = BtUuid>,
    ) -> Result<Self, ConfigError> {
        let services = dedup(services);
        if services.is_empty() {
            return Err(ConfigError::EmptyDiscoveryCriteria);
        }
        Ok(Self::AccessoryIdentifier {
            manufacturer_id,
            services,
        })
    }

    /// Combines the service lists of several criteria into one `AdvertisedServices` filter.
    pub fn union<'a>(
        criteria: impl IntoIterator<Item = &'a DiscoveryCriteria>,
    ) -> Result<Self, ConfigError> {
        Self::advertised_services(
            criteria
                .into_iter()
                .flat_map(|c| c.get_service_uuids().iter().copied()),
        )
    }

    /// The service UUIDs to hand to the platform scan filter.
    pub fn get_service_uuids(&self) -> &[BtUuid] {
        match self {
            DiscoveryCriteria::AdvertisedServices(services) => services,
            DiscoveryCriteria::AccessoryIdentifier { services, .. } => services,
        }
    }

    /// Checks whether an advertisement represents a supported device.
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        let advertises_service = self
            .get_service_uuids()
            .iter()
            .any(|s| advertisement.services.contains(s));
        match self {
            DiscoveryCriteria::AdvertisedServices(_) => advertises_service,
            DiscoveryCriteria::AccessoryIdentifier {
                manufacturer_id, ..
            } => {
                advertises_service
                    && advertisement
                        .manufacturer_data
                        .contains_key(manufacturer_id)
            }
        }
    }
}

/// What to do with one characteristic once connected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicDescription {
    pub uuid: BtUuid,
    #[serde(default)]
    pub discover_descriptors: bool,
    #[serde(default)]
    pub read_on_connect: bool,
    #[serde(default)]
    pub subscribe: bool,
}

impl CharacteristicDescription {
    /// A characteristic whose notifications or indications are subscribed.
    pub fn subscribed(uuid: BtUuid) -> Self {
        Self {
            uuid,
            discover_descriptors: true,
            read_on_connect: false,
            subscribe: true,
        }
    }

    /// A characteristic read once after service discovery.
    pub fn read_once(uuid: BtUuid) -> Self {
        Self {
            uuid,
            discover_descriptors: false,
            read_on_connect: true,
            subscribe: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub uuid: BtUuid,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicDescription>,
}

impl ServiceDescription {
    pub fn characteristic(&self, uuid: &BtUuid) -> Option<&CharacteristicDescription> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// A supported device type.
///
/// Characteristics without an entry are discovered for information only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub name: String,
    pub criteria: DiscoveryCriteria,
    #[serde(default)]
    pub services: Vec<ServiceDescription>,
}

impl DeviceDescription {
    /// Bluetooth SIG Weight Scale profile.
    pub fn weight_scale() -> Self {
        Self {
            name: "Weight Scale".to_string(),
            criteria: DiscoveryCriteria::AdvertisedServices(vec![WEIGHT_SCALE_SERVICE_UUID]),
            services: vec![ServiceDescription {
                uuid: WEIGHT_SCALE_SERVICE_UUID,
                characteristics: vec![
                    CharacteristicDescription::read_once(WEIGHT_SCALE_FEATURE_UUID),
                    CharacteristicDescription::subscribed(WEIGHT_MEASUREMENT_UUID),
                ],
            }],
        }
    }

    /// Bluetooth SIG Blood Pressure profile.
    pub fn blood_pressure_monitor() -> Self {
        Self {
            name: "Blood Pressure Monitor".to_string(),
            criteria: DiscoveryCriteria::AdvertisedServices(vec![BLOOD_PRESSURE_SERVICE_UUID]),
            services: vec![ServiceDescription {
                uuid: BLOOD_PRESSURE_SERVICE_UUID,
                characteristics: vec![
                    CharacteristicDescription::read_once(BLOOD_PRESSURE_FEATURE_UUID),
                    CharacteristicDescription::subscribed(BLOOD_PRESSURE_MEASUREMENT_UUID),
                ],
            }],
        }
    }

    /// Description used for a matched device that no catalog entry covers.
    pub fn unlisted(criteria: DiscoveryCriteria) -> Self {
        Self {
            name: "Unlisted device".to_string(),
            criteria,
            services: Vec::new(),
        }
    }

    pub fn service(&self, uuid: &BtUuid) -> Option<&ServiceDescription> {
        self.services.iter().find(|s| s.uuid == *uuid)
    }

    pub fn characteristic(
        &self,
        service: &BtUuid,
        characteristic: &BtUuid,
    ) -> Option<&CharacteristicDescription> {
        self.service(service)?.characteristic(characteristic)
    }
}

/// Ordered list of supported device types.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceCatalog {
    devices: Vec<DeviceDescription>,
}

impl Default for DeviceCatalog {
    fn default() -> Self {
        Self {
            devices: vec![
                DeviceDescription::weight_scale(),
                DeviceDescription::blood_pressure_monitor(),
            ],
        }
    }
}

impl DeviceCatalog {
    pub fn new(devices: Vec<DeviceDescription>) -> Self {
        Self { devices }
    }

    pub fn get_devices(&self) -> &[DeviceDescription] {
        &self.devices
    }

    /// Returns the first description whose criteria match the advertisement.
    pub fn describe(&self, advertisement: &Advertisement) -> Option<&DeviceDescription> {
        self.devices
            .iter()
            .find(|d| d.criteria.matches(advertisement))
    }

    /// Scan criteria covering every catalog entry.
    ///
    /// # Errors
    /// `ConfigError::EmptyCatalog` if the catalog holds no devices.
    pub fn discovery_criteria(&self) -> Result<DiscoveryCriteria, ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }
        DiscoveryCriteria::union(self.devices.iter().map(|d| &d.criteria))
    }
}
