use crate::model::uuid::BtUuid;

/// UUID for the Weight Scale Service.
pub const WEIGHT_SCALE_SERVICE_UUID: BtUuid = BtUuid::from_u16(0x181D);
/// UUID for the Weight Measurement Characteristic.
pub const WEIGHT_MEASUREMENT_UUID: BtUuid = BtUuid::from_u16(0x2A9D);
/// UUID for the Weight Scale Feature Characteristic.
pub const WEIGHT_SCALE_FEATURE_UUID: BtUuid = BtUuid::from_u16(0x2A9E);

/// UUID for the Blood Pressure Service.
pub const BLOOD_PRESSURE_SERVICE_UUID: BtUuid = BtUuid::from_u16(0x1810);
/// UUID for the Blood Pressure Measurement Characteristic.
pub const BLOOD_PRESSURE_MEASUREMENT_UUID: BtUuid = BtUuid::from_u16(0x2A35);
/// UUID for the Blood Pressure Feature Characteristic.
pub const BLOOD_PRESSURE_FEATURE_UUID: BtUuid = BtUuid::from_u16(0x2A49);

/// Client Characteristic Configuration Descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIGURATION_UUID: BtUuid = BtUuid::from_u16(0x2902);

/// The Bluetooth Base UUID suffix appended to 16 and 32 bit aliases.
pub const BLUETOOTH_BASE_SUFFIX: &str = "-0000-1000-8000-00805F9B34FB";

/// Default capacity of the service event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;
