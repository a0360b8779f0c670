//! Core Events
//!
//! Events published by the BLE service on its broadcast channel. Observers receive them in
//! emission order.
use btleplug::api::BDAddr;
use std::fmt;

use crate::api::platform::{CharacteristicValue, DiscoveredService};
use crate::model::{measurement::Measurement, session::DeviceSession};

#[derive(Clone, Debug, PartialEq)]
pub enum BleServiceEvent {
    /// A matching advertisement triggered a connection attempt.
    DeviceDiscovered {
        address: BDAddr,
        name: Option<String>,
    },
    DeviceConnected {
        address: BDAddr,
    },
    /// The link is gone, or a connection step failed.
    DeviceDisconnected {
        address: BDAddr,
        reason: Option<String>,
    },
    DevicePaired {
        address: BDAddr,
    },
    DeviceUnpaired {
        address: BDAddr,
    },
    ServicesDiscovered {
        address: BDAddr,
        services: Vec<DiscoveredService>,
    },
    /// A raw value was read or notified.
    CharacteristicChanged {
        address: BDAddr,
        value: CharacteristicValue,
    },
    MeasurementDecoded {
        address: BDAddr,
        measurement: Measurement,
    },
    /// A device session ended; carries its final history.
    SessionClosed(DeviceSession),
    ScanFailed {
        cause: String,
    },
    Error {
        cause: String,
    },
}

impl BleServiceEvent {
    /// The device the event concerns, if any.
    pub fn get_address(&self) -> Option<BDAddr> {
        match self {
            BleServiceEvent::DeviceDiscovered { address, .. }
            | BleServiceEvent::DeviceConnected { address }
            | BleServiceEvent::DeviceDisconnected { address, .. }
            | BleServiceEvent::DevicePaired { address }
            | BleServiceEvent::DeviceUnpaired { address }
            | BleServiceEvent::ServicesDiscovered { address, .. }
            | BleServiceEvent::CharacteristicChanged { address, .. }
            | BleServiceEvent::MeasurementDecoded { address, .. } => Some(*address),
            BleServiceEvent::SessionClosed(session) => Some(session.get_address()),
            BleServiceEvent::ScanFailed { .. } | BleServiceEvent::Error { .. } => None,
        }
    }
}

impl fmt::Display for BleServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleServiceEvent::DeviceDiscovered { address, name } => match name {
                Some(name) => write!(f, "discovered {} ({})", address, name),
                None => write!(f, "discovered {}", address),
            },
            BleServiceEvent::DeviceConnected { address } => write!(f, "connected {}", address),
            BleServiceEvent::DeviceDisconnected { address, reason } => match reason {
                Some(reason) => write!(f, "disconnected {}: {}", address, reason),
                None => write!(f, "disconnected {}", address),
            },
            BleServiceEvent::DevicePaired { address } => write!(f, "paired {}", address),
            BleServiceEvent::DeviceUnpaired { address } => write!(f, "unpaired {}", address),
            BleServiceEvent::ServicesDiscovered { address, services } => {
                write!(f, "{} services discovered on {}", services.len(), address)
            }
            BleServiceEvent::CharacteristicChanged { address, value } => write!(
                f,
                "{} changed on {}: {:02X?}",
                value.characteristic, address, value.value
            ),
            BleServiceEvent::MeasurementDecoded {
                address,
                measurement,
            } => write!(f, "{} from {}", measurement, address),
            BleServiceEvent::SessionClosed(session) => write!(
                f,
                "session of {} closed with {} measurements",
                session.get_address(),
                session.get_measurements().len()
            ),
            BleServiceEvent::ScanFailed { cause } => write!(f, "scan failed: {}", cause),
            BleServiceEvent::Error { cause } => write!(f, "error: {}", cause),
        }
    }
}
