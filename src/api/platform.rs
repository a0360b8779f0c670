//! Platform API
//!
//! The narrow interface the BLE service consumes from the operating system's Bluetooth stack.
//! `BleAdapter` covers scanning and establishing links, `GattLink` covers the GATT operations
//! on one established link. The btleplug backend and the simulated radio both implement these
//! traits.
use crate::model::uuid::BtUuid;
use anyhow::Result;
use async_trait::async_trait;
use btleplug::api::BDAddr;
use futures::stream::Stream;
use std::collections::HashMap;
use std::pin::Pin;

/// An advertisement packet received while scanning.
#[derive(Clone, Debug, PartialEq)]
pub struct Advertisement {
    pub address: BDAddr,
    pub local_name: Option<String>,
    pub services: Vec<BtUuid>,
    /// Manufacturer specific data keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub rssi: Option<i16>,
}

/// Items of the scan stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ScanEvent {
    Advertisement(Advertisement),
    /// The adapter was switched on or off while scanning.
    AdapterStateChanged { enabled: bool },
}

pub type ScanStream = Pin<Box<dyn Stream<Item = ScanEvent> + Send>>;

/// A characteristic value, either read or notified.
#[derive(Clone, Debug, PartialEq)]
pub struct CharacteristicValue {
    pub service: BtUuid,
    pub characteristic: BtUuid,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredCharacteristic {
    pub uuid: BtUuid,
    pub can_read: bool,
    pub can_notify: bool,
    pub can_indicate: bool,
    pub descriptors: Vec<BtUuid>,
}

impl DiscoveredCharacteristic {
    pub fn can_subscribe(&self) -> bool {
        self.can_notify || self.can_indicate
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredService {
    pub uuid: BtUuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl DiscoveredService {
    pub fn characteristic(&self, uuid: &BtUuid) -> Option<&DiscoveredCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// Asynchronous events of an established link.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    ValueChanged(CharacteristicValue),
    BondStateChanged { bonded: bool },
    /// The remote side or the stack dropped the link.
    Disconnected { reason: Option<String> },
}

pub type LinkEventStream = Pin<Box<dyn Stream<Item = LinkEvent> + Send>>;

/// Scanning and connection establishment.
#[cfg_attr(test, mockall::automock(type Link = MockGattLink;))]
#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    type Link: GattLink;

    /// Returns true if the radio is powered on.
    async fn is_enabled(&self) -> Result<bool>;

    /// Returns true if the process may scan and connect.
    async fn has_permissions(&self) -> Result<bool>;

    /// Starts scanning, filtered by advertised service uuids.
    ///
    /// # Arguments
    /// - `services`: Service uuids to filter on. An empty slice scans unfiltered.
    async fn start_scan(&self, services: &[BtUuid]) -> Result<ScanStream>;

    async fn stop_scan(&self) -> Result<()>;

    /// Establishes a link to the peripheral with the given address.
    async fn connect(&self, address: BDAddr) -> Result<Self::Link>;
}

/// GATT operations on one established link.
///
/// Operations on a link are issued one at a time by its connection task.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GattLink: Send + Sync + 'static {
    async fn discover_services(&self) -> Result<Vec<DiscoveredService>>;

    async fn discover_descriptors(
        &self,
        service: BtUuid,
        characteristic: BtUuid,
    ) -> Result<Vec<BtUuid>>;

    async fn read(&self, service: BtUuid, characteristic: BtUuid) -> Result<Vec<u8>>;

    /// Enables notifications or indications for a characteristic.
    async fn subscribe(&self, service: BtUuid, characteristic: BtUuid) -> Result<()>;

    /// Stream of link events. Ends after the link is gone.
    async fn events(&self) -> Result<LinkEventStream>;

    async fn disconnect(&self) -> Result<()>;
}
