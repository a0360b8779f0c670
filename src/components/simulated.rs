//! Simulated Radio
//!
//! An in-process implementation of the platform traits. Peripherals are registered up front,
//! then advertisements, notifications, bond changes and link losses are injected by hand. Used
//! by the service tests and by the `mock` build of the binary.
use crate::api::platform::{
    Advertisement, BleAdapter, DiscoveredCharacteristic, DiscoveredService, GattLink, LinkEvent,
    LinkEventStream, ScanEvent, ScanStream,
};
use crate::core::constants::{
    BLOOD_PRESSURE_FEATURE_UUID, BLOOD_PRESSURE_MEASUREMENT_UUID, BLOOD_PRESSURE_SERVICE_UUID,
    CLIENT_CHARACTERISTIC_CONFIGURATION_UUID, WEIGHT_MEASUREMENT_UUID, WEIGHT_SCALE_FEATURE_UUID,
    WEIGHT_SCALE_SERVICE_UUID,
};
use crate::model::uuid::BtUuid;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use btleplug::api::BDAddr;
use futures::stream;
use log::{debug, trace};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

/// A peripheral known to the simulated radio.
#[derive(Clone, Debug)]
pub struct SimulatedPeripheral {
    address: BDAddr,
    name: Option<String>,
    services: Vec<DiscoveredService>,
    values: HashMap<(BtUuid, BtUuid), Vec<u8>>,
    manufacturer_data: HashMap<u16, Vec<u8>>,
}

fn readable(uuid: BtUuid) -> DiscoveredCharacteristic {
    DiscoveredCharacteristic {
        uuid,
        can_read: true,
        can_notify: false,
        can_indicate: false,
        descriptors: Vec::new(),
    }
}

fn indicated(uuid: BtUuid) -> DiscoveredCharacteristic {
    DiscoveredCharacteristic {
        uuid,
        can_read: false,
        can_notify: false,
        can_indicate: true,
        descriptors: Vec::new(),
    }
}

impl SimulatedPeripheral {
    pub fn new(address: BDAddr, name: Option<&str>) -> Self {
        Self {
            address,
            name: name.map(str::to_string),
            services: Vec::new(),
            values: HashMap::new(),
            manufacturer_data: HashMap::new(),
        }
    }

    /// A SIG weight scale supporting timestamps, multiple users and BMI.
    pub fn weight_scale(address: BDAddr) -> Self {
        Self::new(address, Some("Simulated Scale"))
            .with_service(
                WEIGHT_SCALE_SERVICE_UUID,
                vec![
                    readable(WEIGHT_SCALE_FEATURE_UUID),
                    indicated(WEIGHT_MEASUREMENT_UUID),
                ],
            )
            .with_value(
                WEIGHT_SCALE_SERVICE_UUID,
                WEIGHT_SCALE_FEATURE_UUID,
                vec![0x07, 0x00, 0x00, 0x00],
            )
    }

    /// A SIG blood pressure monitor.
    pub fn blood_pressure_monitor(address: BDAddr) -> Self {
        Self::new(address, Some("Simulated Cuff"))
            .with_service(
                BLOOD_PRESSURE_SERVICE_UUID,
                vec![
                    readable(BLOOD_PRESSURE_FEATURE_UUID),
                    indicated(BLOOD_PRESSURE_MEASUREMENT_UUID),
                ],
            )
            .with_value(
                BLOOD_PRESSURE_SERVICE_UUID,
                BLOOD_PRESSURE_FEATURE_UUID,
                vec![0x00, 0x00],
            )
    }

    pub fn with_service(
        mut self,
        uuid: BtUuid,
        characteristics: Vec<DiscoveredCharacteristic>,
    ) -> Self {
        self.services.push(DiscoveredService {
            uuid,
            characteristics,
        });
        self
    }

    pub fn with_value(mut self, service: BtUuid, characteristic: BtUuid, value: Vec<u8>) -> Self {
        self.values.insert((service, characteristic), value);
        self
    }

    pub fn with_manufacturer_data(mut self, company: u16, data: Vec<u8>) -> Self {
        self.manufacturer_data.insert(company, data);
        self
    }

    pub fn get_address(&self) -> BDAddr {
        self.address
    }

    pub fn advertisement(&self) -> Advertisement {
        Advertisement {
            address: self.address,
            local_name: self.name.clone(),
            services: self.services.iter().map(|s| s.uuid).collect(),
            manufacturer_data: self.manufacturer_data.clone(),
            rssi: Some(-60),
        }
    }
}

struct OpenLink {
    id: u64,
    events: UnboundedSender<LinkEvent>,
    subscriptions: HashSet<(BtUuid, BtUuid)>,
}

struct Radio {
    enabled: bool,
    permissions_granted: bool,
    peripherals: HashMap<BDAddr, SimulatedPeripheral>,
    scan: Option<(Vec<BtUuid>, UnboundedSender<ScanEvent>)>,
    links: HashMap<BDAddr, OpenLink>,
    failing: HashSet<BDAddr>,
    connect_attempts: usize,
    next_link_id: u64,
}

struct Shared {
    radio: Mutex<Radio>,
    /// `true` while connection attempts may complete.
    gate: watch::Sender<bool>,
    /// Bumped on every connect attempt and subscription.
    activity: watch::Sender<u64>,
}

/// In-process radio implementing `BleAdapter`. Clones share the same radio.
#[derive(Clone)]
pub struct SimulatedAdapter {
    shared: Arc<Shared>,
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                radio: Mutex::new(Radio {
                    enabled: true,
                    permissions_granted: true,
                    peripherals: HashMap::new(),
                    scan: None,
                    links: HashMap::new(),
                    failing: HashSet::new(),
                    connect_attempts: 0,
                    next_link_id: 0,
                }),
                gate: watch::Sender::new(true),
                activity: watch::Sender::new(0),
            }),
        }
    }

    fn radio(&self) -> MutexGuard<'_, Radio> {
        self.shared
            .radio
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.shared.activity.send_modify(|n| *n += 1);
    }

    pub fn add_peripheral(&self, peripheral: SimulatedPeripheral) {
        self.radio()
            .peripherals
            .insert(peripheral.address, peripheral);
    }

    /// Powers the radio on or off. Powering off while scanning is reported on the scan stream.
    pub fn set_enabled(&self, enabled: bool) {
        let mut radio = self.radio();
        radio.enabled = enabled;
        if let Some((_, scan)) = &radio.scan {
            if scan
                .send(ScanEvent::AdapterStateChanged { enabled })
                .is_err()
            {
                trace!("scan receiver gone, adapter state change dropped");
            }
        }
    }

    pub fn power_off(&self) {
        self.set_enabled(false);
    }

    pub fn set_permissions_granted(&self, granted: bool) {
        self.radio().permissions_granted = granted;
    }

    /// Broadcasts one advertisement of a registered peripheral.
    ///
    /// # Returns
    /// `false` if nothing is scanning, the peripheral is unknown or filtered out.
    pub fn advertise(&self, address: BDAddr) -> bool {
        let radio = self.radio();
        let (Some((filter, scan)), Some(peripheral)) =
            (&radio.scan, radio.peripherals.get(&address))
        else {
            return false;
        };
        let advertisement = peripheral.advertisement();
        if !filter.is_empty() && !filter.iter().any(|s| advertisement.services.contains(s)) {
            return false;
        }
        scan.send(ScanEvent::Advertisement(advertisement)).is_ok()
    }

    /// Sends a notification on an open link.
    ///
    /// # Returns
    /// `false` if the link is not open or the characteristic is not subscribed.
    pub fn notify(
        &self,
        address: BDAddr,
        service: BtUuid,
        characteristic: BtUuid,
        value: Vec<u8>,
    ) -> bool {
        let radio = self.radio();
        let Some(link) = radio.links.get(&address) else {
            return false;
        };
        if !link.subscriptions.contains(&(service, characteristic)) {
            return false;
        }
        link.events
            .send(LinkEvent::ValueChanged(
                crate::api::platform::CharacteristicValue {
                    service,
                    characteristic,
                    value,
                },
            ))
            .is_ok()
    }

    pub fn set_bonded(&self, address: BDAddr, bonded: bool) -> bool {
        match self.radio().links.get(&address) {
            Some(link) => link
                .events
                .send(LinkEvent::BondStateChanged { bonded })
                .is_ok(),
            None => false,
        }
    }

    /// Drops an open link from the peripheral side.
    pub fn drop_link(&self, address: BDAddr, reason: Option<&str>) -> bool {
        match self.radio().links.remove(&address) {
            Some(link) => link
                .events
                .send(LinkEvent::Disconnected {
                    reason: reason.map(str::to_string),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Makes every connection attempt to `address` fail.
    pub fn fail_connections_to(&self, address: BDAddr) {
        self.radio().failing.insert(address);
    }

    /// Keeps connection attempts pending until `release_connections`.
    pub fn hold_connections(&self) {
        self.shared.gate.send_replace(false);
    }

    pub fn release_connections(&self) {
        self.shared.gate.send_replace(true);
    }

    pub fn is_scanning(&self) -> bool {
        self.radio().scan.is_some()
    }

    pub fn open_links(&self) -> usize {
        self.radio().links.len()
    }

    pub fn connect_attempts(&self) -> usize {
        self.radio().connect_attempts
    }

    pub fn is_subscribed(&self, address: BDAddr, characteristic: BtUuid) -> bool {
        self.radio()
            .links
            .get(&address)
            .is_some_and(|l| l.subscriptions.iter().any(|(_, c)| *c == characteristic))
    }

    /// Waits until a characteristic of an open link is subscribed.
    pub async fn wait_for_subscription(&self, address: BDAddr, characteristic: BtUuid) {
        let mut activity = self.shared.activity.subscribe();
        while !self.is_subscribed(address, characteristic) {
            if activity.changed().await.is_err() {
                return;
            }
        }
    }

    /// Waits until at least `attempts` connection attempts were made.
    pub async fn wait_for_connect_attempts(&self, attempts: usize) {
        let mut activity = self.shared.activity.subscribe();
        while self.connect_attempts() < attempts {
            if activity.changed().await.is_err() {
                return;
            }
        }
    }

    fn with_link<T>(
        &self,
        address: BDAddr,
        id: u64,
        f: impl FnOnce(&mut OpenLink, &SimulatedPeripheral) -> Result<T>,
    ) -> Result<T> {
        let mut radio = self.radio();
        let radio = &mut *radio;
        let peripheral = radio
            .peripherals
            .get(&address)
            .ok_or_else(|| anyhow!("unknown peripheral {}", address))?;
        match radio.links.get_mut(&address) {
            Some(link) if link.id == id => f(link, peripheral),
            _ => Err(anyhow!("link to {} is closed", address)),
        }
    }
}

fn receiver_stream<T: Send + 'static>(
    rx: UnboundedReceiver<T>,
) -> impl futures::Stream<Item = T> + Send {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

#[async_trait]
impl BleAdapter for SimulatedAdapter {
    type Link = SimulatedLink;

    async fn is_enabled(&self) -> Result<bool> {
        Ok(self.radio().enabled)
    }

    async fn has_permissions(&self) -> Result<bool> {
        Ok(self.radio().permissions_granted)
    }

    async fn start_scan(&self, services: &[BtUuid]) -> Result<ScanStream> {
        let mut radio = self.radio();
        if !radio.enabled {
            return Err(anyhow!("adapter is powered off"));
        }
        let (tx, rx) = unbounded_channel();
        radio.scan = Some((services.to_vec(), tx));
        debug!("simulated scan started");
        Ok(Box::pin(receiver_stream(rx)))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.radio().scan = None;
        debug!("simulated scan stopped");
        Ok(())
    }

    async fn connect(&self, address: BDAddr) -> Result<SimulatedLink> {
        self.radio().connect_attempts += 1;
        self.bump();

        let mut gate = self.shared.gate.subscribe();
        gate.wait_for(|open| *open).await?;

        let mut radio = self.radio();
        if !radio.enabled {
            return Err(anyhow!("adapter is powered off"));
        }
        if radio.failing.contains(&address) {
            return Err(anyhow!("connection to {} refused", address));
        }
        if !radio.peripherals.contains_key(&address) {
            return Err(anyhow!("unknown peripheral {}", address));
        }
        let id = radio.next_link_id;
        radio.next_link_id += 1;
        let (tx, rx) = unbounded_channel();
        radio.links.insert(
            address,
            OpenLink {
                id,
                events: tx,
                subscriptions: HashSet::new(),
            },
        );
        Ok(SimulatedLink {
            adapter: self.clone(),
            address,
            id,
            events: Mutex::new(Some(rx)),
        })
    }
}

/// A link opened by `SimulatedAdapter`.
pub struct SimulatedLink {
    adapter: SimulatedAdapter,
    address: BDAddr,
    id: u64,
    events: Mutex<Option<UnboundedReceiver<LinkEvent>>>,
}

#[async_trait]
impl GattLink for SimulatedLink {
    async fn discover_services(&self) -> Result<Vec<DiscoveredService>> {
        self.adapter
            .with_link(self.address, self.id, |_, peripheral| {
                Ok(peripheral.services.clone())
            })
    }

    async fn discover_descriptors(
        &self,
        service: BtUuid,
        characteristic: BtUuid,
    ) -> Result<Vec<BtUuid>> {
        self.adapter
            .with_link(self.address, self.id, |_, peripheral| {
                let found = peripheral
                    .services
                    .iter()
                    .find(|s| s.uuid == service)
                    .and_then(|s| s.characteristic(&characteristic))
                    .ok_or_else(|| anyhow!("no characteristic {}", characteristic))?;
                Ok(if found.can_subscribe() {
                    vec![CLIENT_CHARACTERISTIC_CONFIGURATION_UUID]
                } else {
                    Vec::new()
                })
            })
    }

    async fn read(&self, service: BtUuid, characteristic: BtUuid) -> Result<Vec<u8>> {
        self.adapter
            .with_link(self.address, self.id, |_, peripheral| {
                peripheral
                    .values
                    .get(&(service, characteristic))
                    .cloned()
                    .ok_or_else(|| anyhow!("{} is not readable", characteristic))
            })
    }

    async fn subscribe(&self, service: BtUuid, characteristic: BtUuid) -> Result<()> {
        self.adapter
            .with_link(self.address, self.id, |link, _| {
                link.subscriptions.insert((service, characteristic));
                Ok(())
            })?;
        self.adapter.bump();
        Ok(())
    }

    async fn events(&self) -> Result<LinkEventStream> {
        let rx = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| anyhow!("events of {} already taken", self.address))?;
        Ok(Box::pin(receiver_stream(rx)))
    }

    async fn disconnect(&self) -> Result<()> {
        let mut radio = self.adapter.radio();
        if radio.links.get(&self.address).is_some_and(|l| l.id == self.id) {
            radio.links.remove(&self.address);
        }
        Ok(())
    }
}

/// Encodes a Weight Measurement in kilograms, optionally with a user id.
pub fn encode_weight(kilograms: f64, user_id: Option<u8>) -> Vec<u8> {
    let raw = (kilograms / 0.005).round() as u16;
    let mut payload = vec![if user_id.is_some() { 0x04 } else { 0x00 }];
    payload.extend_from_slice(&raw.to_le_bytes());
    if let Some(user_id) = user_id {
        payload.push(user_id);
    }
    payload
}

/// Encodes a Blood Pressure Measurement in mmHg with a pulse rate, all whole numbers.
pub fn encode_blood_pressure(systolic: u16, diastolic: u16, mean: u16, pulse: u16) -> Vec<u8> {
    let mut payload = vec![0x04];
    for value in [systolic, diastolic, mean, pulse] {
        payload.extend_from_slice(&(value & 0x0FFF).to_le_bytes());
    }
    payload
}
