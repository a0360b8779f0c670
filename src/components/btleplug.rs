//! btleplug Backend
//!
//! Implements the platform traits on top of a btleplug `Central`. Advertisements are assembled
//! from the central's event stream and the peripheral properties; link loss is detected from
//! `DeviceDisconnected` central events.
use crate::api::platform::{
    Advertisement, BleAdapter, CharacteristicValue, DiscoveredCharacteristic, DiscoveredService,
    GattLink, LinkEvent, LinkEventStream, ScanEvent, ScanStream,
};
use crate::model::uuid::BtUuid;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral, PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager};
use futures::{stream, StreamExt};
use log::{debug, info, trace};
use std::collections::HashMap;

/// Converts the properties of a scanned peripheral into an advertisement.
pub fn advertisement_from(address: BDAddr, properties: PeripheralProperties) -> Advertisement {
    Advertisement {
        address,
        local_name: properties.local_name,
        services: properties.services.into_iter().map(BtUuid::from).collect(),
        manufacturer_data: properties.manufacturer_data,
        rssi: properties.rssi,
    }
}

fn discovered(characteristic: &Characteristic) -> DiscoveredCharacteristic {
    DiscoveredCharacteristic {
        uuid: characteristic.uuid.into(),
        can_read: characteristic.properties.contains(CharPropFlags::READ),
        can_notify: characteristic.properties.contains(CharPropFlags::NOTIFY),
        can_indicate: characteristic.properties.contains(CharPropFlags::INDICATE),
        descriptors: Vec::new(),
    }
}

/// A btleplug central used as `BleAdapter`.
#[derive(Clone, Debug)]
pub struct BtleplugAdapter<C: Central = Adapter> {
    central: C,
}

impl BtleplugAdapter<Adapter> {
    /// Opens the first adapter the platform reports.
    pub async fn first() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(anyhow!("no bluetooth adapter found"))?;
        info!("using adapter {}", adapter.adapter_info().await?);
        Ok(Self::new(adapter))
    }
}

impl<C: Central> BtleplugAdapter<C> {
    pub fn new(central: C) -> Self {
        Self { central }
    }
}

#[async_trait]
impl<C: Central + 'static> BleAdapter for BtleplugAdapter<C> {
    type Link = BtleplugLink<C>;

    async fn is_enabled(&self) -> Result<bool> {
        let state = self.central.adapter_state().await?;
        Ok(!matches!(state, CentralState::PoweredOff))
    }

    /// Platforms without a runtime permission model grant access implicitly; the stack reports
    /// a denial as a scan failure instead.
    async fn has_permissions(&self) -> Result<bool> {
        Ok(true)
    }

    async fn start_scan(&self, services: &[BtUuid]) -> Result<ScanStream> {
        let events = self.central.events().await?;
        self.central
            .start_scan(ScanFilter {
                services: services.iter().map(BtUuid::as_uuid).collect(),
            })
            .await?;
        let central = self.central.clone();
        Ok(Box::pin(events.filter_map(move |event| {
            let central = central.clone();
            async move {
                let id = match event {
                    CentralEvent::StateUpdate(state) => {
                        return Some(ScanEvent::AdapterStateChanged {
                            enabled: !matches!(state, CentralState::PoweredOff),
                        })
                    }
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ServicesAdvertisement { id, .. }
                    | CentralEvent::ManufacturerDataAdvertisement { id, .. } => id,
                    _ => return None,
                };
                let peripheral = central.peripheral(&id).await.ok()?;
                let properties = peripheral.properties().await.ok()??;
                Some(ScanEvent::Advertisement(advertisement_from(
                    peripheral.address(),
                    properties,
                )))
            }
        })))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.central.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, address: BDAddr) -> Result<BtleplugLink<C>> {
        let peripheral = self
            .central
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address() == address)
            .ok_or(anyhow!("peripheral {} not found", address))?;
        peripheral.connect().await?;
        debug!("connected to {}", address);
        Ok(BtleplugLink {
            central: self.central.clone(),
            peripheral,
        })
    }
}

/// An established btleplug connection.
pub struct BtleplugLink<C: Central> {
    central: C,
    peripheral: C::Peripheral,
}

impl<C: Central> BtleplugLink<C> {
    fn characteristic(&self, service: BtUuid, characteristic: BtUuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service.as_uuid() && c.uuid == characteristic.as_uuid())
            .ok_or(anyhow!("no characteristic {} in service {}", characteristic, service))
    }

    /// Service of every characteristic, used to attribute notifications.
    fn service_map(&self) -> HashMap<BtUuid, BtUuid> {
        self.peripheral
            .characteristics()
            .into_iter()
            .map(|c| (c.uuid.into(), c.service_uuid.into()))
            .collect()
    }
}

#[async_trait]
impl<C: Central + 'static> GattLink for BtleplugLink<C> {
    async fn discover_services(&self) -> Result<Vec<DiscoveredService>> {
        self.peripheral.discover_services().await?;
        Ok(self
            .peripheral
            .services()
            .iter()
            .map(|s| DiscoveredService {
                uuid: s.uuid.into(),
                characteristics: s.characteristics.iter().map(discovered).collect(),
            })
            .collect())
    }

    /// btleplug discovers descriptors together with the services.
    async fn discover_descriptors(
        &self,
        service: BtUuid,
        characteristic: BtUuid,
    ) -> Result<Vec<BtUuid>> {
        Ok(self
            .characteristic(service, characteristic)?
            .descriptors
            .iter()
            .map(|d| d.uuid.into())
            .collect())
    }

    async fn read(&self, service: BtUuid, characteristic: BtUuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(service, characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn subscribe(&self, service: BtUuid, characteristic: BtUuid) -> Result<()> {
        let characteristic = self.characteristic(service, characteristic)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn events(&self) -> Result<LinkEventStream> {
        let services = self.service_map();
        let values = self
            .peripheral
            .notifications()
            .await?
            .filter_map(move |notification| {
                let characteristic = BtUuid::from(notification.uuid);
                let value = services
                    .get(&characteristic)
                    .map(|service| CharacteristicValue {
                        service: *service,
                        characteristic,
                        value: notification.value,
                    });
                if value.is_none() {
                    trace!("notification of unknown {}", characteristic);
                }
                futures::future::ready(value.map(LinkEvent::ValueChanged))
            })
            .chain(stream::once(futures::future::ready(
                LinkEvent::Disconnected {
                    reason: Some("notification stream ended".to_string()),
                },
            )));

        let id = self.peripheral.id();
        let disconnects = self
            .central
            .events()
            .await?
            .filter_map(move |event| {
                futures::future::ready(match event {
                    CentralEvent::DeviceDisconnected(lost) if lost == id => {
                        Some(LinkEvent::Disconnected { reason: None })
                    }
                    _ => None,
                })
            });
        Ok(Box::pin(stream::select(values, disconnects)))
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{
        WEIGHT_MEASUREMENT_UUID, WEIGHT_SCALE_FEATURE_UUID, WEIGHT_SCALE_SERVICE_UUID,
    };
    use btleplug::api::{Descriptor, Service, ValueNotification, WriteType};
    use btleplug::platform::PeripheralId;
    use futures::stream::Stream;
    use mockall::mock;
    use std::collections::BTreeSet;
    use std::pin::Pin;

    mock! {
        Peripheral{}

        impl Clone for Peripheral {
            fn clone(&self) -> Self;
        }

        impl std::fmt::Debug for Peripheral {
            fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
        }

        #[async_trait]
        impl Peripheral for Peripheral {
            fn id(&self) -> PeripheralId;
            fn address(&self) -> BDAddr;
            async fn properties(&self) -> btleplug::Result<Option<PeripheralProperties>>;
            fn services(&self) -> BTreeSet<Service>;
            fn characteristics(&self) -> BTreeSet<Characteristic> {
                self.services()
                    .iter()
                    .flat_map(|service| service.characteristics.clone().into_iter())
                    .collect()
            }
            async fn is_connected(&self) -> btleplug::Result<bool>;
            async fn connect(&self) -> btleplug::Result<()>;
            async fn disconnect(&self) -> btleplug::Result<()>;
            async fn discover_services(&self) -> btleplug::Result<()>;
            async fn write(
                &self,
                characteristic: &Characteristic,
                data: &[u8],
                write_type: WriteType,
            ) -> btleplug::Result<()>;
            async fn read(&self, characteristic: &Characteristic) -> btleplug::Result<Vec<u8>>;
            async fn subscribe(&self, characteristic: &Characteristic) -> btleplug::Result<()>;
            async fn unsubscribe(&self, characteristic: &Characteristic) -> btleplug::Result<()>;
            async fn notifications(&self) -> btleplug::Result<Pin<Box<dyn Stream<Item = ValueNotification> + Send>>>;
            async fn write_descriptor(&self, descriptor: &Descriptor, data: &[u8]) -> btleplug::Result<()>;
            async fn read_descriptor(&self, descriptor: &Descriptor) -> btleplug::Result<Vec<u8>>;
        }
    }

    mock! {
        Central{}
        impl Clone for Central {
            fn clone(&self) -> Self;
        }

        impl std::fmt::Debug for Central {
            fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
        }

        #[async_trait]
        impl Central for Central {
            type Peripheral = MockPeripheral;

            async fn events(&self) -> btleplug::Result<Pin<Box<dyn Stream<Item = CentralEvent> + Send>>>;

            async fn start_scan(&self, filter: ScanFilter) -> btleplug::Result<()>;

            async fn stop_scan(&self) -> btleplug::Result<()>;

            async fn peripherals(&self) -> btleplug::Result<Vec<MockPeripheral>>;

            async fn peripheral(&self, id: &PeripheralId) -> btleplug::Result<MockPeripheral>;

            async fn add_peripheral(&self, address: &PeripheralId) -> btleplug::Result<MockPeripheral>;

            async fn adapter_info(&self) -> btleplug::Result<String>;

            async fn adapter_state(&self) -> btleplug::Result<CentralState>;
        }
    }

    fn scale_address() -> BDAddr {
        BDAddr::from([0x5C, 0xA1, 0xE0, 0x00, 0x00, 0x01])
    }

    fn weight_service() -> Service {
        let characteristic = |uuid: BtUuid, properties| Characteristic {
            uuid: uuid.as_uuid(),
            service_uuid: WEIGHT_SCALE_SERVICE_UUID.as_uuid(),
            properties,
            descriptors: BTreeSet::new(),
        };
        Service {
            uuid: WEIGHT_SCALE_SERVICE_UUID.as_uuid(),
            primary: true,
            characteristics: BTreeSet::from([
                characteristic(WEIGHT_SCALE_FEATURE_UUID, CharPropFlags::READ),
                characteristic(WEIGHT_MEASUREMENT_UUID, CharPropFlags::INDICATE),
            ]),
        }
    }

    fn scale_peripheral() -> MockPeripheral {
        let mut peripheral = MockPeripheral::new();
        peripheral.expect_address().returning(scale_address);
        peripheral.expect_services().returning(|| BTreeSet::from([weight_service()]));
        peripheral
            .expect_characteristics()
            .returning(|| weight_service().characteristics);
        peripheral
    }

    #[tokio::test]
    async fn test_is_enabled_follows_adapter_state() {
        for (state, enabled) in [
            (CentralState::PoweredOn, true),
            (CentralState::PoweredOff, false),
            (CentralState::Unknown, true),
        ] {
            let mut central = MockCentral::new();
            central
                .expect_adapter_state()
                .returning(move || Ok(state.clone()));
            let adapter = BtleplugAdapter::new(central);
            assert_eq!(adapter.is_enabled().await.unwrap(), enabled);
        }
    }

    #[test]
    fn test_advertisement_from_properties() {
        let properties = PeripheralProperties {
            local_name: Some("Scale".to_string()),
            services: vec![WEIGHT_SCALE_SERVICE_UUID.as_uuid()],
            manufacturer_data: HashMap::from([(0x0157, vec![1, 2])]),
            rssi: Some(-71),
            ..PeripheralProperties::default()
        };
        let advertisement = advertisement_from(scale_address(), properties);
        assert_eq!(advertisement.address, scale_address());
        assert_eq!(advertisement.local_name.as_deref(), Some("Scale"));
        assert_eq!(advertisement.services, vec![WEIGHT_SCALE_SERVICE_UUID]);
        assert_eq!(advertisement.manufacturer_data[&0x0157], vec![1, 2]);
        assert_eq!(advertisement.rssi, Some(-71));
    }

    #[tokio::test]
    async fn test_connect_finds_peripheral_by_address() {
        let mut central = MockCentral::new();
        central.expect_peripherals().returning(|| {
            let mut other = MockPeripheral::new();
            other
                .expect_address()
                .returning(|| BDAddr::from([1, 1, 1, 1, 1, 1]));
            let mut scale = scale_peripheral();
            scale.expect_connect().returning(|| Ok(()));
            Ok(vec![other, scale])
        });
        central.expect_clone().returning(MockCentral::new);
        let adapter = BtleplugAdapter::new(central);

        let link = adapter.connect(scale_address()).await.unwrap();
        assert!(link
            .characteristic(WEIGHT_SCALE_SERVICE_UUID, WEIGHT_MEASUREMENT_UUID)
            .is_ok());
        assert!(adapter
            .connect(BDAddr::from([9, 9, 9, 9, 9, 9]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_link_resolves_characteristics_by_service() {
        let mut peripheral = scale_peripheral();
        peripheral.expect_discover_services().returning(|| Ok(()));
        peripheral
            .expect_read()
            .withf(|c| c.uuid == WEIGHT_SCALE_FEATURE_UUID.as_uuid())
            .returning(|_| Ok(vec![0x07, 0x00, 0x00, 0x00]));
        peripheral
            .expect_subscribe()
            .withf(|c| c.uuid == WEIGHT_MEASUREMENT_UUID.as_uuid())
            .times(1)
            .returning(|_| Ok(()));
        let link = BtleplugLink {
            central: MockCentral::new(),
            peripheral,
        };

        let services = link.discover_services().await.unwrap();
        let measurement = services[0].characteristic(&WEIGHT_MEASUREMENT_UUID).unwrap();
        assert!(measurement.can_indicate && !measurement.can_read);
        assert_eq!(
            link.read(WEIGHT_SCALE_SERVICE_UUID, WEIGHT_SCALE_FEATURE_UUID)
                .await
                .unwrap(),
            vec![0x07, 0x00, 0x00, 0x00]
        );
        link.subscribe(WEIGHT_SCALE_SERVICE_UUID, WEIGHT_MEASUREMENT_UUID)
            .await
            .unwrap();
        assert!(link
            .read(BtUuid::from_u16(0x1810), WEIGHT_SCALE_FEATURE_UUID)
            .await
            .is_err());
    }
}
