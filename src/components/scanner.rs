//! Scan Loop
//!
//! Supervises one scan run. It matches advertisements against the discovery criteria, spawns a
//! `PeripheralConnection` per matched device, owns the session registry and is the only writer
//! of the published state while the run is active.
use crate::api::platform::{Advertisement, BleAdapter, ScanEvent, ScanStream};
use crate::components::connection::{GenerationGuard, LinkMessage, PeripheralConnection};
use crate::core::events::BleServiceEvent;
use crate::decoder::mapper::MeasurementMapper;
use crate::model::discovery::{DeviceCatalog, DeviceDescription, DiscoveryCriteria};
use crate::model::session::SessionRegistry;
use crate::model::state::BleServiceState;
use btleplug::api::BDAddr;
use futures::StreamExt;
use log::{debug, error, info, trace, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Everything a scan run shares with the service that started it.
pub(crate) struct ServiceContext<A: BleAdapter> {
    pub adapter: Arc<A>,
    pub mapper: Arc<MeasurementMapper>,
    pub catalog: Arc<DeviceCatalog>,
    pub state: Arc<watch::Sender<BleServiceState>>,
    pub events: broadcast::Sender<BleServiceEvent>,
}

impl<A: BleAdapter> Clone for ServiceContext<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            mapper: self.mapper.clone(),
            catalog: self.catalog.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
        }
    }
}

impl<A: BleAdapter> ServiceContext<A> {
    pub fn publish(&self, state: BleServiceState) {
        debug!("state: {}", state);
        self.state.send_replace(state);
    }

    pub fn emit(&self, event: BleServiceEvent) {
        trace!("event: {}", event);
        if self.events.send(event).is_err() {
            trace!("no event subscribers");
        }
    }
}

pub(crate) struct ScanLoop<A: BleAdapter> {
    context: ServiceContext<A>,
    criteria: DiscoveryCriteria,
    token: CancellationToken,
    guard: GenerationGuard,
    registry: SessionRegistry,
    names: HashMap<BDAddr, Option<String>>,
    connecting: HashSet<BDAddr>,
    /// Devices whose connection attempt failed during this run. They are not attempted again
    /// until the next `start`.
    failed: HashSet<BDAddr>,
    tasks: JoinSet<BDAddr>,
    link_tx: UnboundedSender<LinkMessage>,
    link_rx: UnboundedReceiver<LinkMessage>,
}

impl<A: BleAdapter> ScanLoop<A> {
    pub fn new(
        context: ServiceContext<A>,
        criteria: DiscoveryCriteria,
        token: CancellationToken,
        guard: GenerationGuard,
    ) -> Self {
        let (link_tx, link_rx) = unbounded_channel();
        Self {
            context,
            criteria,
            token,
            guard,
            registry: SessionRegistry::default(),
            names: HashMap::new(),
            connecting: HashSet::new(),
            failed: HashSet::new(),
            tasks: JoinSet::new(),
            link_tx,
            link_rx,
        }
    }

    /// Runs until the run is cancelled or the scan fails.
    pub async fn run(mut self, mut scan: ScanStream) {
        let fault = loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break None,
                Some(message) = self.link_rx.recv() => self.on_link_message(message),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.on_joined(joined)
                }
                event = scan.next() => match event {
                    Some(ScanEvent::Advertisement(advertisement)) => {
                        self.on_advertisement(advertisement)
                    }
                    Some(ScanEvent::AdapterStateChanged { enabled: false }) => {
                        break Some("bluetooth adapter powered off".to_string())
                    }
                    Some(ScanEvent::AdapterStateChanged { enabled: true }) => {
                        debug!("adapter powered on")
                    }
                    None => break Some("advertisement stream ended".to_string()),
                },
            }
        };
        self.teardown(fault).await;
    }

    fn on_advertisement(&mut self, advertisement: Advertisement) {
        let address = advertisement.address;
        if !self.criteria.matches(&advertisement) {
            trace!("ignoring advertisement of {}", address);
            return;
        }
        if self.registry.contains(&address) || self.connecting.contains(&address) {
            return;
        }
        if self.failed.contains(&address) {
            trace!("{} failed to connect earlier in this run, ignoring", address);
            return;
        }
        let description = self
            .context
            .catalog
            .describe(&advertisement)
            .cloned()
            .unwrap_or_else(|| DeviceDescription::unlisted(self.criteria.clone()));
        info!(
            "discovered {} ({}), connecting",
            address, description.name
        );

        self.connecting.insert(address);
        self.names
            .insert(address, advertisement.local_name.clone());
        self.context.emit(BleServiceEvent::DeviceDiscovered {
            address,
            name: advertisement.local_name,
        });

        let connection = PeripheralConnection::new(
            self.context.adapter.clone(),
            address,
            description,
            self.token.child_token(),
            self.guard.clone(),
            self.link_tx.clone(),
        );
        self.tasks.spawn(connection.run());
    }

    fn on_link_message(&mut self, message: LinkMessage) {
        match message {
            LinkMessage::Connected { address } => {
                let name = self.names.remove(&address).flatten();
                if self.registry.open(address, name) {
                    self.publish_sessions();
                }
                self.context
                    .emit(BleServiceEvent::DeviceConnected { address });
            }
            LinkMessage::ServicesDiscovered { address, services } => {
                self.context
                    .emit(BleServiceEvent::ServicesDiscovered { address, services });
            }
            LinkMessage::Value { address, value } => {
                let measurement =
                    self.context
                        .mapper
                        .map(&value.service, &value.characteristic, &value.value);
                self.context
                    .emit(BleServiceEvent::CharacteristicChanged { address, value });
                let Some(measurement) = measurement else {
                    return;
                };
                if self.registry.append(&address, measurement.clone()) {
                    self.publish_sessions();
                    self.context.emit(BleServiceEvent::MeasurementDecoded {
                        address,
                        measurement,
                    });
                } else {
                    warn!("measurement from {} without session dropped", address);
                }
            }
            LinkMessage::Bonded { address, bonded } => {
                self.context.emit(if bonded {
                    BleServiceEvent::DevicePaired { address }
                } else {
                    BleServiceEvent::DeviceUnpaired { address }
                });
            }
            LinkMessage::Disconnected { address, reason } => {
                self.names.remove(&address);
                self.context
                    .emit(BleServiceEvent::DeviceDisconnected { address, reason });
                match self.registry.close(&address) {
                    Some(session) => {
                        self.publish_sessions();
                        self.context.emit(BleServiceEvent::SessionClosed(session));
                    }
                    None => {
                        debug!("{} never connected, not retrying in this run", address);
                        self.failed.insert(address);
                    }
                }
            }
        }
    }

    fn on_joined(&mut self, joined: Result<BDAddr, JoinError>) {
        match joined {
            Ok(address) => {
                self.connecting.remove(&address);
                trace!("connection task of {} finished", address);
            }
            Err(e) => error!("connection task failed: {}", e),
        }
    }

    fn publish_sessions(&self) {
        self.context
            .publish(BleServiceState::Scanning(self.registry.snapshot()));
    }

    /// Tears down every connection and stops the scan. A fault ends the run in `Error`.
    async fn teardown(mut self, fault: Option<String>) {
        self.token.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            self.on_joined(joined);
        }
        while let Ok(message) = self.link_rx.try_recv() {
            trace!("discarding {:?} after teardown", message);
        }

        let reason = fault
            .clone()
            .unwrap_or_else(|| "scan stopped".to_string());
        for session in self.registry.drain() {
            self.context.emit(BleServiceEvent::DeviceDisconnected {
                address: session.get_address(),
                reason: Some(reason.clone()),
            });
            self.context.emit(BleServiceEvent::SessionClosed(session));
        }

        if let Err(e) = self.context.adapter.stop_scan().await {
            warn!("failed to stop scan: {:#}", e);
        }

        match fault {
            Some(cause) => {
                error!("scan run failed: {}", cause);
                self.context.publish(BleServiceState::Error(cause.clone()));
                self.context.emit(BleServiceEvent::Error { cause });
            }
            None => info!("scan run stopped"),
        }
    }
}
