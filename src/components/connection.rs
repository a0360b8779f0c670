//! Peripheral Connection
//!
//! Drives the lifecycle of one physical link: connect, discover services and descriptors,
//! read and subscribe the described characteristics, then forward link events until the link
//! drops or the scan run is cancelled. Every connection runs in its own task, so the GATT
//! operations of one device are strictly sequential.
use crate::api::platform::{
    BleAdapter, CharacteristicValue, DiscoveredService, GattLink, LinkEvent, LinkEventStream,
};
use crate::model::discovery::DeviceDescription;
use anyhow::Result;
use btleplug::api::BDAddr;
use futures::StreamExt;
use log::{debug, info, trace, warn};
use rust_fsm::*;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

state_machine! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    link_lifecycle(Disconnected)

    Disconnected(Connect) => Connecting,
    Connecting => {
        Established => ServiceDiscovery,
        Dropped => Disconnected
    },
    ServiceDiscovery => {
        ServicesResolved => Subscribed,
        Dropped => Disconnected [Lost]
    },
    Subscribed(Dropped) => Disconnected [Lost]
}

/// Lifecycle state of one peripheral link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    ServiceDiscovery,
    Subscribed,
}

impl From<link_lifecycle::State> for LinkState {
    fn from(state: link_lifecycle::State) -> Self {
        match state {
            link_lifecycle::State::Disconnected => LinkState::Disconnected,
            link_lifecycle::State::Connecting => LinkState::Connecting,
            link_lifecycle::State::ServiceDiscovery => LinkState::ServiceDiscovery,
            link_lifecycle::State::Subscribed => LinkState::Subscribed,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::ServiceDiscovery => "service discovery",
            LinkState::Subscribed => "subscribed",
        };
        write!(f, "{}", name)
    }
}

/// Messages from a connection task to the scan loop.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum LinkMessage {
    Connected {
        address: BDAddr,
    },
    ServicesDiscovered {
        address: BDAddr,
        services: Vec<DiscoveredService>,
    },
    Value {
        address: BDAddr,
        value: CharacteristicValue,
    },
    Bonded {
        address: BDAddr,
        bonded: bool,
    },
    Disconnected {
        address: BDAddr,
        reason: Option<String>,
    },
}

/// Snapshot of the service generation taken when a connection is spawned.
///
/// Every `stop` bumps the counter, which makes all older guards stale.
#[derive(Clone, Debug)]
pub(crate) struct GenerationGuard {
    counter: Arc<AtomicU64>,
    generation: u64,
}

impl GenerationGuard {
    pub fn new(counter: Arc<AtomicU64>) -> Self {
        let generation = counter.load(Ordering::SeqCst);
        Self {
            counter,
            generation,
        }
    }

    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.generation
    }
}

/// How a connection ended.
#[derive(Debug, PartialEq)]
enum Outcome {
    /// The scan run was stopped; nothing is reported.
    Cancelled,
    /// A connection step failed.
    Failed(String),
    /// The remote side or the stack dropped the link.
    Lost(Option<String>),
}

pub(crate) struct PeripheralConnection<A: BleAdapter> {
    adapter: Arc<A>,
    address: BDAddr,
    description: DeviceDescription,
    token: CancellationToken,
    guard: GenerationGuard,
    tx: UnboundedSender<LinkMessage>,
    machine: link_lifecycle::StateMachine,
}

impl<A: BleAdapter> PeripheralConnection<A> {
    /// Creates a connection for a matched peripheral.
    ///
    /// # Arguments
    /// - `description`: Decides which characteristics are read and subscribed.
    /// - `token`: Child token of the scan run.
    /// - `tx`: Channel to the scan loop.
    pub fn new(
        adapter: Arc<A>,
        address: BDAddr,
        description: DeviceDescription,
        token: CancellationToken,
        guard: GenerationGuard,
        tx: UnboundedSender<LinkMessage>,
    ) -> Self {
        Self {
            adapter,
            address,
            description,
            token,
            guard,
            tx,
            machine: link_lifecycle::StateMachine::new(),
        }
    }

    pub fn get_state(&self) -> LinkState {
        (*self.machine.state()).into()
    }

    /// Runs the connection to completion and returns the peripheral address.
    pub async fn run(mut self) -> BDAddr {
        let outcome = self.drive().await;
        if self.get_state() != LinkState::Disconnected {
            self.transition(link_lifecycle::Input::Dropped);
        }
        match outcome {
            Outcome::Cancelled => debug!("connection to {} cancelled", self.address),
            Outcome::Failed(reason) => {
                warn!("connection to {} failed: {}", self.address, reason);
                self.send(LinkMessage::Disconnected {
                    address: self.address,
                    reason: Some(reason),
                });
            }
            Outcome::Lost(reason) => {
                info!("link to {} lost", self.address);
                self.send(LinkMessage::Disconnected {
                    address: self.address,
                    reason,
                });
            }
        }
        self.address
    }

    async fn drive(&mut self) -> Outcome {
        self.transition(link_lifecycle::Input::Connect);
        let connected = tokio::select! {
            biased;
            result = self.adapter.connect(self.address) => result,
            _ = self.token.cancelled() => return Outcome::Cancelled,
        };
        let link = match connected {
            Ok(link) => link,
            Err(e) => return Outcome::Failed(format!("connect failed: {:#}", e)),
        };
        if !self.is_live() {
            debug!("{} connected after stop, releasing link", self.address);
            self.release(&link).await;
            return Outcome::Cancelled;
        }

        self.transition(link_lifecycle::Input::Established);
        self.send(LinkMessage::Connected {
            address: self.address,
        });

        let outcome = match self.establish(&link).await {
            Ok(events) => {
                self.transition(link_lifecycle::Input::ServicesResolved);
                self.listen(events).await
            }
            Err(outcome) => outcome,
        };
        if !matches!(outcome, Outcome::Lost(_)) {
            self.release(&link).await;
        }
        outcome
    }

    /// Discovers services and descriptors, reads and subscribes the described characteristics.
    async fn establish(&self, link: &A::Link) -> Result<LinkEventStream, Outcome> {
        let mut services = self
            .step("service discovery", link.discover_services())
            .await?;
        for service in services.iter_mut() {
            for characteristic in service.characteristics.iter_mut() {
                let wanted = self
                    .description
                    .characteristic(&service.uuid, &characteristic.uuid)
                    .is_some_and(|c| c.discover_descriptors);
                if wanted {
                    characteristic.descriptors = self
                        .step(
                            "descriptor discovery",
                            link.discover_descriptors(service.uuid, characteristic.uuid),
                        )
                        .await?;
                }
            }
        }
        self.send(LinkMessage::ServicesDiscovered {
            address: self.address,
            services: services.clone(),
        });

        // taken before reading so no notification is missed
        let events = self.step("event subscription", link.events()).await?;

        for service in &services {
            for characteristic in &service.characteristics {
                let Some(described) = self
                    .description
                    .characteristic(&service.uuid, &characteristic.uuid)
                else {
                    trace!("{} on {} not described", characteristic.uuid, self.address);
                    continue;
                };
                if described.read_on_connect {
                    if characteristic.can_read {
                        let value = self
                            .step("read", link.read(service.uuid, characteristic.uuid))
                            .await?;
                        self.send(LinkMessage::Value {
                            address: self.address,
                            value: CharacteristicValue {
                                service: service.uuid,
                                characteristic: characteristic.uuid,
                                value,
                            },
                        });
                    } else {
                        warn!(
                            "{} on {} is not readable, skipping read",
                            characteristic.uuid, self.address
                        );
                    }
                }
                if described.subscribe {
                    if characteristic.can_subscribe() {
                        self.step(
                            "subscribe",
                            link.subscribe(service.uuid, characteristic.uuid),
                        )
                        .await?;
                        debug!("subscribed {} on {}", characteristic.uuid, self.address);
                    } else {
                        warn!(
                            "{} on {} supports neither notify nor indicate, skipping",
                            characteristic.uuid, self.address
                        );
                    }
                }
            }
        }
        Ok(events)
    }

    async fn listen(&self, mut events: LinkEventStream) -> Outcome {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Outcome::Cancelled,
                event = events.next() => event,
            };
            match event {
                Some(LinkEvent::ValueChanged(value)) => self.send(LinkMessage::Value {
                    address: self.address,
                    value,
                }),
                Some(LinkEvent::BondStateChanged { bonded }) => self.send(LinkMessage::Bonded {
                    address: self.address,
                    bonded,
                }),
                Some(LinkEvent::Disconnected { reason }) => return Outcome::Lost(reason),
                None => return Outcome::Lost(Some("event stream ended".to_string())),
            }
        }
    }

    /// Runs one GATT step, racing it against cancellation, then checks the generation.
    async fn step<T, F>(&self, what: &str, step: F) -> Result<T, Outcome>
    where
        F: Future<Output = Result<T>>,
    {
        let result = tokio::select! {
            biased;
            result = step => result,
            _ = self.token.cancelled() => return Err(Outcome::Cancelled),
        };
        let value = result.map_err(|e| Outcome::Failed(format!("{} failed: {:#}", what, e)))?;
        if !self.is_live() {
            return Err(Outcome::Cancelled);
        }
        Ok(value)
    }

    fn is_live(&self) -> bool {
        self.guard.is_current() && !self.token.is_cancelled()
    }

    async fn release(&self, link: &A::Link) {
        if let Err(e) = link.disconnect().await {
            warn!("failed to disconnect {}: {:#}", self.address, e);
        }
    }

    fn transition(&mut self, input: link_lifecycle::Input) {
        let from = self.get_state();
        match self.machine.consume(&input) {
            Ok(output) => {
                debug!(
                    "{}: {} -> {} ({:?})",
                    self.address,
                    from,
                    self.get_state(),
                    input
                );
                if output == Some(link_lifecycle::Output::Lost) {
                    trace!("{} left an established link", self.address);
                }
            }
            Err(_) => warn!("{}: no transition from {} on {:?}", self.address, from, input),
        }
    }

    fn send(&self, message: LinkMessage) {
        if self.tx.send(message).is_err() {
            trace!("scan loop gone, dropping message from {}", self.address);
        }
    }
}
