//! BLE Service
//!
//! The orchestrator behind `BleServiceApi`. It checks the adapter preconditions, starts the
//! platform scan and hands it to a `ScanLoop` task, and publishes the service state on a watch
//! channel and the event stream on a broadcast channel.
use crate::api::platform::BleAdapter;
use crate::api::service::BleServiceApi;
use crate::components::connection::GenerationGuard;
use crate::components::scanner::{ScanLoop, ServiceContext};
use crate::config::ServiceConfig;
use crate::core::error::ServiceError;
use crate::core::events::BleServiceEvent;
use crate::decoder::mapper::MeasurementMapper;
use crate::model::discovery::{DeviceCatalog, DiscoveryCriteria};
use crate::model::state::BleServiceState;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// An active scan run.
struct ScanRun {
    token: CancellationToken,
    supervisor: JoinHandle<()>,
}

/// BLE service driving one adapter.
///
/// # Type Parameters
/// - `A`: The platform adapter, btleplug backed or simulated.
pub struct BleService<A: BleAdapter> {
    context: ServiceContext<A>,
    generation: Arc<AtomicU64>,
    run: Mutex<Option<ScanRun>>,
}

impl<A: BleAdapter> Drop for BleService<A> {
    /// Cancels an active scan run. Its connections are released by their own tasks.
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.token.cancel();
        }
    }
}

impl<A: BleAdapter> BleService<A> {
    /// Creates an idle service.
    ///
    /// # Arguments
    /// - `adapter`: Platform adapter to scan and connect with.
    /// - `config`: Decoders, device catalog and event buffer size.
    pub fn new(adapter: A, config: ServiceConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state, _) = watch::channel(BleServiceState::Idle);
        Self {
            context: ServiceContext {
                adapter: Arc::new(adapter),
                mapper: Arc::new(config.mapper()),
                catalog: Arc::new(config.devices),
                state: Arc::new(state),
                events,
            },
            generation: Arc::new(AtomicU64::new(0)),
            run: Mutex::new(None),
        }
    }

    pub fn get_adapter(&self) -> &A {
        &self.context.adapter
    }

    pub fn get_mapper(&self) -> &MeasurementMapper {
        &self.context.mapper
    }

    pub fn get_catalog(&self) -> &DeviceCatalog {
        &self.context.catalog
    }

    fn fail_scan(&self, cause: String) {
        error!("cannot scan: {}", cause);
        self.context.publish(BleServiceState::Error(cause.clone()));
        self.context.emit(BleServiceEvent::ScanFailed { cause });
    }
}

#[async_trait]
impl<A: BleAdapter> BleServiceApi for BleService<A> {
    async fn start(&self, criteria: DiscoveryCriteria) -> Result<(), ServiceError> {
        let mut run = self.run.lock().await;
        // a run tearing itself down after a fault has already cancelled its token
        if run.as_ref().is_some_and(|r| !r.token.is_cancelled()) {
            return Err(ServiceError::AlreadyScanning);
        }
        if let Some(finished) = run.take() {
            if let Err(e) = finished.supervisor.await {
                warn!("previous scan run ended abnormally: {}", e);
            }
        }

        let adapter = &self.context.adapter;
        match adapter.is_enabled().await {
            Ok(true) => {}
            Ok(false) => {
                info!("bluetooth is not enabled");
                self.context.publish(BleServiceState::BluetoothNotEnabled);
                return Ok(());
            }
            Err(e) => {
                self.fail_scan(format!("adapter state unavailable: {:#}", e));
                return Ok(());
            }
        }
        match adapter.has_permissions().await {
            Ok(true) => {}
            Ok(false) => {
                info!("bluetooth permissions missing");
                self.context.publish(BleServiceState::MissingPermissions);
                return Ok(());
            }
            Err(e) => {
                self.fail_scan(format!("permissions unavailable: {:#}", e));
                return Ok(());
            }
        }

        let scan = match adapter.start_scan(criteria.get_service_uuids()).await {
            Ok(scan) => scan,
            Err(e) => {
                self.fail_scan(format!("scan start failed: {:#}", e));
                return Ok(());
            }
        };
        info!(
            "scanning for {} service(s)",
            criteria.get_service_uuids().len()
        );

        let token = CancellationToken::new();
        let guard = GenerationGuard::new(self.generation.clone());
        self.context.publish(BleServiceState::Scanning(Vec::new()));
        let supervisor = tokio::spawn(
            ScanLoop::new(self.context.clone(), criteria, token.clone(), guard).run(scan),
        );
        *run = Some(ScanRun { token, supervisor });
        Ok(())
    }

    async fn stop(&self) {
        let mut run = self.run.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(active) = run.take() {
            active.token.cancel();
            if let Err(e) = active.supervisor.await {
                warn!("scan run ended abnormally: {}", e);
            }
        }
        self.context.publish(BleServiceState::Idle);
    }

    fn state(&self) -> watch::Receiver<BleServiceState> {
        self.context.state.subscribe()
    }

    fn events(&self) -> broadcast::Receiver<BleServiceEvent> {
        self.context.events.subscribe()
    }

    fn current_state(&self) -> BleServiceState {
        self.context.state.borrow().clone()
    }
}
