//! Service API
//!
//! The interface the application uses to drive the BLE service and observe it.
use crate::core::error::ServiceError;
use crate::core::events::BleServiceEvent;
use crate::model::discovery::DiscoveryCriteria;
use crate::model::state::BleServiceState;
use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

/// BleServiceApi trait
///
/// Starting and stopping the scan, plus the observable state and event stream.
#[async_trait]
pub trait BleServiceApi: Send + Sync {
    /// Starts scanning for devices matching `criteria`.
    ///
    /// Missing preconditions are reported through the state (`BluetoothNotEnabled`,
    /// `MissingPermissions`, `Error`), not as an error.
    ///
    /// # Errors
    /// `ServiceError::AlreadyScanning` if a scan run is active.
    async fn start(&self, criteria: DiscoveryCriteria) -> Result<(), ServiceError>;

    /// Stops scanning, disconnects every device and returns to `Idle`.
    async fn stop(&self);

    /// Subscribes to the published state. The receiver always holds the latest state.
    fn state(&self) -> watch::Receiver<BleServiceState>;

    /// Subscribes to the event stream. Receivers that fall behind lose the oldest events.
    fn events(&self) -> broadcast::Receiver<BleServiceEvent>;

    fn current_state(&self) -> BleServiceState;
}
