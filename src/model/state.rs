//! Service State
//!
//! The single externally observable state of the BLE service.

use super::session::DeviceSession;
use btleplug::api::BDAddr;
use std::fmt;

/// Top-level state published to observers. Exactly one is active at a time.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum BleServiceState {
    /// No scan active.
    #[default]
    Idle,
    /// Scanning; holds the sessions of all connected devices in first-connection order.
    Scanning(Vec<DeviceSession>),
    BluetoothNotEnabled,
    MissingPermissions,
    /// Unrecoverable fault, terminal until the service is started again.
    Error(String),
}

impl BleServiceState {
    pub fn is_scanning(&self) -> bool {
        matches!(self, BleServiceState::Scanning(_))
    }

    /// Connected sessions; empty outside of `Scanning`.
    pub fn get_sessions(&self) -> &[DeviceSession] {
        match self {
            BleServiceState::Scanning(sessions) => sessions,
            _ => &[],
        }
    }

    pub fn get_session(&self, address: &BDAddr) -> Option<&DeviceSession> {
        self.get_sessions()
            .iter()
            .find(|s| s.get_address() == *address)
    }
}

impl fmt::Display for BleServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleServiceState::Idle => write!(f, "idle"),
            BleServiceState::Scanning(sessions) => {
                write!(f, "scanning ({} connected)", sessions.len())
            }
            BleServiceState::BluetoothNotEnabled => write!(f, "bluetooth not enabled"),
            BleServiceState::MissingPermissions => write!(f, "missing permissions"),
            BleServiceState::Error(cause) => write!(f, "error: {}", cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_only_while_scanning() {
        let addr = BDAddr::from([1, 2, 3, 4, 5, 6]);
        let scanning = BleServiceState::Scanning(vec![DeviceSession::new(addr, None)]);
        assert!(scanning.is_scanning());
        assert_eq!(scanning.get_sessions().len(), 1);
        assert!(scanning.get_session(&addr).is_some());
        assert!(BleServiceState::Idle.get_sessions().is_empty());
        assert!(BleServiceState::Error("x".into()).get_session(&addr).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(BleServiceState::default().to_string(), "idle");
        assert_eq!(BleServiceState::Scanning(vec![]).to_string(), "scanning (0 connected)");
        assert_eq!(
            BleServiceState::Error("adapter gone".into()).to_string(),
            "error: adapter gone"
        );
    }
}
