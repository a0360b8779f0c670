//! Session Model
//!
//! A `DeviceSession` collects the measurements of one connected device in arrival order.
//! The `SessionRegistry` holds the sessions of all connected devices, ordered by the time
//! they first connected.

use btleplug::api::BDAddr;
use time::OffsetDateTime;

use super::measurement::Measurement;

/// Measurements received from one connected device.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSession {
    address: BDAddr,
    name: Option<String>,
    connected_at: OffsetDateTime,
    measurements: Vec<Measurement>,
}

impl DeviceSession {
    pub fn new(address: BDAddr, name: Option<String>) -> Self {
        Self {
            address,
            name,
            connected_at: OffsetDateTime::now_utc(),
            measurements: Vec::new(),
        }
    }

    pub fn get_address(&self) -> BDAddr {
        self.address
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn get_connected_at(&self) -> &OffsetDateTime {
        &self.connected_at
    }

    /// All measurements, oldest first.
    pub fn get_measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn get_last_measurement(&self) -> Option<&Measurement> {
        self.measurements.last()
    }

    pub(crate) fn append(&mut self, measurement: Measurement) {
        self.measurements.push(measurement);
    }
}

/// Sessions of the currently connected devices.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<DeviceSession>,
}

impl SessionRegistry {
    /// Opens a session for a newly connected device.
    ///
    /// # Returns
    /// `false` if a session for the address already exists; it is left untouched.
    pub fn open(&mut self, address: BDAddr, name: Option<String>) -> bool {
        if self.contains(&address) {
            return false;
        }
        self.sessions.push(DeviceSession::new(address, name));
        true
    }

    /// Removes and returns the session of a device.
    pub fn close(&mut self, address: &BDAddr) -> Option<DeviceSession> {
        let index = self.sessions.iter().position(|s| s.address == *address)?;
        Some(self.sessions.remove(index))
    }

    /// Appends a measurement to the session of `address`.
    ///
    /// # Returns
    /// `false` if there is no session for the address.
    pub fn append(&mut self, address: &BDAddr, measurement: Measurement) -> bool {
        match self.sessions.iter_mut().find(|s| s.address == *address) {
            Some(session) => {
                session.append(measurement);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, address: &BDAddr) -> bool {
        self.sessions.iter().any(|s| s.address == *address)
    }

    pub fn get(&self, address: &BDAddr) -> Option<&DeviceSession> {
        self.sessions.iter().find(|s| s.address == *address)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all sessions in first-connection order.
    pub fn snapshot(&self) -> Vec<DeviceSession> {
        self.sessions.clone()
    }

    /// Removes every session, returning them in first-connection order.
    pub fn drain(&mut self) -> Vec<DeviceSession> {
        std::mem::take(&mut self.sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::measurement::{WeightMeasurement, WeightUnit};

    fn addr(last: u8) -> BDAddr {
        BDAddr::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last])
    }

    fn weight(kg: f64) -> Measurement {
        Measurement::Weight(WeightMeasurement {
            weight: kg,
            unit: WeightUnit::Kilograms,
            measured_at: None,
            user_id: None,
            bmi: None,
            height: None,
        })
    }

    #[test]
    fn test_append_keeps_arrival_order() {
        let mut session = DeviceSession::new(addr(1), Some("Scale".to_string()));
        session.append(weight(70.0));
        session.append(weight(69.5));
        session.append(weight(71.0));
        let weights: Vec<f64> = session
            .get_measurements()
            .iter()
            .filter_map(|m| m.as_weight().map(|w| w.weight))
            .collect();
        assert_eq!(weights, vec![70.0, 69.5, 71.0]);
        assert_eq!(session.get_last_measurement(), Some(&weight(71.0)));
        assert_eq!(session.get_name(), Some("Scale"));
    }

    #[test]
    fn test_registry_orders_by_first_connection() {
        let mut registry = SessionRegistry::default();
        assert!(registry.open(addr(2), None));
        assert!(registry.open(addr(1), None));
        assert!(!registry.open(addr(2), None));
        let order: Vec<BDAddr> = registry.snapshot().iter().map(|s| s.get_address()).collect();
        assert_eq!(order, vec![addr(2), addr(1)]);
    }

    #[test]
    fn test_registry_isolates_sessions() {
        let mut registry = SessionRegistry::default();
        registry.open(addr(1), None);
        registry.open(addr(2), None);
        assert!(registry.append(&addr(1), weight(80.0)));
        assert_eq!(registry.get(&addr(1)).unwrap().get_measurements().len(), 1);
        assert!(registry.get(&addr(2)).unwrap().get_measurements().is_empty());
        assert!(!registry.append(&addr(3), weight(80.0)));
    }

    #[test]
    fn test_close_returns_history() {
        let mut registry = SessionRegistry::default();
        registry.open(addr(1), None);
        registry.append(&addr(1), weight(80.0));
        let closed = registry.close(&addr(1)).unwrap();
        assert_eq!(closed.get_measurements(), &[weight(80.0)]);
        assert!(registry.is_empty());
        assert!(registry.close(&addr(1)).is_none());
    }

    #[test]
    fn test_drain() {
        let mut registry = SessionRegistry::default();
        registry.open(addr(1), None);
        registry.open(addr(2), None);
        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.len(), 0);
    }
}
