// ── Device registry ──
//
// The host system owns device persistence; the connector only needs to
// look devices up, upsert what discovery finds, and record connection
// state. `MemoryRegistry` is the in-process implementation used by the
// daemon and the tests.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use viera_api::DeviceDescriptor;

use crate::model::{ConnectionState, DeviceId};

/// What the registry knows about one television.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub descriptor: DeviceDescriptor,
    pub state: ConnectionState,
}

/// External collaborator mapping device identifiers to connection
/// parameters and state.
pub trait DeviceRegistry: Send + Sync {
    fn device(&self, id: &DeviceId) -> Option<DeviceRecord>;

    /// Insert or refresh a device, keeping its connection state.
    /// Returns `true` if the device was new.
    fn upsert(&self, descriptor: DeviceDescriptor) -> bool;

    /// Record a state. Returns the previous state, or `None` if the device
    /// is unknown (in which case nothing is recorded).
    fn set_state(&self, id: &DeviceId, state: ConnectionState) -> Option<ConnectionState>;

    fn state(&self, id: &DeviceId) -> Option<ConnectionState> {
        self.device(id).map(|d| d.state)
    }

    fn devices(&self) -> Vec<DeviceRecord>;
}

/// Lock-free in-memory registry with a `watch` snapshot for observers.
pub struct MemoryRegistry {
    devices: DashMap<DeviceId, DeviceRecord>,
    snapshot: watch::Sender<Arc<Vec<DeviceRecord>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            devices: DashMap::new(),
            snapshot,
        }
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<DeviceRecord>>> {
        self.snapshot.subscribe()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn rebuild_snapshot(&self) {
        let mut values: Vec<DeviceRecord> =
            self.devices.iter().map(|r| r.value().clone()).collect();
        values.sort_by(|a, b| a.id.cmp(&b.id));
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn device(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.devices.get(id).map(|r| r.value().clone())
    }

    fn upsert(&self, descriptor: DeviceDescriptor) -> bool {
        let id = DeviceId::new(descriptor.identifier.clone());
        let is_new = match self.devices.get_mut(&id) {
            Some(mut record) => {
                record.descriptor = descriptor;
                false
            }
            None => {
                self.devices.insert(
                    id.clone(),
                    DeviceRecord {
                        id,
                        descriptor,
                        state: ConnectionState::Unknown,
                    },
                );
                true
            }
        };
        self.rebuild_snapshot();
        is_new
    }

    fn set_state(&self, id: &DeviceId, state: ConnectionState) -> Option<ConnectionState> {
        let previous = {
            let mut record = self.devices.get_mut(id)?;
            std::mem::replace(&mut record.state, state)
        };
        if previous != state {
            self.rebuild_snapshot();
        }
        Some(previous)
    }

    fn devices(&self) -> Vec<DeviceRecord> {
        self.snapshot.borrow().as_ref().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use viera_api::HdmiInput;

    use super::*;

    pub(crate) fn descriptor(id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            identifier: id.into(),
            ip: [10, 10, 0, 10].into(),
            port: 55000,
            name: "Living room".into(),
            model: "Panasonic VIErA TX-49DX600EA".into(),
            manufacturer: "Panasonic".into(),
            serial: id.into(),
            encrypted: false,
            applications: Vec::new(),
            hdmi: HdmiInput::standard(),
        }
    }

    #[test]
    fn upsert_keeps_connection_state() {
        let registry = MemoryRegistry::new();
        assert!(registry.upsert(descriptor("tv-1")));
        registry.set_state(&"tv-1".into(), ConnectionState::Connected);

        let mut renamed = descriptor("tv-1");
        renamed.name = "Bedroom".into();
        assert!(!registry.upsert(renamed));

        let record = registry.device(&"tv-1".into()).unwrap();
        assert_eq!(record.descriptor.name, "Bedroom");
        assert_eq!(record.state, ConnectionState::Connected);
    }

    #[test]
    fn set_state_on_unknown_device_records_nothing() {
        let registry = MemoryRegistry::new();
        assert_eq!(
            registry.set_state(&"ghost".into(), ConnectionState::Connected),
            None
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_follows_mutations() {
        let registry = MemoryRegistry::new();
        let rx = registry.subscribe();
        registry.upsert(descriptor("b"));
        registry.upsert(descriptor("a"));

        let ids: Vec<String> = rx.borrow().iter().map(|d| d.id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(registry.devices().len(), 2);
        assert_eq!(
            registry.state(&"a".into()),
            Some(ConnectionState::Unknown)
        );
    }
}
