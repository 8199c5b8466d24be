//! Device registry
//!
//! Devices are logical namespaces for file ids, keyed by a stable hardware
//! identifier string. Registration is idempotent per hardware id; devices are
//! never destroyed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tagfs_common::{DeviceId, IdGenerator};

#[derive(Default)]
struct DeviceInner {
    by_id: HashMap<DeviceId, String>,
    by_hw: HashMap<String, DeviceId>,
}

/// Point-in-time copy of the registry, both directions of the mapping
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Device id to hardware id
    pub by_id: HashMap<DeviceId, String>,
    /// Hardware id to device id
    pub by_hw: HashMap<String, DeviceId>,
}

/// Registry of devices keyed by hardware identifier
pub struct DeviceManager {
    inner: RwLock<DeviceInner>,
    id_gen: Arc<IdGenerator>,
}

impl DeviceManager {
    /// Create an empty registry
    #[must_use]
    pub fn new(id_gen: Arc<IdGenerator>) -> Self {
        Self {
            inner: RwLock::new(DeviceInner::default()),
            id_gen,
        }
    }

    /// Register a hardware id, returning its device id
    ///
    /// Returns `(id, true)` when a new device was minted and `(id, false)`
    /// when the hardware id was already registered.
    pub fn register(&self, hw_id: &str) -> (DeviceId, bool) {
        let mut inner = self.inner.write();

        if let Some(&device_id) = inner.by_hw.get(hw_id) {
            return (device_id, false);
        }

        let device_id = self.id_gen.next_device();
        inner.by_id.insert(device_id, hw_id.to_string());
        inner.by_hw.insert(hw_id.to_string(), device_id);
        (device_id, true)
    }

    /// List all registered device ids in ascending order
    #[must_use]
    pub fn list(&self) -> Vec<DeviceId> {
        let inner = self.inner.read();
        let mut result: Vec<DeviceId> = inner.by_id.keys().copied().collect();
        result.sort_unstable();
        result
    }

    /// Check whether a device id is registered
    #[must_use]
    pub fn exists(&self, device_id: DeviceId) -> bool {
        self.inner.read().by_id.contains_key(&device_id)
    }

    /// Capture the full registry state
    #[must_use]
    pub fn snapshot(&self) -> DeviceSnapshot {
        let inner = self.inner.read();
        DeviceSnapshot {
            by_id: inner.by_id.clone(),
            by_hw: inner.by_hw.clone(),
        }
    }

    /// Replace the registry state from a snapshot
    pub fn restore(&self, snap: DeviceSnapshot) {
        let mut inner = self.inner.write();
        inner.by_id = snap.by_id;
        inner.by_hw = snap.by_hw;
    }
}
