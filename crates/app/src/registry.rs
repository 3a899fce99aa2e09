//! Device registry: the authoritative in-memory set of reachable devices.
//!
//! All mutation goes through the methods below, each of which holds the
//! write lock for the whole read-modify-write, so two concurrent upserts of
//! the same identity can never interleave. Readers receive clones and never
//! observe a half-merged record.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use kasa_bridge_domain::attribute::Attributes;
use kasa_bridge_domain::device::{Device, DeviceDescriptor};
use kasa_bridge_domain::identity::DeviceIdentity;
use kasa_bridge_domain::mapper::device_slug;
use kasa_bridge_domain::time::Timestamp;

/// Result of [`DeviceRegistry::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub enum Upserted {
    /// First sighting of this identity.
    Inserted(Device),
    /// Existing entry refreshed in place.
    Updated(Device),
}

impl Upserted {
    #[must_use]
    pub fn device(&self) -> &Device {
        match self {
            Self::Inserted(device) | Self::Updated(device) => device,
        }
    }

    #[must_use]
    pub fn into_device(self) -> Device {
        match self {
            Self::Inserted(device) | Self::Updated(device) => device,
        }
    }
}

/// In-memory table of devices keyed by identity.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceIdentity, Device>>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<DeviceIdentity, Device>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DeviceIdentity, Device>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new device or merge a sighting into the existing entry.
    ///
    /// Merging updates address, alias, model and routing parent, refreshes
    /// `last_seen` and resets the failure counter.
    pub fn upsert(&self, descriptor: DeviceDescriptor, now: Timestamp) -> Upserted {
        let mut devices = self.write();
        if let Some(existing) = devices.get_mut(&descriptor.identity) {
            existing.observe(descriptor, now);
            return Upserted::Updated(existing.clone());
        }
        let device = Device::from_descriptor(descriptor, now);
        devices.insert(device.identity.clone(), device.clone());
        Upserted::Inserted(device)
    }

    #[must_use]
    pub fn get(&self, identity: &DeviceIdentity) -> Option<Device> {
        self.read().get(identity).cloned()
    }

    /// Point-in-time copy of every device, ordered by identity.
    #[must_use]
    pub fn all(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.read().values().cloned().collect();
        devices.sort_by(|a, b| a.identity.cmp(&b.identity));
        devices
    }

    /// Resolve the device whose topic level is `slug`.
    #[must_use]
    pub fn find_by_slug(&self, slug: &str) -> Option<Device> {
        self.read()
            .values()
            .find(|device| device_slug(&device.alias, &device.identity) == slug)
            .cloned()
    }

    /// Merge freshly fetched attributes and mark the device as healthy.
    ///
    /// Returns `None` when the device has been evicted in the meantime.
    pub fn record_success(
        &self,
        identity: &DeviceIdentity,
        attributes: Attributes,
        now: Timestamp,
    ) -> Option<Device> {
        let mut devices = self.write();
        let device = devices.get_mut(identity)?;
        device.merge_attributes(attributes);
        device.last_seen = now;
        device.consecutive_failures = 0;
        Some(device.clone())
    }

    /// Count one more consecutive failure, returning the new count.
    pub fn record_failure(&self, identity: &DeviceIdentity) -> Option<u32> {
        let mut devices = self.write();
        let device = devices.get_mut(identity)?;
        device.consecutive_failures = device.consecutive_failures.saturating_add(1);
        Some(device.consecutive_failures)
    }

    pub fn evict(&self, identity: &DeviceIdentity) -> Option<Device> {
        self.write().remove(identity)
    }

    /// Evict the device only if it is still failing at least `threshold` times.
    ///
    /// A discovery sighting between the failure and the eviction resets the
    /// counter, in which case the device stays.
    pub fn evict_failing(&self, identity: &DeviceIdentity, threshold: u32) -> Option<Device> {
        let mut devices = self.write();
        if devices
            .get(identity)
            .is_some_and(|device| device.consecutive_failures >= threshold)
        {
            devices.remove(identity)
        } else {
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    use kasa_bridge_domain::attribute::AttributeValue;
    use kasa_bridge_domain::capability::CapabilityClass;
    use kasa_bridge_domain::time::now;

    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    fn plug(id: &str, alias: &str, last: u8) -> DeviceDescriptor {
        DeviceDescriptor::new(
            DeviceIdentity::new(id).unwrap(),
            alias,
            ip(last),
            CapabilityClass::Plug,
        )
    }

    #[test]
    fn should_insert_on_first_sighting() {
        let registry = DeviceRegistry::new();
        let result = registry.upsert(plug("PLUG0001", "Lamp", 10), now());
        assert!(matches!(result, Upserted::Inserted(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn should_update_in_place_when_address_changes() {
        let registry = DeviceRegistry::new();
        registry.upsert(plug("PLUG0001", "Lamp", 10), now());

        let result = registry.upsert(plug("PLUG0001", "Lamp", 23), now());

        assert!(matches!(result, Upserted::Updated(_)));
        assert_eq!(registry.len(), 1);
        let device = registry.get(&DeviceIdentity::new("PLUG0001").unwrap()).unwrap();
        assert_eq!(device.address, ip(23));
    }

    #[test]
    fn should_not_deduplicate_by_alias_or_address() {
        let registry = DeviceRegistry::new();
        registry.upsert(plug("PLUG0001", "Lamp", 10), now());
        registry.upsert(plug("PLUG0002", "Lamp", 10), now());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn should_reset_failures_on_upsert() {
        let registry = DeviceRegistry::new();
        let id = DeviceIdentity::new("PLUG0001").unwrap();
        registry.upsert(plug("PLUG0001", "Lamp", 10), now());
        registry.record_failure(&id);
        registry.record_failure(&id);

        let device = registry.upsert(plug("PLUG0001", "Lamp", 10), now()).into_device();
        assert_eq!(device.consecutive_failures, 0);
    }

    #[test]
    fn should_count_failures_and_reset_on_success() {
        let registry = DeviceRegistry::new();
        let id = DeviceIdentity::new("PLUG0001").unwrap();
        registry.upsert(plug("PLUG0001", "Lamp", 10), now());

        assert_eq!(registry.record_failure(&id), Some(1));
        assert_eq!(registry.record_failure(&id), Some(2));

        let mut attrs = Attributes::new();
        attrs.insert("state".into(), AttributeValue::Bool(true));
        let device = registry.record_success(&id, attrs, now()).unwrap();
        assert_eq!(device.consecutive_failures, 0);
        assert_eq!(device.attribute("state"), Some(&AttributeValue::Bool(true)));
    }

    #[test]
    fn should_return_none_for_unknown_identity() {
        let registry = DeviceRegistry::new();
        let id = DeviceIdentity::new("MISSING1").unwrap();
        assert_eq!(registry.get(&id), None);
        assert_eq!(registry.record_failure(&id), None);
        assert_eq!(registry.record_success(&id, Attributes::new(), now()), None);
        assert_eq!(registry.evict(&id), None);
    }

    #[test]
    fn should_only_evict_failing_device_above_threshold() {
        let registry = DeviceRegistry::new();
        let id = DeviceIdentity::new("PLUG0001").unwrap();
        registry.upsert(plug("PLUG0001", "Lamp", 10), now());
        registry.record_failure(&id);

        assert_eq!(registry.evict_failing(&id, 2), None);
        registry.record_failure(&id);
        assert!(registry.evict_failing(&id, 2).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn should_find_device_by_topic_slug() {
        let registry = DeviceRegistry::new();
        registry.upsert(plug("8006AAAA11112222", "Living Room Lamp", 10), now());

        let found = registry.find_by_slug("living_room_lamp_11112222").unwrap();
        assert_eq!(found.identity.as_str(), "8006AAAA11112222");
        assert!(registry.find_by_slug("living_room_lamp_00000000").is_none());
    }

    #[test]
    fn should_return_snapshot_unaffected_by_later_writes() {
        let registry = DeviceRegistry::new();
        registry.upsert(plug("PLUG0001", "Lamp", 10), now());
        let snapshot = registry.all();

        registry.evict(&DeviceIdentity::new("PLUG0001").unwrap());

        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn should_keep_single_entry_under_concurrent_upserts() {
        let registry = Arc::new(DeviceRegistry::new());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.upsert(plug("PLUG0001", "Lamp", 10 + i), now());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 1);
    }
}
