//! # kasa-bridge-adapter-virtual
//!
//! Simulated device network implementing the `DeviceProtocol` port, for
//! demos and end-to-end tests without hardware.
//!
//! ## Demo network
//!
//! | Device | Identity suffix | Address | Class |
//! |--------|-----------------|---------|-------|
//! | Living Room Lamp | `A1B2C3D4` | `192.0.2.10` | plug |
//! | Desk Bulb | `B2C3D4E5` | `192.0.2.11` | bulb |
//! | Heating Hub | `C3D4E5F6` | `192.0.2.20` | hub |
//! | Bedroom Radiator | `D7E8F9A0` | via hub | thermostatic valve |
//! | Office Radiator | `E8F9A0B1` | via hub | thermostatic valve |
//!
//! Reachability and addresses can be changed at runtime with
//! [`VirtualProtocol::set_reachable`] and [`VirtualProtocol::move_device`],
//! which is how tests simulate outages and DHCP renewals.
//!
//! ## Dependency rule
//!
//! Depends on `kasa-bridge-app` (port traits) and `kasa-bridge-domain` only.

mod devices;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kasa_bridge_app::ports::{DeviceProtocol, ProbeTarget};
use kasa_bridge_domain::attribute::Attributes;
use kasa_bridge_domain::device::DeviceDescriptor;
use kasa_bridge_domain::error::{DeviceError, ValidationError};
use kasa_bridge_domain::identity::DeviceIdentity;

pub use devices::{VirtualBulb, VirtualDevice, VirtualHub, VirtualPlug, VirtualValve};

/// How traffic reaches a device.
#[derive(Debug, Clone)]
enum Route {
    Direct(IpAddr),
    Via(DeviceIdentity),
}

#[derive(Debug, Clone)]
struct Placement {
    route: Route,
    reachable: bool,
}

/// In-memory device network.
pub struct VirtualProtocol {
    devices: HashMap<DeviceIdentity, VirtualDevice>,
    /// Insertion order of top-level devices, so discovery answers are stable.
    roots: Vec<DeviceIdentity>,
    placements: Mutex<HashMap<DeviceIdentity, Placement>>,
}

impl Default for VirtualProtocol {
    fn default() -> Self {
        Self::new()
    }
}

fn demo_address(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 0, 2, last))
}

impl VirtualProtocol {
    /// An empty network.
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
            roots: Vec::new(),
            placements: Mutex::new(HashMap::new()),
        }
    }

    /// The five-device demo network described in the crate docs.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if one of the built-in identities is
    /// rejected by the domain model.
    pub fn demo() -> Result<Self, ValidationError> {
        let mut network = Self::new();
        network.add(
            VirtualDevice::Plug(VirtualPlug::new(
                DeviceIdentity::new("8006F1E2A1B2C3D4")?,
                "Living Room Lamp",
            )),
            demo_address(10),
        );
        network.add(
            VirtualDevice::Bulb(VirtualBulb::new(
                DeviceIdentity::new("8012F1E2B2C3D4E5")?,
                "Desk Bulb",
            )),
            demo_address(11),
        );
        network.add_hub(
            VirtualHub::new(DeviceIdentity::new("80A1F1E2C3D4E5F6")?, "Heating Hub"),
            demo_address(20),
            vec![
                VirtualValve::new(
                    DeviceIdentity::new("80A1C3D4E5F6D7E8F9A0")?,
                    "Bedroom Radiator",
                    17.0,
                ),
                VirtualValve::new(
                    DeviceIdentity::new("80A1C3D4E5F6E8F9A0B1")?,
                    "Office Radiator",
                    19.5,
                ),
            ],
        );
        Ok(network)
    }

    /// Add a device answering on its own address.
    pub fn add(&mut self, device: VirtualDevice, address: IpAddr) {
        let identity = device.identity().clone();
        self.place(identity.clone(), Route::Direct(address));
        self.roots.retain(|root| root != &identity);
        self.roots.push(identity.clone());
        self.devices.insert(identity, device);
    }

    /// Add a hub together with the valves reached through it.
    pub fn add_hub(&mut self, hub: VirtualHub, address: IpAddr, valves: Vec<VirtualValve>) {
        let hub_identity = hub.identity.clone();
        self.add(VirtualDevice::Hub(hub), address);
        for valve in valves {
            let identity = valve.identity.clone();
            self.place(identity.clone(), Route::Via(hub_identity.clone()));
            self.devices.insert(identity, VirtualDevice::Valve(valve));
        }
    }

    fn place(&mut self, identity: DeviceIdentity, route: Route) {
        self.placements
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                identity,
                Placement {
                    route,
                    reachable: true,
                },
            );
    }

    fn placements(&self) -> MutexGuard<'_, HashMap<DeviceIdentity, Placement>> {
        self.placements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Make a device stop (or resume) answering.
    ///
    /// Taking a hub offline takes its children with it. Returns `false` for
    /// an unknown identity.
    pub fn set_reachable(&self, identity: &DeviceIdentity, reachable: bool) -> bool {
        let mut placements = self.placements();
        let Some(placement) = placements.get_mut(identity) else {
            return false;
        };
        placement.reachable = reachable;
        tracing::debug!(%identity, reachable, "virtual device reachability changed");
        true
    }

    /// Move a top-level device to another address.
    ///
    /// Returns `false` for an unknown identity or a device reached through a
    /// hub, which has no address of its own.
    pub fn move_device(&self, identity: &DeviceIdentity, address: IpAddr) -> bool {
        let mut placements = self.placements();
        match placements.get_mut(identity) {
            Some(Placement {
                route: route @ Route::Direct(_),
                ..
            }) => {
                *route = Route::Direct(address);
                tracing::debug!(%identity, %address, "virtual device moved");
                true
            }
            _ => false,
        }
    }

    /// Number of simulated devices, children included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Address and reachability of a device, following hub routes.
    fn resolve(
        placements: &HashMap<DeviceIdentity, Placement>,
        identity: &DeviceIdentity,
    ) -> Option<(IpAddr, bool)> {
        let placement = placements.get(identity)?;
        match &placement.route {
            Route::Direct(address) => Some((*address, placement.reachable)),
            Route::Via(parent) => Self::resolve(placements, parent)
                .map(|(address, reachable)| (address, reachable && placement.reachable)),
        }
    }

    fn describe(
        &self,
        placements: &HashMap<DeviceIdentity, Placement>,
        device: &VirtualDevice,
        address: IpAddr,
    ) -> DeviceDescriptor {
        let mut descriptor = DeviceDescriptor::new(
            device.identity().clone(),
            device.alias(),
            address,
            device.capability_class(),
        )
        .with_model(device.model());
        let mut children: Vec<_> = placements
            .iter()
            .filter(|(_, placement)| {
                placement.reachable
                    && matches!(&placement.route, Route::Via(parent) if parent == device.identity())
            })
            .filter_map(|(identity, _)| self.devices.get(identity))
            .collect();
        children.sort_by(|a, b| a.identity().cmp(b.identity()));
        for child in children {
            descriptor = descriptor.with_child(self.describe(placements, child, address));
        }
        descriptor
    }

    /// Find the device behind `identity`, checking that `address` routes to it.
    fn reach(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
    ) -> Result<&VirtualDevice, DeviceError> {
        let placements = self.placements();
        match Self::resolve(&placements, identity) {
            Some((routed, true)) if routed == address => self
                .devices
                .get(identity)
                .ok_or_else(|| unreachable(address)),
            _ => Err(unreachable(address)),
        }
    }
}

fn unreachable(address: IpAddr) -> DeviceError {
    DeviceError::Unreachable {
        address,
        source: std::io::Error::new(
            std::io::ErrorKind::HostUnreachable,
            "no virtual device answered",
        ),
    }
}

impl DeviceProtocol for VirtualProtocol {
    #[tracing::instrument(skip(self))]
    async fn discover(
        &self,
        target: ProbeTarget,
        _timeout: Duration,
    ) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let placements = self.placements();
        let found: Vec<_> = self
            .roots
            .iter()
            .filter_map(|identity| {
                let placement = placements.get(identity)?;
                let Route::Direct(address) = placement.route else {
                    return None;
                };
                let wanted = match target {
                    ProbeTarget::Broadcast => true,
                    ProbeTarget::Host(host) => host == address,
                };
                if !(placement.reachable && wanted) {
                    return None;
                }
                let device = self.devices.get(identity)?;
                Some(self.describe(&placements, device, address))
            })
            .collect();
        match target {
            ProbeTarget::Host(address) if found.is_empty() => Err(unreachable(address)),
            _ => Ok(found),
        }
    }

    async fn fetch_state(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
    ) -> Result<Attributes, DeviceError> {
        self.reach(address, identity).map(VirtualDevice::read)
    }

    async fn send_command(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
        attributes: &Attributes,
    ) -> Result<Attributes, DeviceError> {
        let device = self.reach(address, identity)?;
        let applied = device.apply(attributes);
        tracing::debug!(%identity, applied = applied.len(), "virtual command applied");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kasa_bridge_domain::attribute::AttributeValue;
    use kasa_bridge_domain::capability::CapabilityClass;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn id(raw: &str) -> DeviceIdentity {
        DeviceIdentity::new(raw).unwrap()
    }

    fn lamp() -> DeviceIdentity {
        id("8006F1E2A1B2C3D4")
    }

    fn hub() -> DeviceIdentity {
        id("80A1F1E2C3D4E5F6")
    }

    fn bedroom() -> DeviceIdentity {
        id("80A1C3D4E5F6D7E8F9A0")
    }

    #[tokio::test]
    async fn should_answer_broadcast_with_top_level_devices() {
        let network = VirtualProtocol::demo().unwrap();

        let found = network
            .discover(ProbeTarget::Broadcast, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(network.len(), 5);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].alias, "Living Room Lamp");
        assert_eq!(found[0].model.as_deref(), Some("VPlug-1"));
        let hub = &found[2];
        assert_eq!(hub.capability_class, CapabilityClass::Hub);
        assert_eq!(hub.children.len(), 2);
        assert!(
            hub.children
                .iter()
                .all(|c| c.capability_class == CapabilityClass::ThermostaticValve)
        );
    }

    #[tokio::test]
    async fn should_flatten_hub_children_onto_hub_address() {
        let network = VirtualProtocol::demo().unwrap();

        let found = network
            .discover(ProbeTarget::Host(demo_address(20)), TIMEOUT)
            .await
            .unwrap();
        let flat: Vec<_> = found.into_iter().flat_map(DeviceDescriptor::flatten).collect();

        assert_eq!(flat.len(), 3);
        let valve = flat.iter().find(|d| d.identity == bedroom()).unwrap();
        assert_eq!(valve.address, demo_address(20));
        assert_eq!(valve.parent, Some(hub()));
    }

    #[tokio::test]
    async fn should_fail_host_query_without_answer() {
        let network = VirtualProtocol::demo().unwrap();

        let err = network
            .discover(ProbeTarget::Host(demo_address(99)), TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, DeviceError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn should_apply_command_and_reflect_it() {
        let network = VirtualProtocol::demo().unwrap();
        let mut changes = Attributes::new();
        changes.insert("state".into(), AttributeValue::Bool(true));
        changes.insert("brightness".into(), AttributeValue::Int(10));

        let applied = network
            .send_command(demo_address(10), &lamp(), &changes)
            .await
            .unwrap();
        let state = network.fetch_state(demo_address(10), &lamp()).await.unwrap();

        assert_eq!(applied.len(), 1);
        assert_eq!(state["state"], AttributeValue::Bool(true));
    }

    #[tokio::test]
    async fn should_route_valve_through_hub() {
        let network = VirtualProtocol::demo().unwrap();

        let state = network
            .fetch_state(demo_address(20), &bedroom())
            .await
            .unwrap();

        assert_eq!(state["battery_level"], AttributeValue::Int(87));
        assert!(
            network
                .fetch_state(demo_address(10), &bedroom())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn should_take_children_offline_with_their_hub() {
        let network = VirtualProtocol::demo().unwrap();
        assert!(network.set_reachable(&hub(), false));

        let err = network
            .fetch_state(demo_address(20), &bedroom())
            .await
            .unwrap_err();
        let found = network
            .discover(ProbeTarget::Broadcast, TIMEOUT)
            .await
            .unwrap();

        assert!(matches!(err, DeviceError::Unreachable { .. }));
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn should_follow_moved_device() {
        let network = VirtualProtocol::demo().unwrap();
        assert!(network.move_device(&lamp(), demo_address(42)));

        assert!(network.fetch_state(demo_address(10), &lamp()).await.is_err());
        assert!(network.fetch_state(demo_address(42), &lamp()).await.is_ok());
    }

    #[test]
    fn should_refuse_to_move_hub_children() {
        let network = VirtualProtocol::demo().unwrap();
        assert!(!network.move_device(&bedroom(), demo_address(42)));
        assert!(!network.set_reachable(&id("UNKNOWN"), false));
    }
}
