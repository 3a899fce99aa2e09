//! In-memory [`DeviceProtocol`] used by the unit tests of this crate.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;
use std::time::Duration;

use kasa_bridge_domain::attribute::{AttributeValue, Attributes};
use kasa_bridge_domain::capability::CapabilityClass;
use kasa_bridge_domain::device::DeviceDescriptor;
use kasa_bridge_domain::error::DeviceError;
use kasa_bridge_domain::identity::DeviceIdentity;

use crate::ports::{DeviceProtocol, ProbeTarget};

pub(crate) fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
}

pub(crate) fn identity(raw: &str) -> DeviceIdentity {
    DeviceIdentity::new(raw).unwrap()
}

pub(crate) fn attrs(pairs: &[(&str, AttributeValue)]) -> Attributes {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .collect()
}

struct FakeDevice {
    descriptor: DeviceDescriptor,
    attributes: Attributes,
    reachable: bool,
    /// Attribute names the device accepts; everything when `None`.
    accepts: Option<Vec<String>>,
    /// Applied values only show up after this many further fetches.
    lag: usize,
    pending: Option<(Attributes, usize)>,
    /// Time taken to answer a query. Fetched values are read when the
    /// query arrives, so a slow answer can carry a stale snapshot.
    delay: Duration,
}

#[derive(Default)]
struct FakeState {
    devices: HashMap<DeviceIdentity, FakeDevice>,
    broadcast_fails: bool,
    fetches: HashMap<DeviceIdentity, usize>,
    commands: Vec<(DeviceIdentity, Attributes)>,
}

/// Scriptable stand-in for a network of devices.
#[derive(Default)]
pub(crate) struct FakeProtocol {
    state: Mutex<FakeState>,
}

impl FakeProtocol {
    pub(crate) fn add(&self, descriptor: DeviceDescriptor, attributes: Attributes) {
        let mut state = self.state.lock().unwrap();
        state.devices.insert(
            descriptor.identity.clone(),
            FakeDevice {
                descriptor,
                attributes,
                reachable: true,
                accepts: None,
                lag: 0,
                pending: None,
                delay: Duration::ZERO,
            },
        );
    }

    pub(crate) fn add_plug(&self, id: &str, alias: &str, last: u8) {
        self.add(
            DeviceDescriptor::new(identity(id), alias, ip(last), CapabilityClass::Plug),
            attrs(&[("state", AttributeValue::Bool(false))]),
        );
    }

    /// Add a hub with one valve child routed through it.
    pub(crate) fn add_hub_with_valve(&self, hub: &str, valve: &str, last: u8) {
        self.add(
            DeviceDescriptor::new(identity(hub), "Hub", ip(last), CapabilityClass::Hub),
            attrs(&[("alarm", AttributeValue::Bool(false))]),
        );
        let mut child = DeviceDescriptor::new(
            identity(valve),
            "Bedroom Valve",
            ip(last),
            CapabilityClass::ThermostaticValve,
        );
        child.parent = Some(identity(hub));
        self.add(
            child,
            attrs(&[
                ("target_temperature", AttributeValue::Float(18.0)),
                ("temperature", AttributeValue::Float(19.2)),
            ]),
        );
    }

    pub(crate) fn set_reachable(&self, id: &str, reachable: bool) {
        let mut state = self.state.lock().unwrap();
        state.devices.get_mut(&identity(id)).unwrap().reachable = reachable;
    }

    pub(crate) fn move_to(&self, id: &str, last: u8) {
        let mut state = self.state.lock().unwrap();
        state.devices.get_mut(&identity(id)).unwrap().descriptor.address = ip(last);
    }

    pub(crate) fn accept_only(&self, id: &str, names: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.devices.get_mut(&identity(id)).unwrap().accepts =
            Some(names.iter().map(|n| (*n).to_string()).collect());
    }

    pub(crate) fn set_lag(&self, id: &str, lag: usize) {
        let mut state = self.state.lock().unwrap();
        state.devices.get_mut(&identity(id)).unwrap().lag = lag;
    }

    pub(crate) fn set_delay(&self, id: &str, delay: Duration) {
        let mut state = self.state.lock().unwrap();
        state.devices.get_mut(&identity(id)).unwrap().delay = delay;
    }

    pub(crate) fn fail_broadcast(&self) {
        self.state.lock().unwrap().broadcast_fails = true;
    }

    pub(crate) fn fetch_count(&self, id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.fetches.get(&identity(id)).copied().unwrap_or(0)
    }

    pub(crate) fn commands(&self) -> Vec<(DeviceIdentity, Attributes)> {
        self.state.lock().unwrap().commands.clone()
    }

    fn describe(state: &FakeState, device: &FakeDevice) -> DeviceDescriptor {
        let mut descriptor = device.descriptor.clone();
        descriptor.parent = None;
        descriptor.children = state
            .devices
            .values()
            .filter(|d| d.descriptor.parent.as_ref() == Some(&device.descriptor.identity))
            .map(|d| {
                let mut child = d.descriptor.clone();
                child.parent = None;
                child
            })
            .collect();
        descriptor
    }

    fn delay_at(&self, address: IpAddr) -> Duration {
        let state = self.state.lock().unwrap();
        state
            .devices
            .values()
            .filter(|d| d.descriptor.address == address)
            .map(|d| d.delay)
            .max()
            .unwrap_or_default()
    }

    /// Read the device as the query arrives, along with its answer delay.
    fn observe(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
    ) -> (Result<Attributes, DeviceError>, Duration) {
        let mut state = self.state.lock().unwrap();
        *state.fetches.entry(identity.clone()).or_default() += 1;
        let Some(device) = state
            .devices
            .get_mut(identity)
            .filter(|d| d.reachable && d.descriptor.address == address)
        else {
            return (Err(unreachable(address)), Duration::ZERO);
        };
        if let Some((pending, remaining)) = device.pending.take() {
            if remaining == 0 {
                device.attributes.extend(pending);
            } else {
                device.pending = Some((pending, remaining - 1));
            }
        }
        (Ok(device.attributes.clone()), device.delay)
    }
}

fn unreachable(address: IpAddr) -> DeviceError {
    DeviceError::Unreachable {
        address,
        source: std::io::Error::new(std::io::ErrorKind::HostUnreachable, "no route"),
    }
}

impl DeviceProtocol for FakeProtocol {
    async fn discover(
        &self,
        target: ProbeTarget,
        _timeout: Duration,
    ) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        if let ProbeTarget::Host(address) = target {
            let delay = self.delay_at(address);
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        let top_level = state
            .devices
            .values()
            .filter(|d| d.reachable && d.descriptor.parent.is_none());
        match target {
            ProbeTarget::Broadcast if state.broadcast_fails => {
                Err(DeviceError::protocol("broadcast socket closed"))
            }
            ProbeTarget::Broadcast => Ok(top_level.map(|d| Self::describe(&state, d)).collect()),
            ProbeTarget::Host(address) => {
                let found: Vec<_> = top_level
                    .filter(|d| d.descriptor.address == address)
                    .map(|d| Self::describe(&state, d))
                    .collect();
                if found.is_empty() {
                    Err(unreachable(address))
                } else {
                    Ok(found)
                }
            }
        }
    }

    async fn fetch_state(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
    ) -> Result<Attributes, DeviceError> {
        let (observed, delay) = self.observe(address, identity);
        tokio::time::sleep(delay).await;
        observed
    }

    async fn send_command(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
        attributes: &Attributes,
    ) -> Result<Attributes, DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push((identity.clone(), attributes.clone()));
        let device = state
            .devices
            .get_mut(identity)
            .filter(|d| d.reachable && d.descriptor.address == address)
            .ok_or_else(|| unreachable(address))?;
        let applied: Attributes = attributes
            .iter()
            .filter(|(name, _)| {
                device
                    .accepts
                    .as_ref()
                    .is_none_or(|accepted| accepted.contains(name))
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if device.lag == 0 {
            device.attributes.extend(applied.clone());
        } else {
            device.pending = Some((applied.clone(), device.lag));
        }
        Ok(applied)
    }
}
