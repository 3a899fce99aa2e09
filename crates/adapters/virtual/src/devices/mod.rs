//! Simulated devices: plug, bulb, hub and thermostatic valve.
//!
//! Each device holds a fixed [`DeviceIdentity`] so it remains stable across
//! restarts, exactly like real hardware.

mod bulb;
mod hub;
mod plug;
mod valve;

pub use bulb::VirtualBulb;
pub use hub::VirtualHub;
pub use plug::VirtualPlug;
pub use valve::VirtualValve;

use std::sync::{Mutex, MutexGuard, PoisonError};

use kasa_bridge_domain::attribute::{AttributeValue, Attributes};
use kasa_bridge_domain::capability::CapabilityClass;
use kasa_bridge_domain::identity::DeviceIdentity;

/// Wrapper enum for the concrete virtual device types.
pub enum VirtualDevice {
    Plug(VirtualPlug),
    Bulb(VirtualBulb),
    Hub(VirtualHub),
    Valve(VirtualValve),
}

impl VirtualDevice {
    pub fn identity(&self) -> &DeviceIdentity {
        match self {
            Self::Plug(d) => &d.identity,
            Self::Bulb(d) => &d.identity,
            Self::Hub(d) => &d.identity,
            Self::Valve(d) => &d.identity,
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            Self::Plug(d) => &d.alias,
            Self::Bulb(d) => &d.alias,
            Self::Hub(d) => &d.alias,
            Self::Valve(d) => &d.alias,
        }
    }

    pub fn capability_class(&self) -> CapabilityClass {
        match self {
            Self::Plug(_) => CapabilityClass::Plug,
            Self::Bulb(_) => CapabilityClass::Bulb,
            Self::Hub(_) => CapabilityClass::Hub,
            Self::Valve(_) => CapabilityClass::ThermostaticValve,
        }
    }

    pub fn model(&self) -> &'static str {
        match self {
            Self::Plug(_) => "VPlug-1",
            Self::Bulb(_) => "VBulb-1",
            Self::Hub(_) => "VHub-1",
            Self::Valve(_) => "VTrv-1",
        }
    }

    /// Current readings; reading a valve also advances its simulation.
    pub fn read(&self) -> Attributes {
        match self {
            Self::Plug(d) => d.read(),
            Self::Bulb(d) => d.read(),
            Self::Hub(d) => d.read(),
            Self::Valve(d) => d.read(),
        }
    }

    /// Apply what the device supports, returning the applied subset.
    pub fn apply(&self, changes: &Attributes) -> Attributes {
        match self {
            Self::Plug(d) => d.apply(changes),
            Self::Bulb(d) => d.apply(changes),
            Self::Hub(d) => d.apply(changes),
            Self::Valve(d) => d.apply(changes),
        }
    }
}

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn bool_change(changes: &Attributes, name: &str) -> Option<bool> {
    match changes.get(name) {
        Some(AttributeValue::Bool(value)) => Some(*value),
        _ => None,
    }
}

fn int_change(changes: &Attributes, name: &str) -> Option<i64> {
    match changes.get(name) {
        Some(AttributeValue::Int(value)) => Some(*value),
        _ => None,
    }
}

fn applied(changes: &Attributes, names: &[&str]) -> Attributes {
    changes
        .iter()
        .filter(|(name, _)| names.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
