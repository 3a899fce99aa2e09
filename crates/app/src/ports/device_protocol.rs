//! Device protocol port: how the core talks to physical devices.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use kasa_bridge_domain::attribute::Attributes;
use kasa_bridge_domain::device::DeviceDescriptor;
use kasa_bridge_domain::error::DeviceError;
use kasa_bridge_domain::identity::DeviceIdentity;

/// What a single discovery probe is aimed at.
///
/// Range scans are not a protocol concern: the discovery engine expands
/// them into one [`ProbeTarget::Host`] probe per address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTarget {
    /// Network-wide discovery message; every answer counts.
    Broadcast,
    /// One fixed address.
    Host(IpAddr),
}

/// Client for the device wire protocol.
///
/// Implementations live in adapter crates (`adapter-kasa`, `adapter-virtual`).
/// The core bounds every call with its own timeout, so implementations may
/// rely on the caller to cancel a stuck request.
pub trait DeviceProtocol: Send + Sync {
    /// Probe the network and describe every device that answers.
    ///
    /// Hubs report their children inside the returned descriptor.
    fn discover(
        &self,
        target: ProbeTarget,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<DeviceDescriptor>, DeviceError>> + Send;

    /// Fetch the current attributes of one device.
    ///
    /// `address` is the routing address, which is the hub for hub children.
    fn fetch_state(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
    ) -> impl Future<Output = Result<Attributes, DeviceError>> + Send;

    /// Apply attribute changes in one call.
    ///
    /// Returns the subset of `attributes` the device actually applied.
    fn send_command(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
        attributes: &Attributes,
    ) -> impl Future<Output = Result<Attributes, DeviceError>> + Send;
}

impl<T: DeviceProtocol> DeviceProtocol for Arc<T> {
    fn discover(
        &self,
        target: ProbeTarget,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<DeviceDescriptor>, DeviceError>> + Send {
        (**self).discover(target, timeout)
    }

    fn fetch_state(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
    ) -> impl Future<Output = Result<Attributes, DeviceError>> + Send {
        (**self).fetch_state(address, identity)
    }

    fn send_command(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
        attributes: &Attributes,
    ) -> impl Future<Output = Result<Attributes, DeviceError>> + Send {
        (**self).send_command(address, identity, attributes)
    }
}
