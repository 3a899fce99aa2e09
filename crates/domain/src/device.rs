//! Device: one physical or logical endpoint known to the bridge.
//!
//! A [`DeviceDescriptor`] is what a discovery probe reports; a [`Device`] is
//! the registry record built from it and kept fresh by polling.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeKind, AttributeValue, Attributes};
use crate::capability::CapabilityClass;
use crate::identity::DeviceIdentity;
use crate::time::Timestamp;

/// A raw sighting returned by a discovery probe.
///
/// Hubs report their attached children inline; [`flatten`](Self::flatten)
/// turns them into independent sightings routed through the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub identity: DeviceIdentity,
    pub alias: String,
    pub address: IpAddr,
    pub capability_class: CapabilityClass,
    #[serde(default)]
    pub model: Option<String>,
    /// Routing parent, set for devices reached through a hub.
    #[serde(default)]
    pub parent: Option<DeviceIdentity>,
    #[serde(default)]
    pub children: Vec<DeviceDescriptor>,
}

impl DeviceDescriptor {
    /// Create a childless descriptor.
    #[must_use]
    pub fn new(
        identity: DeviceIdentity,
        alias: impl Into<String>,
        address: IpAddr,
        capability_class: CapabilityClass,
    ) -> Self {
        Self {
            identity,
            alias: alias.into(),
            address,
            capability_class,
            model: None,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Set the hardware model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach a child device.
    #[must_use]
    pub fn with_child(mut self, child: DeviceDescriptor) -> Self {
        self.children.push(child);
        self
    }

    /// Expand this sighting and its children into flat, childless sightings.
    ///
    /// Children take the parent's address, since all their traffic goes
    /// through it, and record the parent identity. Grandchildren are routed
    /// the same way.
    #[must_use]
    pub fn flatten(self) -> Vec<DeviceDescriptor> {
        let mut out = Vec::with_capacity(1 + self.children.len());
        let mut pending = vec![self];
        while let Some(mut current) = pending.pop() {
            for mut child in std::mem::take(&mut current.children) {
                child.address = current.address;
                child.parent = Some(current.identity.clone());
                pending.push(child);
            }
            out.push(current);
        }
        out
    }
}

/// Registry record of a reachable device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub identity: DeviceIdentity,
    pub alias: String,
    /// Where requests are sent; the hub's address for hub children.
    pub address: IpAddr,
    pub parent: Option<DeviceIdentity>,
    pub model: Option<String>,
    pub capability_class: CapabilityClass,
    /// Last fetched state, restricted to the class schema.
    pub attributes: Attributes,
    pub last_seen: Timestamp,
    pub consecutive_failures: u32,
}

impl Device {
    /// Build a fresh record from a first sighting.
    #[must_use]
    pub fn from_descriptor(descriptor: DeviceDescriptor, now: Timestamp) -> Self {
        Self {
            identity: descriptor.identity,
            alias: descriptor.alias,
            address: descriptor.address,
            parent: descriptor.parent,
            model: descriptor.model,
            capability_class: descriptor.capability_class,
            attributes: Attributes::new(),
            last_seen: now,
            consecutive_failures: 0,
        }
    }

    /// Refresh the observed fields from a new sighting of the same identity.
    ///
    /// Known attributes are kept; the failure counter is reset since the
    /// device just answered a probe.
    pub fn observe(&mut self, descriptor: DeviceDescriptor, now: Timestamp) {
        debug_assert_eq!(self.identity, descriptor.identity);
        self.alias = descriptor.alias;
        self.address = descriptor.address;
        self.parent = descriptor.parent;
        if descriptor.model.is_some() {
            self.model = descriptor.model;
        }
        if self.capability_class != descriptor.capability_class {
            self.attributes.clear();
            self.capability_class = descriptor.capability_class;
        }
        self.last_seen = now;
        self.consecutive_failures = 0;
    }

    /// Merge fetched attributes, dropping anything outside the class schema
    /// or of the wrong type.
    pub fn merge_attributes(&mut self, fetched: Attributes) {
        for (name, value) in fetched {
            let Some(spec) = self.capability_class.attribute(&name) else {
                continue;
            };
            let value = match (spec.kind, value) {
                (AttributeKind::Float, AttributeValue::Int(v)) => AttributeValue::Float(v as f64),
                (kind, value) if value.kind() == kind => value,
                _ => continue,
            };
            self.attributes.insert(name, value);
        }
    }

    /// Current value of an attribute, if known.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}
