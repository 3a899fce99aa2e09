//! Virtual hub: routes its valves and sounds an alarm on request.

use std::sync::Mutex;

use kasa_bridge_domain::attribute::{AttributeValue, Attributes};
use kasa_bridge_domain::identity::DeviceIdentity;

use super::{applied, bool_change, lock};

/// A simulated hub; its valves are registered separately.
pub struct VirtualHub {
    pub(crate) identity: DeviceIdentity,
    pub(crate) alias: String,
    alarm: Mutex<bool>,
}

impl VirtualHub {
    #[must_use]
    pub fn new(identity: DeviceIdentity, alias: impl Into<String>) -> Self {
        Self {
            identity,
            alias: alias.into(),
            alarm: Mutex::new(false),
        }
    }

    pub(super) fn read(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("alarm".into(), AttributeValue::Bool(*lock(&self.alarm)));
        attributes.insert("rssi".into(), AttributeValue::Int(-40));
        attributes
    }

    pub(super) fn apply(&self, changes: &Attributes) -> Attributes {
        if let Some(alarm) = bool_change(changes, "alarm") {
            *lock(&self.alarm) = alarm;
        }
        applied(changes, &["alarm"])
    }
}
