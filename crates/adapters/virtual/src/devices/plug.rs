//! Virtual plug: relay and LED, with a power draw while switched on.

use std::sync::Mutex;

use kasa_bridge_domain::attribute::{AttributeValue, Attributes};
use kasa_bridge_domain::identity::DeviceIdentity;

use super::{applied, bool_change, lock};

/// Watts drawn by whatever is plugged in while the relay is closed.
const LOAD_WATTS: f64 = 42.5;

#[derive(Debug, Clone, Copy)]
struct PlugState {
    on: bool,
    led: bool,
}

/// A simulated smart plug.
pub struct VirtualPlug {
    pub(crate) identity: DeviceIdentity,
    pub(crate) alias: String,
    state: Mutex<PlugState>,
}

impl VirtualPlug {
    #[must_use]
    pub fn new(identity: DeviceIdentity, alias: impl Into<String>) -> Self {
        Self {
            identity,
            alias: alias.into(),
            state: Mutex::new(PlugState {
                on: false,
                led: true,
            }),
        }
    }

    pub(super) fn read(&self) -> Attributes {
        let state = *lock(&self.state);
        let mut attributes = Attributes::new();
        attributes.insert("state".into(), AttributeValue::Bool(state.on));
        attributes.insert("led".into(), AttributeValue::Bool(state.led));
        attributes.insert("rssi".into(), AttributeValue::Int(-52));
        attributes.insert(
            "current_consumption".into(),
            AttributeValue::Float(if state.on { LOAD_WATTS } else { 0.0 }),
        );
        attributes
    }

    pub(super) fn apply(&self, changes: &Attributes) -> Attributes {
        let mut state = lock(&self.state);
        if let Some(on) = bool_change(changes, "state") {
            state.on = on;
        }
        if let Some(led) = bool_change(changes, "led") {
            state.led = led;
        }
        applied(changes, &["state", "led"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plug() -> VirtualPlug {
        VirtualPlug::new(DeviceIdentity::new("8006AAAA").unwrap(), "Lamp")
    }

    #[test]
    fn should_default_to_off_without_load() {
        let attributes = plug().read();
        assert_eq!(attributes["state"], AttributeValue::Bool(false));
        assert_eq!(attributes["current_consumption"], AttributeValue::Float(0.0));
    }

    #[test]
    fn should_draw_power_when_switched_on() {
        let plug = plug();
        let mut changes = Attributes::new();
        changes.insert("state".into(), AttributeValue::Bool(true));

        let applied = plug.apply(&changes);

        assert_eq!(applied, changes);
        assert_eq!(
            plug.read()["current_consumption"],
            AttributeValue::Float(LOAD_WATTS)
        );
    }

    #[test]
    fn should_not_report_unsupported_attributes_as_applied() {
        let plug = plug();
        let mut changes = Attributes::new();
        changes.insert("brightness".into(), AttributeValue::Int(50));
        assert!(plug.apply(&changes).is_empty());
    }
}
