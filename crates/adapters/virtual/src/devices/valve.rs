//! Virtual thermostatic radiator valve.
//!
//! The room temperature drifts towards the target by a fixed step every time
//! the valve is read, so repeated polling shows a room heating up or cooling
//! down.

use std::sync::Mutex;

use kasa_bridge_domain::attribute::{AttributeValue, Attributes};
use kasa_bridge_domain::identity::DeviceIdentity;

use super::{applied, bool_change, lock};

/// Degrees the room moves towards the target per reading.
const DRIFT_STEP: f64 = 0.2;
/// Floor enforced while frost protection is enabled.
const FROST_FLOOR: f64 = 7.0;
/// Temperature an unheated room settles at.
const IDLE_ROOM: f64 = 16.0;

#[derive(Debug, Clone, Copy)]
struct ValveState {
    on: bool,
    target: f64,
    room: f64,
    battery: i64,
    frost_protection: bool,
    child_lock: bool,
}

impl ValveState {
    fn effective_target(&self) -> f64 {
        if self.frost_protection {
            self.target.max(FROST_FLOOR)
        } else {
            self.target
        }
    }

    /// Setpoint the valve regulates to; an idle room cools towards `IDLE_ROOM`.
    fn regulated(&self) -> f64 {
        if self.on {
            self.effective_target()
        } else {
            IDLE_ROOM
        }
    }

    fn drift(&mut self) {
        let delta = self.regulated() - self.room;
        let step = delta.clamp(-DRIFT_STEP, DRIFT_STEP);
        self.room = ((self.room + step) * 10.0).round() / 10.0;
    }
}

/// A simulated radiator valve reached through a hub.
pub struct VirtualValve {
    pub(crate) identity: DeviceIdentity,
    pub(crate) alias: String,
    state: Mutex<ValveState>,
}

impl VirtualValve {
    #[must_use]
    pub fn new(identity: DeviceIdentity, alias: impl Into<String>, room: f64) -> Self {
        Self {
            identity,
            alias: alias.into(),
            state: Mutex::new(ValveState {
                on: true,
                target: 18.0,
                room,
                battery: 87,
                frost_protection: false,
                child_lock: false,
            }),
        }
    }

    pub(super) fn read(&self) -> Attributes {
        let state = {
            let mut state = lock(&self.state);
            state.drift();
            *state
        };
        let mode = if !state.on {
            "off"
        } else if state.room < state.effective_target() {
            "heating"
        } else {
            "idle"
        };
        let mut attributes = Attributes::new();
        attributes.insert("state".into(), AttributeValue::Bool(state.on));
        attributes.insert("target_temperature".into(), AttributeValue::Float(state.target));
        attributes.insert("temperature".into(), AttributeValue::Float(state.room));
        attributes.insert("battery_level".into(), AttributeValue::Int(state.battery));
        attributes.insert(
            "frost_protection_enabled".into(),
            AttributeValue::Bool(state.frost_protection),
        );
        attributes.insert("child_lock".into(), AttributeValue::Bool(state.child_lock));
        attributes.insert(
            "thermostat_mode".into(),
            AttributeValue::String(mode.into()),
        );
        attributes
    }

    pub(super) fn apply(&self, changes: &Attributes) -> Attributes {
        let mut state = lock(&self.state);
        if let Some(on) = bool_change(changes, "state") {
            state.on = on;
        }
        if let Some(target) = changes
            .get("target_temperature")
            .and_then(AttributeValue::as_f64)
        {
            state.target = target;
        }
        if let Some(enabled) = bool_change(changes, "frost_protection_enabled") {
            state.frost_protection = enabled;
        }
        if let Some(locked) = bool_change(changes, "child_lock") {
            state.child_lock = locked;
        }
        applied(
            changes,
            &[
                "state",
                "target_temperature",
                "frost_protection_enabled",
                "child_lock",
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valve(room: f64) -> VirtualValve {
        VirtualValve::new(
            DeviceIdentity::new("80A1D7E8F9A0").unwrap(),
            "Bedroom Radiator",
            room,
        )
    }

    #[test]
    fn should_drift_towards_target_when_read() {
        let valve = valve(17.0);

        let first = valve.read();
        let second = valve.read();

        assert_eq!(first["temperature"], AttributeValue::Float(17.2));
        assert_eq!(second["temperature"], AttributeValue::Float(17.4));
        assert_eq!(first["thermostat_mode"], AttributeValue::String("heating".into()));
    }

    #[test]
    fn should_settle_on_target() {
        let valve = valve(17.9);

        let attributes = valve.read();

        assert_eq!(attributes["temperature"], AttributeValue::Float(18.0));
        assert_eq!(attributes["thermostat_mode"], AttributeValue::String("idle".into()));
    }

    #[test]
    fn should_stop_heating_when_switched_off() {
        let valve = valve(17.0);
        let mut changes = Attributes::new();
        changes.insert("state".into(), AttributeValue::Bool(false));
        valve.apply(&changes);

        let attributes = valve.read();

        assert_eq!(attributes["temperature"], AttributeValue::Float(16.8));
        assert_eq!(attributes["thermostat_mode"], AttributeValue::String("off".into()));
    }

    #[test]
    fn should_apply_target_immediately() {
        let valve = valve(19.0);
        let mut changes = Attributes::new();
        changes.insert("target_temperature".into(), AttributeValue::Float(21.5));
        changes.insert("temperature".into(), AttributeValue::Float(30.0));

        let applied = valve.apply(&changes);

        assert_eq!(applied.len(), 1);
        assert_eq!(
            valve.read()["target_temperature"],
            AttributeValue::Float(21.5)
        );
    }
}
