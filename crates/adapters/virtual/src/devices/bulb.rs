//! Virtual bulb: on/off, brightness, white temperature and colour.

use std::sync::Mutex;

use kasa_bridge_domain::attribute::{AttributeValue, Attributes};
use kasa_bridge_domain::identity::DeviceIdentity;

use super::{applied, bool_change, int_change, lock};

#[derive(Debug, Clone, Copy)]
struct BulbState {
    on: bool,
    brightness: i64,
    color_temp: i64,
    hue: i64,
    saturation: i64,
}

/// A simulated dimmable colour bulb.
pub struct VirtualBulb {
    pub(crate) identity: DeviceIdentity,
    pub(crate) alias: String,
    state: Mutex<BulbState>,
}

impl VirtualBulb {
    #[must_use]
    pub fn new(identity: DeviceIdentity, alias: impl Into<String>) -> Self {
        Self {
            identity,
            alias: alias.into(),
            state: Mutex::new(BulbState {
                on: false,
                brightness: 80,
                color_temp: 2700,
                hue: 0,
                saturation: 0,
            }),
        }
    }

    pub(super) fn read(&self) -> Attributes {
        let state = *lock(&self.state);
        let mut attributes = Attributes::new();
        attributes.insert("state".into(), AttributeValue::Bool(state.on));
        attributes.insert("brightness".into(), AttributeValue::Int(state.brightness));
        attributes.insert("color_temp".into(), AttributeValue::Int(state.color_temp));
        attributes.insert("hue".into(), AttributeValue::Int(state.hue));
        attributes.insert("saturation".into(), AttributeValue::Int(state.saturation));
        attributes.insert("rssi".into(), AttributeValue::Int(-47));
        attributes
    }

    pub(super) fn apply(&self, changes: &Attributes) -> Attributes {
        let mut state = lock(&self.state);
        if let Some(on) = bool_change(changes, "state") {
            state.on = on;
        }
        if let Some(brightness) = int_change(changes, "brightness") {
            state.brightness = brightness;
        }
        if let Some(color_temp) = int_change(changes, "color_temp") {
            state.color_temp = color_temp;
        }
        if let Some(hue) = int_change(changes, "hue") {
            state.hue = hue;
        }
        if let Some(saturation) = int_change(changes, "saturation") {
            state.saturation = saturation;
        }
        applied(
            changes,
            &["state", "brightness", "color_temp", "hue", "saturation"],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_apply_several_levels_at_once() {
        let bulb = VirtualBulb::new(DeviceIdentity::new("8012BBBB").unwrap(), "Desk Bulb");
        let mut changes = Attributes::new();
        changes.insert("state".into(), AttributeValue::Bool(true));
        changes.insert("brightness".into(), AttributeValue::Int(30));
        changes.insert("hue".into(), AttributeValue::Int(240));

        let applied = bulb.apply(&changes);

        assert_eq!(applied.len(), 3);
        let attributes = bulb.read();
        assert_eq!(attributes["state"], AttributeValue::Bool(true));
        assert_eq!(attributes["brightness"], AttributeValue::Int(30));
        assert_eq!(attributes["hue"], AttributeValue::Int(240));
        assert_eq!(attributes["color_temp"], AttributeValue::Int(2700));
    }
}
