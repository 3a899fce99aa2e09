//! Translation of attribute changes into protocol requests.
//!
//! All changes of one command go out in a single request. Each attribute is
//! owned by exactly one `(module, method)` pair; the answer carries one
//! `err_code` per pair, which tells which attributes the device applied.

use serde_json::{Map, Value, json};

use kasa_bridge_domain::attribute::{AttributeValue, Attributes};

use crate::sysinfo::{Endpoint, SysInfo, check_err_code};

const SYSTEM: &str = "system";
const LIGHTING: &str = "smartlife.iot.smartbulb.lightingservice";

#[must_use]
pub fn sysinfo_request() -> Value {
    json!({ "system": { "get_sysinfo": {} } })
}

/// Sysinfo plus realtime energy; devices without a meter answer the
/// second part with an error that is ignored.
#[must_use]
pub fn state_request() -> Value {
    json!({
        "system": {"get_sysinfo": {}},
        "emeter": {"get_realtime": {}}
    })
}

/// A prepared command.
#[derive(Debug)]
pub struct CommandRequest {
    pub request: Value,
    /// Attribute name and the `(module, method)` answering for it.
    routes: Vec<(String, &'static str, &'static str)>,
}

impl CommandRequest {
    /// Build the request for `attributes` on `endpoint`.
    ///
    /// Attributes the endpoint cannot take are left out and will therefore
    /// never be reported as applied.
    #[must_use]
    pub fn build(info: &SysInfo, endpoint: Endpoint<'_>, attributes: &Attributes) -> Self {
        let mut modules: Map<String, Value> = Map::new();
        let mut routes = Vec::new();
        let mut light = Map::new();

        for (name, value) in attributes {
            let route = match (endpoint, name.as_str(), value) {
                (Endpoint::Outlet(_), "state", AttributeValue::Bool(on)) => {
                    set(&mut modules, SYSTEM, "set_relay_state", json!({ "state": u8::from(*on) }));
                    Some((SYSTEM, "set_relay_state"))
                }
                (Endpoint::Device, "state", AttributeValue::Bool(on)) if info.light_state.is_some() => {
                    light.insert("on_off".into(), json!(u8::from(*on)));
                    Some((LIGHTING, "transition_light_state"))
                }
                (Endpoint::Device, "state", AttributeValue::Bool(on)) => {
                    set(&mut modules, SYSTEM, "set_relay_state", json!({ "state": u8::from(*on) }));
                    Some((SYSTEM, "set_relay_state"))
                }
                (Endpoint::Device, "led", AttributeValue::Bool(on)) if info.led_off.is_some() => {
                    set(&mut modules, SYSTEM, "set_led_off", json!({ "off": u8::from(!*on) }));
                    Some((SYSTEM, "set_led_off"))
                }
                (
                    Endpoint::Device,
                    "brightness" | "color_temp" | "hue" | "saturation",
                    AttributeValue::Int(level),
                ) if info.light_state.is_some() => {
                    light.insert(name.clone(), json!(level));
                    Some((LIGHTING, "transition_light_state"))
                }
                _ => None,
            };
            match route {
                Some((module, method)) => routes.push((name.clone(), module, method)),
                None => tracing::debug!(attribute = %name, "attribute not supported by device"),
            }
        }

        if !light.is_empty() {
            light.insert("ignore_default".into(), json!(1));
            light.insert("transition_period".into(), json!(0));
            set(&mut modules, LIGHTING, "transition_light_state", Value::Object(light));
        }
        if let Endpoint::Outlet(child) = endpoint {
            let id = info.child_identity(child);
            modules.insert("context".into(), json!({ "child_ids": [id] }));
        }

        Self {
            request: Value::Object(modules),
            routes,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The subset of `attributes` whose module answered without error.
    #[must_use]
    pub fn applied(&self, attributes: &Attributes, answer: &Value) -> Attributes {
        self.routes
            .iter()
            .filter(|(name, module, method)| {
                let accepted = answer
                    .get(*module)
                    .and_then(|m| m.get(*method))
                    .is_some_and(|result| check_err_code(result).is_ok());
                if !accepted {
                    tracing::debug!(attribute = %name, module, method, "device did not apply attribute");
                }
                accepted
            })
            .filter_map(|(name, _, _)| {
                attributes
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect()
    }
}

fn set(modules: &mut Map<String, Value>, module: &str, method: &str, args: Value) {
    let entry = modules
        .entry(module.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(methods) = entry {
        methods.insert(method.to_string(), args);
    }
}
