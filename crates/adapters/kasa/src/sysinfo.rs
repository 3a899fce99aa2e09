//! `get_sysinfo` answers and their translation into descriptors and
//! attributes.

use std::net::IpAddr;

use serde::Deserialize;
use serde_json::Value;

use kasa_bridge_domain::attribute::{AttributeValue, Attributes};
use kasa_bridge_domain::capability::CapabilityClass;
use kasa_bridge_domain::device::DeviceDescriptor;
use kasa_bridge_domain::identity::DeviceIdentity;

use crate::error::KasaError;

#[derive(Debug, Clone, Deserialize)]
pub struct SysInfo {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub model: Option<String>,
    /// `IOT.SMARTPLUGSWITCH`, `IOT.SMARTBULB`; bulbs call it `mic_type`.
    #[serde(rename = "type", alias = "mic_type", default)]
    pub device_type: String,
    #[serde(default)]
    pub relay_state: Option<u8>,
    #[serde(default)]
    pub led_off: Option<u8>,
    #[serde(default)]
    pub rssi: Option<i64>,
    #[serde(default)]
    pub light_state: Option<LightState>,
    /// Outlets of a power strip.
    #[serde(default)]
    pub children: Vec<ChildInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LightState {
    #[serde(default)]
    pub on_off: u8,
    #[serde(default)]
    pub brightness: Option<i64>,
    #[serde(default)]
    pub color_temp: Option<i64>,
    #[serde(default)]
    pub hue: Option<i64>,
    #[serde(default)]
    pub saturation: Option<i64>,
    /// Settings the bulb returns to when switched on; only sent while off.
    #[serde(default)]
    pub dft_on_state: Option<Box<LightState>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChildInfo {
    pub id: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub state: u8,
}

/// Which endpoint of a sysinfo answer a request is about.
#[derive(Debug, Clone, Copy)]
pub enum Endpoint<'a> {
    Device,
    Outlet(&'a ChildInfo),
}

impl SysInfo {
    /// Extract the sysinfo from a `{"system":{"get_sysinfo":{...}}}` answer.
    pub fn from_response(response: &Value) -> Result<Self, KasaError> {
        let info = response
            .pointer("/system/get_sysinfo")
            .ok_or_else(|| KasaError::Unexpected("answer without get_sysinfo".into()))?;
        check_err_code(info)?;
        Self::deserialize(info).map_err(KasaError::Json)
    }

    pub fn capability_class(&self) -> Result<CapabilityClass, KasaError> {
        let kind = self.device_type.to_ascii_uppercase();
        if kind.contains("SMARTBULB") {
            Ok(CapabilityClass::Bulb)
        } else if kind.contains("SMARTPLUG") {
            Ok(CapabilityClass::Plug)
        } else {
            Err(KasaError::Unsupported(self.device_type.clone()))
        }
    }

    /// Outlet identities are sometimes reported as a bare index suffix.
    pub(crate) fn child_identity(&self, child: &ChildInfo) -> String {
        if child.id.starts_with(&self.device_id) {
            child.id.clone()
        } else {
            format!("{}{}", self.device_id, child.id)
        }
    }

    /// Describe the device, its outlets reported as children.
    pub fn descriptor(&self, address: IpAddr) -> Result<DeviceDescriptor, KasaError> {
        let identity = parse_identity(&self.device_id)?;
        let mut descriptor =
            DeviceDescriptor::new(identity, self.alias.clone(), address, self.capability_class()?);
        if let Some(model) = &self.model {
            descriptor = descriptor.with_model(model.clone());
        }
        for child in &self.children {
            let outlet = DeviceDescriptor::new(
                parse_identity(&self.child_identity(child))?,
                child.alias.clone(),
                address,
                CapabilityClass::Plug,
            );
            descriptor = descriptor.with_child(match &self.model {
                Some(model) => outlet.with_model(model.clone()),
                None => outlet,
            });
        }
        Ok(descriptor)
    }

    /// Resolve `identity` to this device or one of its outlets.
    pub fn endpoint(&self, identity: &DeviceIdentity) -> Result<Endpoint<'_>, KasaError> {
        if self.device_id == identity.as_str() {
            return Ok(Endpoint::Device);
        }
        self.children
            .iter()
            .find(|child| self.child_identity(child) == identity.as_str())
            .map(Endpoint::Outlet)
            .ok_or_else(|| KasaError::IdentityMismatch {
                expected: identity.to_string(),
                found: self.device_id.clone(),
            })
    }

    /// Current attributes of `endpoint`.
    pub fn attributes(&self, endpoint: Endpoint<'_>) -> Attributes {
        let mut attributes = Attributes::new();
        if let Some(rssi) = self.rssi {
            attributes.insert("rssi".into(), AttributeValue::Int(rssi));
        }
        match endpoint {
            Endpoint::Outlet(child) => {
                attributes.insert("state".into(), AttributeValue::Bool(child.state == 1));
            }
            Endpoint::Device => {
                if let Some(relay) = self.relay_state {
                    attributes.insert("state".into(), AttributeValue::Bool(relay == 1));
                }
                if let Some(led_off) = self.led_off {
                    attributes.insert("led".into(), AttributeValue::Bool(led_off == 0));
                }
                if let Some(light) = &self.light_state {
                    light_attributes(light, &mut attributes);
                }
            }
        }
        attributes
    }
}

fn light_attributes(light: &LightState, attributes: &mut Attributes) {
    attributes.insert("state".into(), AttributeValue::Bool(light.on_off == 1));
    let levels = light.dft_on_state.as_deref().unwrap_or(light);
    let pairs = [
        ("brightness", levels.brightness),
        ("color_temp", levels.color_temp),
        ("hue", levels.hue),
        ("saturation", levels.saturation),
    ];
    for (name, value) in pairs {
        if let Some(value) = value {
            attributes.insert(name.into(), AttributeValue::Int(value));
        }
    }
}

fn parse_identity(raw: &str) -> Result<DeviceIdentity, KasaError> {
    DeviceIdentity::new(raw).map_err(|err| KasaError::Unexpected(err.to_string()))
}

/// Fail with [`KasaError::Rejected`] when a module answer carries a
/// non-zero `err_code`.
pub fn check_err_code(answer: &Value) -> Result<(), KasaError> {
    match answer.get("err_code").and_then(Value::as_i64) {
        None | Some(0) => Ok(()),
        Some(code) => Err(KasaError::Rejected {
            code,
            message: answer
                .get("err_msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }),
    }
}

/// Instantaneous power in watts from an `emeter.get_realtime` answer.
///
/// Newer firmware reports milliwatts (`power_mw`), older watts (`power`).
pub fn realtime_power(response: &Value) -> Option<f64> {
    let realtime = response.pointer("/emeter/get_realtime")?;
    if check_err_code(realtime).is_err() {
        return None;
    }
    realtime
        .get("power_mw")
        .and_then(Value::as_f64)
        .map(|mw| mw / 1000.0)
        .or_else(|| realtime.get("power").and_then(Value::as_f64))
}
