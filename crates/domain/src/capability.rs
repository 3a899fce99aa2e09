//! Capability classes and their attribute schemas.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeKind, AttributeSpec};

/// Device category; decides which attributes are published and settable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityClass {
    Plug,
    Bulb,
    Hub,
    ThermostaticValve,
}

const PLUG: &[AttributeSpec] = &[
    AttributeSpec::writable("state", AttributeKind::Bool),
    AttributeSpec::writable("led", AttributeKind::Bool),
    AttributeSpec::reported("rssi", AttributeKind::Int),
    AttributeSpec::reported("current_consumption", AttributeKind::Float),
];

const BULB: &[AttributeSpec] = &[
    AttributeSpec::writable("state", AttributeKind::Bool),
    AttributeSpec::writable("brightness", AttributeKind::Int).bounded(0.0, 100.0),
    AttributeSpec::writable("color_temp", AttributeKind::Int).bounded(2500.0, 9000.0),
    AttributeSpec::writable("hue", AttributeKind::Int).bounded(0.0, 360.0),
    AttributeSpec::writable("saturation", AttributeKind::Int).bounded(0.0, 100.0),
    AttributeSpec::reported("rssi", AttributeKind::Int),
];

const HUB: &[AttributeSpec] = &[
    AttributeSpec::writable("alarm", AttributeKind::Bool),
    AttributeSpec::reported("rssi", AttributeKind::Int),
];

const THERMOSTATIC_VALVE: &[AttributeSpec] = &[
    AttributeSpec::writable("state", AttributeKind::Bool),
    AttributeSpec::writable("target_temperature", AttributeKind::Float).bounded(5.0, 30.0),
    AttributeSpec::reported("temperature", AttributeKind::Float),
    AttributeSpec::reported("battery_level", AttributeKind::Int).bounded(0.0, 100.0),
    AttributeSpec::writable("frost_protection_enabled", AttributeKind::Bool),
    AttributeSpec::writable("child_lock", AttributeKind::Bool),
    AttributeSpec::reported("thermostat_mode", AttributeKind::String),
];

impl CapabilityClass {
    /// Every known class.
    pub const ALL: [Self; 4] = [
        Self::Plug,
        Self::Bulb,
        Self::Hub,
        Self::ThermostaticValve,
    ];

    /// Attributes this class publishes, in payload order.
    #[must_use]
    pub fn schema(self) -> &'static [AttributeSpec] {
        match self {
            Self::Plug => PLUG,
            Self::Bulb => BULB,
            Self::Hub => HUB,
            Self::ThermostaticValve => THERMOSTATIC_VALVE,
        }
    }

    /// Look up a single attribute by name.
    #[must_use]
    pub fn attribute(self, name: &str) -> Option<&'static AttributeSpec> {
        self.schema().iter().find(|spec| spec.name == name)
    }

    /// Stable lowercase name, as used in configuration and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plug => "plug",
            Self::Bulb => "bulb",
            Self::Hub => "hub",
            Self::ThermostaticValve => "thermostatic_valve",
        }
    }
}

impl fmt::Display for CapabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
