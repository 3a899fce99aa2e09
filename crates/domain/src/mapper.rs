//! Topic/payload mapper: pure translation between devices and bus messages.
//!
//! Topics are `<prefix>/<slug(alias)>_<last8(identity)>/<state|set>`. They are
//! derived on demand and never stored, so a renamed device simply moves to a
//! new topic on its next publication.

use std::fmt;

use serde_json::{Map, Value};

use crate::attribute::{AttributeValue, Attributes};
use crate::capability::CapabilityClass;
use crate::device::Device;
use crate::error::CommandError;
use crate::identity::DeviceIdentity;

/// Which of a device's two topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// Outbound state snapshots.
    State,
    /// Inbound commands.
    Set,
}

impl TopicKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Set => "set",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalise an alias for use inside a topic level.
///
/// Lowercases, turns each whitespace run into one `_`, then drops anything
/// outside `[a-z0-9_-]`.
#[must_use]
pub fn slug(alias: &str) -> String {
    let mut out = String::with_capacity(alias.len());
    let mut in_space = false;
    for ch in alias.chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-' {
            out.push(ch);
        }
    }
    out
}

/// The topic level naming one device: `<slug(alias)>_<last8(identity)>`.
#[must_use]
pub fn device_slug(alias: &str, identity: &DeviceIdentity) -> String {
    format!("{}_{}", slug(alias), identity.last8())
}

/// Full topic of a device for the given kind.
#[must_use]
pub fn topic_for(prefix: &str, device: &Device, kind: TopicKind) -> String {
    format!(
        "{prefix}/{}/{kind}",
        device_slug(&device.alias, &device.identity)
    )
}

/// Subscription filter matching every device's command topic.
#[must_use]
pub fn command_filter(prefix: &str) -> String {
    format!("{prefix}/+/{}", TopicKind::Set)
}

/// Split a device topic into its device slug and kind.
///
/// Returns `None` for topics outside `prefix` or with an unexpected shape.
#[must_use]
pub fn parse_topic<'a>(prefix: &str, topic: &'a str) -> Option<(&'a str, TopicKind)> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let (device, kind) = rest.split_once('/')?;
    if device.is_empty() || device.contains('/') {
        return None;
    }
    let kind = match kind {
        "state" => TopicKind::State,
        "set" => TopicKind::Set,
        _ => return None,
    };
    Some((device, kind))
}

/// Encode a device's state as the JSON object published on its state topic.
///
/// Every attribute of the class schema is present, `null` when its value is
/// not known yet.
#[must_use]
pub fn encode_state(device: &Device) -> Value {
    let object: Map<String, Value> = device
        .capability_class
        .schema()
        .iter()
        .map(|spec| {
            let value = device
                .attribute(spec.name)
                .map_or(Value::Null, attribute_to_json);
            (spec.name.to_string(), value)
        })
        .collect();
    Value::Object(object)
}

fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Bool(v) => Value::Bool(*v),
        AttributeValue::Int(v) => Value::from(*v),
        AttributeValue::Float(v) => Value::from(*v),
        AttributeValue::String(v) => Value::String(v.clone()),
    }
}

/// Decode a command payload against the schema of `class`.
///
/// # Errors
///
/// Returns a [`CommandError`] for malformed JSON, a non-object or empty
/// payload, and for any key that is unknown, read-only, mistyped or out of
/// range. A single bad key rejects the whole command.
pub fn decode_command(class: CapabilityClass, payload: &[u8]) -> Result<Attributes, CommandError> {
    let value: Value = serde_json::from_slice(payload).map_err(CommandError::Malformed)?;
    let Value::Object(object) = value else {
        return Err(CommandError::NotAnObject);
    };
    if object.is_empty() {
        return Err(CommandError::Empty);
    }

    let mut attributes = Attributes::new();
    for (name, raw) in object {
        let spec = class
            .attribute(&name)
            .ok_or_else(|| CommandError::UnknownAttribute {
                name: name.clone(),
                class,
            })?;
        if !spec.writable {
            return Err(CommandError::ReadOnly { name });
        }
        let Some(value) = AttributeValue::from_json(&raw, spec.kind) else {
            return Err(CommandError::TypeMismatch {
                name,
                expected: spec.kind,
            });
        };
        if let Some((min, max)) = spec.range
            && !spec.in_range(&value)
        {
            return Err(CommandError::OutOfRange { name, min, max });
        }
        attributes.insert(name, value);
    }
    Ok(attributes)
}
