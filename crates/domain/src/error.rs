//! Error types shared across the workspace.
//!
//! Each layer reports a typed error and converts into [`BridgeError`] via
//! `#[from]` when it crosses a port boundary. None of these errors is fatal
//! to the bridge: callers log them and move on to the next cycle.

use std::net::IpAddr;
use std::time::Duration;

use crate::attribute::AttributeKind;
use crate::capability::CapabilityClass;

/// Umbrella error returned across port boundaries.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A value failed a domain invariant.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// An inbound command could not be accepted.
    #[error("command rejected")]
    Command(#[from] CommandError),

    /// Talking to a device failed.
    #[error("device error")]
    Device(#[from] DeviceError),

    /// The message bus transport failed. Always treated as transient.
    #[error("transport error")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Domain invariant violations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A device identity must not be empty.
    #[error("device identity must not be empty")]
    EmptyIdentity,

    /// A discovery job is missing the target its kind requires.
    #[error("{kind} discovery job requires a target")]
    MissingTarget {
        /// Kind of the offending job.
        kind: &'static str,
    },

    /// A discovery job carries a target its kind does not accept.
    #[error("{kind} discovery job does not accept target {target:?}")]
    UnexpectedTarget {
        /// Kind of the offending job.
        kind: &'static str,
        /// The rejected target.
        target: String,
    },

    /// The target could not be parsed as an IP address.
    #[error("invalid host address {0:?}")]
    InvalidHost(String),

    /// The target could not be parsed as an IPv4 CIDR range.
    #[error("invalid network range {0:?}")]
    InvalidNetwork(String),

    /// The range is wider than the scanner is willing to enumerate.
    #[error("network prefix /{prefix} is too wide, at most /{max} is scanned")]
    NetworkTooWide {
        /// Requested prefix length.
        prefix: u8,
        /// Widest accepted prefix length.
        max: u8,
    },

    /// Timeouts must be strictly positive.
    #[error("discovery job timeout must be greater than zero")]
    ZeroTimeout,
}

/// Reasons an inbound command payload is rejected.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The payload is not valid JSON.
    #[error("payload is not valid JSON")]
    Malformed(#[source] serde_json::Error),

    /// The payload is valid JSON but not an object.
    #[error("payload must be a JSON object")]
    NotAnObject,

    /// The payload object has no attributes.
    #[error("payload contains no attributes")]
    Empty,

    /// The attribute does not exist for the target's capability class.
    #[error("attribute {name:?} is not valid for a {class}")]
    UnknownAttribute {
        /// Offending attribute name.
        name: String,
        /// Capability class of the addressed device.
        class: CapabilityClass,
    },

    /// The attribute exists but is reported, not controlled.
    #[error("attribute {name:?} is read-only")]
    ReadOnly {
        /// Offending attribute name.
        name: String,
    },

    /// The value has the wrong JSON type.
    #[error("attribute {name:?} expects a {expected} value")]
    TypeMismatch {
        /// Offending attribute name.
        name: String,
        /// Type the schema declares.
        expected: AttributeKind,
    },

    /// The value lies outside the accepted range.
    #[error("attribute {name:?} must be within {min}..={max}")]
    OutOfRange {
        /// Offending attribute name.
        name: String,
        /// Lower bound (inclusive).
        min: f64,
        /// Upper bound (inclusive).
        max: f64,
    },
}

/// Failures when talking to a device through the protocol collaborator.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device could not be reached at all.
    #[error("device at {address} is unreachable")]
    Unreachable {
        /// Address that was contacted.
        address: IpAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The device did not answer in time.
    #[error("device did not answer within {after:?}")]
    Timeout {
        /// The bound that elapsed.
        after: Duration,
    },

    /// The device answered with something that could not be understood.
    #[error("protocol error: {reason}")]
    Protocol {
        /// Short description of what was wrong with the answer.
        reason: String,
    },

    /// The device understood the command and refused it.
    #[error("device rejected the command (code {code}): {message}")]
    Rejected {
        /// Error code reported by the device.
        code: i64,
        /// Message reported by the device.
        message: String,
    },
}

impl DeviceError {
    /// Shorthand for a [`DeviceError::Protocol`] failure.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }
}

impl BridgeError {
    /// Wrap any transport failure as a [`BridgeError::Transport`].
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_validation_error_into_bridge_error() {
        let err: BridgeError = ValidationError::EmptyIdentity.into();
        assert!(matches!(
            err,
            BridgeError::Validation(ValidationError::EmptyIdentity)
        ));
    }

    #[test]
    fn should_display_unknown_attribute_with_class() {
        let err = CommandError::UnknownAttribute {
            name: "brightness".to_string(),
            class: CapabilityClass::Plug,
        };
        assert_eq!(
            err.to_string(),
            "attribute \"brightness\" is not valid for a plug"
        );
    }

    #[test]
    fn should_display_timeout_with_duration() {
        let err = DeviceError::Timeout {
            after: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "device did not answer within 5s");
    }

    #[test]
    fn should_keep_source_of_transport_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = BridgeError::transport(io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
