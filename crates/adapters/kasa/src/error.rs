//! Kasa adapter error types.

use std::net::IpAddr;
use std::time::Duration;

use kasa_bridge_domain::error::DeviceError;

/// Errors specific to the Kasa protocol adapter.
#[derive(Debug, thiserror::Error)]
pub enum KasaError {
    /// Socket-level failure talking to `address`.
    #[error("i/o error talking to {address}")]
    Io {
        address: IpAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("no answer within {after:?}")]
    Timeout { after: Duration },

    /// The decrypted answer was not valid JSON.
    #[error("failed to parse device answer")]
    Json(#[source] serde_json::Error),

    /// The answer parsed but lacked something we need.
    #[error("unexpected answer: {0}")]
    Unexpected(String),

    /// A frame announced more bytes than we accept.
    #[error("frame of {len} bytes exceeds the limit")]
    FrameTooLarge { len: usize },

    /// The device reported a non-zero `err_code`.
    #[error("device error {code}: {message}")]
    Rejected { code: i64, message: String },

    #[error("unsupported device type {0:?}")]
    Unsupported(String),

    /// The device at the address is not the one we asked for.
    #[error("expected device {expected} at this address, found {found}")]
    IdentityMismatch { expected: String, found: String },
}

impl KasaError {
    /// Convert into a [`DeviceError`] for propagation across port boundaries.
    pub fn into_domain(self) -> DeviceError {
        match self {
            Self::Io { address, source } => DeviceError::Unreachable { address, source },
            Self::Timeout { after } => DeviceError::Timeout { after },
            Self::Rejected { code, message } => DeviceError::Rejected { code, message },
            other => DeviceError::protocol(other.to_string()),
        }
    }
}

impl From<KasaError> for DeviceError {
    fn from(err: KasaError) -> Self {
        err.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn should_map_io_error_to_unreachable() {
        let err: DeviceError = KasaError::Io {
            address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        }
        .into();
        assert!(matches!(err, DeviceError::Unreachable { .. }));
    }

    #[test]
    fn should_keep_device_error_code() {
        let err: DeviceError = KasaError::Rejected {
            code: -2,
            message: "member not support".into(),
        }
        .into();
        assert!(matches!(err, DeviceError::Rejected { code: -2, .. }));
    }

    #[test]
    fn should_describe_other_failures_as_protocol_errors() {
        let err: DeviceError = KasaError::Unsupported("IOT.SMARTCAM".into()).into();
        let DeviceError::Protocol { reason } = err else {
            panic!("expected protocol error");
        };
        assert_eq!(reason, r#"unsupported device type "IOT.SMARTCAM""#);
    }
}
