//! MQTT adapter error types.

use kasa_bridge_domain::error::BridgeError;

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// The rumqttc client could not queue the request.
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),
}

impl MqttError {
    /// Convert into a [`BridgeError::Transport`] for propagation across port
    /// boundaries.
    pub fn into_domain(self) -> BridgeError {
        BridgeError::transport(self)
    }
}

impl From<MqttError> for BridgeError {
    fn from(err: MqttError) -> Self {
        err.into_domain()
    }
}

impl From<rumqttc::ClientError> for MqttError {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Client(err)
    }
}

#[cfg(test)]
mod tests {
    use rumqttc::{Request, Unsubscribe};

    use super::*;

    fn client_error() -> rumqttc::ClientError {
        rumqttc::ClientError::TryRequest(Request::Unsubscribe(Unsubscribe::new("kasa/+/set")))
    }

    #[test]
    fn should_display_client_error() {
        let err = MqttError::from(client_error());
        assert_eq!(err.to_string(), "MQTT client error");
    }

    #[test]
    fn should_convert_to_transport_error() {
        let err: BridgeError = MqttError::from(client_error()).into();
        assert!(matches!(err, BridgeError::Transport(_)));
    }
}
