//! Message bus port: publish state, receive commands.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kasa_bridge_domain::error::BridgeError;
use tokio_stream::Stream;

/// A message the bridge sends to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Ask the broker to keep this as the topic's last value.
    pub retain: bool,
}

impl OutboundMessage {
    /// Serialize a JSON payload for `topic`.
    #[must_use]
    pub fn json(topic: impl Into<String>, payload: &serde_json::Value, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.to_string().into_bytes(),
            retain,
        }
    }
}

/// A message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Stream of messages matching a subscription filter.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Publishes messages to the bus.
///
/// Failures are transient: the transport reconnects on its own and the
/// caller simply tries again on its next cycle.
pub trait MessagePublisher: Send + Sync {
    fn publish(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

/// Subscribes to topic filters (`+` and `#` wildcards as in MQTT).
pub trait MessageSubscriber: Send + Sync {
    /// Subscribe to `filter`. The subscription survives reconnections.
    fn subscribe(
        &self,
        filter: &str,
    ) -> impl Future<Output = Result<MessageStream, BridgeError>> + Send;
}

impl<T: MessagePublisher> MessagePublisher for Arc<T> {
    fn publish(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        (**self).publish(message)
    }
}

impl<T: MessageSubscriber> MessageSubscriber for Arc<T> {
    fn subscribe(
        &self,
        filter: &str,
    ) -> impl Future<Output = Result<MessageStream, BridgeError>> + Send {
        (**self).subscribe(filter)
    }
}

/// Whether `topic` matches the MQTT-style `filter`.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
