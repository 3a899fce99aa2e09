//! In-process message bus backed by a tokio broadcast channel.
//!
//! Stands in for a broker when the bridge runs without one (tests, demos):
//! every published message is delivered to each subscription whose filter
//! matches, exactly like a broker would route it.

use std::future::Future;

use tokio::sync::broadcast;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;

use kasa_bridge_domain::error::BridgeError;

use crate::ports::message_bus::topic_matches;
use crate::ports::{
    InboundMessage, MessagePublisher, MessageStream, MessageSubscriber, OutboundMessage,
};

/// In-process bus using a tokio [`broadcast`] channel.
///
/// Publishing succeeds even when there are no active subscribers
/// (the message is simply dropped).
pub struct InProcessBus {
    sender: broadcast::Sender<OutboundMessage>,
}

impl InProcessBus {
    /// Create a new bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Observe every message published *after* this call, unfiltered.
    #[must_use]
    pub fn watch(&self) -> broadcast::Receiver<OutboundMessage> {
        self.sender.subscribe()
    }

    /// Deliver a message as if an external client had published it.
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        let _ = self.sender.send(OutboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        });
    }
}

impl MessagePublisher for InProcessBus {
    fn publish(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        // send only fails when nobody is subscribed.
        let _ = self.sender.send(message);
        async { Ok(()) }
    }
}

impl MessageSubscriber for InProcessBus {
    fn subscribe(
        &self,
        filter: &str,
    ) -> impl Future<Output = Result<MessageStream, BridgeError>> + Send {
        let filter = filter.to_string();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| {
            let message = item.ok()?;
            topic_matches(&filter, &message.topic).then(|| InboundMessage {
                topic: message.topic,
                payload: message.payload,
            })
        });
        let stream: MessageStream = Box::pin(stream);
        async move { Ok(stream) }
    }
}
