//! # kasa-bridge-adapter-mqtt
//!
//! MQTT adapter: connects the bridge to a broker.
//!
//! ## Responsibilities
//! - Keep a connection to the broker, reconnecting with backoff
//! - Publish device state and bridge presence messages
//! - Register the offline status as the session's last will
//! - Deliver inbound messages to every subscription whose filter matches,
//!   re-subscribing after each reconnection
//!
//! ## Dependency rule
//! Same as other adapters: depends on `kasa-bridge-app` and `kasa-bridge-domain`.

pub mod config;
pub mod error;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::broadcast;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;

use kasa_bridge_app::ports::message_bus::topic_matches;
use kasa_bridge_app::ports::{
    InboundMessage, MessagePublisher, MessageStream, MessageSubscriber, OutboundMessage,
};
use kasa_bridge_domain::error::BridgeError;

pub use self::config::MqttConfig;
pub use self::error::MqttError;

const RECONNECT_BACKOFF_START: Duration = Duration::from_secs(3);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(60);
/// Outgoing requests queued while the connection is down.
const REQUEST_CAPACITY: usize = 64;

/// Broker session shared by the publisher and subscriber ports.
pub struct MqttBus {
    client: AsyncClient,
    inbound: broadcast::Sender<InboundMessage>,
    filters: Arc<Mutex<Vec<String>>>,
}

impl MqttBus {
    /// Start a session and spawn its event loop on the current runtime.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background and is retried until it succeeds.
    #[must_use]
    pub fn connect(config: &MqttConfig, last_will: Option<&OutboundMessage>) -> Self {
        let options = options(config, last_will);
        tracing::info!(
            host = %config.broker_host,
            port = config.broker_port,
            client_id = %config.client_id,
            "connecting to MQTT broker"
        );
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound, _) = broadcast::channel(config.channel_capacity.max(1));
        let filters = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(drive(
            event_loop,
            client.clone(),
            Arc::clone(&filters),
            inbound.clone(),
        ));
        Self {
            client,
            inbound,
            filters,
        }
    }

    /// Close the session cleanly; the broker then discards the last will.
    pub async fn disconnect(&self) {
        if let Err(err) = self.client.disconnect().await {
            tracing::warn!(error = %err, "failed to disconnect from MQTT broker");
        }
    }
}

fn options(config: &MqttConfig, last_will: Option<&OutboundMessage>) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
    options.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs.max(5))));
    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }
    if let Some(will) = last_will {
        options.set_last_will(LastWill::new(
            &will.topic,
            will.payload.clone(),
            QoS::AtLeastOnce,
            will.retain,
        ));
    }
    options
}

/// Poll the event loop forever, reconnecting with capped exponential backoff.
async fn drive(
    mut event_loop: EventLoop,
    client: AsyncClient,
    filters: Arc<Mutex<Vec<String>>>,
    inbound: broadcast::Sender<InboundMessage>,
) {
    let mut backoff = RECONNECT_BACKOFF_START;
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("connected to MQTT broker");
                backoff = RECONNECT_BACKOFF_START;
                let filters = filters
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for filter in filters {
                    if let Err(err) = client.try_subscribe(&filter, QoS::AtLeastOnce) {
                        tracing::warn!(%filter, error = %err, "failed to restore subscription");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                // nobody listening is not an error
                let _ = inbound.send(InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::info!("disconnected from MQTT broker");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    retry_in_secs = backoff.as_secs(),
                    "MQTT connection lost"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
            }
        }
    }
}

impl MessagePublisher for MqttBus {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BridgeError> {
        self.client
            .try_publish(
                message.topic,
                QoS::AtLeastOnce,
                message.retain,
                message.payload,
            )
            .map_err(|err| MqttError::from(err).into_domain())
    }
}

impl MessageSubscriber for MqttBus {
    async fn subscribe(&self, filter: &str) -> Result<MessageStream, BridgeError> {
        let receiver = self.inbound.subscribe();
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|err| MqttError::from(err).into_domain())?;
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(filter.to_string());

        let filter = filter.to_string();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| match item {
            Ok(message) => topic_matches(&filter, &message.topic).then_some(message),
            Err(err) => {
                tracing::warn!(error = %err, "inbound MQTT messages dropped");
                None
            }
        });
        Ok(Box::pin(stream))
    }
}
