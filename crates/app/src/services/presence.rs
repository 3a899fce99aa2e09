//! Bridge presence: retained online/offline status and a periodic heartbeat.

use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use kasa_bridge_domain::time::{format, now};

use crate::ports::{MessagePublisher, OutboundMessage};

/// Topic level reserved for the bridge itself; never a device slug.
const BRIDGE_LEVEL: &str = "_bridge";

#[must_use]
pub fn status_topic(prefix: &str) -> String {
    format!("{prefix}/{BRIDGE_LEVEL}/status")
}

#[must_use]
pub fn heartbeat_topic(prefix: &str) -> String {
    format!("{prefix}/{BRIDGE_LEVEL}/heartbeat")
}

/// Offline status for the broker to publish if the bridge vanishes.
///
/// Carries no timestamp: the broker sends it long after it was registered.
#[must_use]
pub fn last_will(prefix: &str) -> OutboundMessage {
    OutboundMessage::json(status_topic(prefix), &json!({ "status": "offline" }), true)
}

pub struct Presence<B> {
    publisher: B,
    prefix: String,
}

impl<B: MessagePublisher> Presence<B> {
    pub fn new(publisher: B, prefix: impl Into<String>) -> Self {
        Self {
            publisher,
            prefix: prefix.into(),
        }
    }

    pub async fn announce_online(&self) {
        self.announce("online").await;
    }

    pub async fn announce_offline(&self) {
        self.announce("offline").await;
    }

    async fn announce(&self, status: &str) {
        let payload = json!({ "status": status, "ts": format(now()) });
        let message = OutboundMessage::json(status_topic(&self.prefix), &payload, true);
        match self.publisher.publish(message).await {
            Ok(()) => tracing::info!(status, "bridge status published"),
            Err(err) => tracing::warn!(status, error = %err, "failed to publish bridge status"),
        }
    }

    async fn heartbeat(&self) {
        let payload = json!({ "ts": format(now()) });
        let message = OutboundMessage::json(heartbeat_topic(&self.prefix), &payload, false);
        if let Err(err) = self.publisher.publish(message).await {
            tracing::debug!(error = %err, "failed to publish heartbeat");
        }
    }

    /// Send a heartbeat every `interval` until `shutdown` flips to `true`.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.heartbeat().await,
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
    }
}
