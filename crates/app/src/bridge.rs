//! Bridge supervisor: wires the services together and runs them until
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use kasa_bridge_domain::mapper::command_filter;

use crate::ports::{DeviceProtocol, MessagePublisher, MessageStream, MessageSubscriber};
use crate::registry::DeviceRegistry;
use crate::services::command_handler::CommandHandler;
use crate::services::discovery_engine::DiscoveryEngine;
use crate::services::polling_loop::PollingLoop;
use crate::services::presence::Presence;
use crate::services::state_refresher::StateRefresher;
use crate::settings::BridgeSettings;

const SUBSCRIBE_BACKOFF_START: Duration = Duration::from_secs(3);
const SUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// One running bridge between a device protocol and a message bus.
pub struct Bridge<P, B> {
    settings: BridgeSettings,
    registry: Arc<DeviceRegistry>,
    discovery: DiscoveryEngine<P>,
    polling: PollingLoop<P, B>,
    commands: Arc<CommandHandler<P, B>>,
    presence: Presence<B>,
    bus: B,
}

impl<P, B> Bridge<P, B>
where
    P: DeviceProtocol + Clone + 'static,
    B: MessagePublisher + MessageSubscriber + Clone + 'static,
{
    pub fn new(settings: BridgeSettings, protocol: P, bus: B) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let refresher = Arc::new(StateRefresher::new(
            Arc::clone(&registry),
            protocol.clone(),
            bus.clone(),
            settings.topic_prefix.clone(),
            settings.failure_threshold,
            settings.request_timeout,
        ));
        Self {
            discovery: DiscoveryEngine::new(
                Arc::clone(&registry),
                protocol,
                settings.discovery_jobs.clone(),
                settings.scan_concurrency,
            ),
            polling: PollingLoop::new(Arc::clone(&refresher)),
            commands: Arc::new(CommandHandler::new(
                refresher,
                settings.verify_attempts,
                settings.verify_interval,
            )),
            presence: Presence::new(bus.clone(), settings.topic_prefix.clone()),
            registry,
            settings,
            bus,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Run until `shutdown` flips to `true`.
    ///
    /// Announces the bridge and runs one discovery cycle, then drives
    /// discovery, polling, commands and the heartbeat side by side. The
    /// command subscription is retried in the background; the other loops
    /// do not wait for it. In-flight commands finish before the offline
    /// status goes out.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            prefix = %self.settings.topic_prefix,
            jobs = self.settings.discovery_jobs.len(),
            "bridge starting"
        );
        self.presence.announce_online().await;
        self.discovery.run_cycle().await;

        let commands = async {
            if let Some(stream) = self.subscribe(shutdown.clone()).await {
                Arc::clone(&self.commands)
                    .run(stream, shutdown.clone())
                    .await;
            }
        };
        tokio::join!(
            commands,
            self.discovery
                .run(self.settings.discovery_interval, shutdown.clone()),
            self.polling
                .run(self.settings.poll_interval, shutdown.clone()),
            self.presence
                .run(self.settings.heartbeat_interval, shutdown.clone()),
        );

        self.presence.announce_offline().await;
        tracing::info!(devices = self.registry.len(), "bridge stopped");
    }

    /// Subscribe to the command topics, retrying with backoff.
    ///
    /// Returns `None` when shutdown is requested first.
    async fn subscribe(&self, mut shutdown: watch::Receiver<bool>) -> Option<MessageStream> {
        let filter = command_filter(&self.settings.topic_prefix);
        let mut backoff = SUBSCRIBE_BACKOFF_START;
        loop {
            match self.bus.subscribe(&filter).await {
                Ok(stream) => {
                    tracing::info!(%filter, "subscribed to command topics");
                    return Some(stream);
                }
                Err(err) => {
                    tracing::warn!(
                        %filter,
                        error = %err,
                        retry_in_secs = backoff.as_secs(),
                        "failed to subscribe to command topics"
                    );
                }
            }
            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => return None,
            }
            if *shutdown.borrow() {
                return None;
            }
            backoff = (backoff * 2).min(SUBSCRIBE_BACKOFF_MAX);
        }
    }
}

#[cfg(test)]
mod tests {
    use kasa_bridge_domain::attribute::AttributeValue;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use kasa_bridge_domain::error::BridgeError;

    use super::*;
    use crate::in_process_bus::InProcessBus;
    use crate::ports::OutboundMessage;
    use crate::testing::{FakeProtocol, identity};

    /// Bus that publishes normally but refuses every subscription.
    struct RefusingBus {
        inner: InProcessBus,
        attempts: AtomicUsize,
    }

    impl MessagePublisher for RefusingBus {
        async fn publish(&self, message: OutboundMessage) -> Result<(), BridgeError> {
            self.inner.publish(message).await
        }
    }

    impl MessageSubscriber for RefusingBus {
        async fn subscribe(&self, _filter: &str) -> Result<MessageStream, BridgeError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(BridgeError::transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "broker unavailable",
            )))
        }
    }

    fn settings() -> BridgeSettings {
        BridgeSettings {
            poll_interval: Duration::from_millis(20),
            discovery_interval: Duration::from_millis(50),
            verify_interval: Duration::from_millis(5),
            heartbeat_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(1),
            ..BridgeSettings::default()
        }
    }

    #[tokio::test]
    async fn should_discover_poll_command_and_announce() {
        let protocol = Arc::new(FakeProtocol::default());
        protocol.add_plug("8006AAAA11112222", "Desk Lamp", 10);
        let bus = Arc::new(InProcessBus::new(256));
        let mut rx = bus.watch();
        let bridge = Arc::new(Bridge::new(settings(), Arc::clone(&protocol), Arc::clone(&bus)));
        let (tx, shutdown) = watch::channel(false);

        let task = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.run(shutdown).await })
        };

        let online = rx.recv().await.unwrap();
        assert_eq!(online.topic, "kasa/_bridge/status");

        // commands subscribe before the first poll, so the state publish means the
        // subscription is live
        loop {
            let message = rx.recv().await.unwrap();
            if message.topic == "kasa/desk_lamp_11112222/state" {
                break;
            }
        }
        bus.inject("kasa/desk_lamp_11112222/set", r#"{"state":true}"#);
        loop {
            let message = rx.recv().await.unwrap();
            if message.topic != "kasa/desk_lamp_11112222/state" {
                continue;
            }
            let payload: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
            if payload["state"] == serde_json::json!(true) {
                break;
            }
        }

        tx.send(true).unwrap();
        task.await.unwrap();

        let device = bridge.registry().get(&identity("8006AAAA11112222")).unwrap();
        assert_eq!(device.attribute("state"), Some(&AttributeValue::Bool(true)));
        let mut last = None;
        while let Ok(message) = rx.try_recv() {
            last = Some(message);
        }
        let last = last.unwrap();
        assert_eq!(last.topic, "kasa/_bridge/status");
        let payload: serde_json::Value = serde_json::from_slice(&last.payload).unwrap();
        assert_eq!(payload["status"], "offline");
    }

    #[tokio::test]
    async fn should_rediscover_device_after_eviction() {
        let protocol = Arc::new(FakeProtocol::default());
        protocol.add_plug("8006AAAA11112222", "Desk Lamp", 10);
        let bus = Arc::new(InProcessBus::new(256));
        let bridge = Bridge::new(
            BridgeSettings {
                failure_threshold: 1,
                ..settings()
            },
            Arc::clone(&protocol),
            Arc::clone(&bus),
        );
        bridge.discovery.run_cycle().await;
        assert_eq!(bridge.registry().len(), 1);

        protocol.set_reachable("8006AAAA11112222", false);
        bridge.polling.tick().await;
        assert!(bridge.registry().is_empty());

        protocol.set_reachable("8006AAAA11112222", true);
        let report = bridge.discovery.run_cycle().await;
        assert_eq!(report.new_devices, vec![identity("8006AAAA11112222")]);
        let device = bridge.registry().get(&identity("8006AAAA11112222")).unwrap();
        assert_eq!(device.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn should_keep_polling_while_subscription_is_refused() {
        let protocol = Arc::new(FakeProtocol::default());
        protocol.add_plug("8006AAAA11112222", "Desk Lamp", 10);
        let bus = Arc::new(RefusingBus {
            inner: InProcessBus::new(256),
            attempts: AtomicUsize::new(0),
        });
        let mut rx = bus.inner.watch();
        let bridge = Arc::new(Bridge::new(settings(), Arc::clone(&protocol), Arc::clone(&bus)));
        let (tx, shutdown) = watch::channel(false);

        let task = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.run(shutdown).await })
        };

        tokio::time::timeout(Duration::from_secs(1), async {
            let mut states = 0;
            while states < 2 {
                let message = rx.recv().await.unwrap();
                if message.topic == "kasa/desk_lamp_11112222/state" {
                    states += 1;
                }
            }
        })
        .await
        .expect("state was not published without a command subscription");
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("bridge did not stop while retrying the subscription")
            .unwrap();
    }
}
