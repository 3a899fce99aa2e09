//! Command handler: apply `<prefix>/<device>/set` messages and confirm them
//! by observation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_stream::StreamExt as _;

use kasa_bridge_domain::attribute::Attributes;
use kasa_bridge_domain::device::Device;
use kasa_bridge_domain::error::{CommandError, DeviceError};
use kasa_bridge_domain::mapper::{TopicKind, decode_command, parse_topic};

use super::state_refresher::{RefreshOutcome, StateRefresher};
use crate::ports::{DeviceProtocol, InboundMessage, MessagePublisher, MessageStream};

/// How a command message ended.
#[derive(Debug)]
pub enum CommandOutcome {
    /// Every applied attribute was observed on the device, then published.
    Verified(Device),
    /// The device answered but did not (yet) reflect the command; its
    /// observed state was published anyway.
    Unconfirmed(Device),
    /// No fetch succeeded; nothing was published.
    Unreachable,
    /// The payload was invalid; nothing was sent.
    Rejected(CommandError),
    /// No registered device has this topic.
    UnknownDevice,
    /// Not a command topic.
    Ignored,
}

pub struct CommandHandler<P, B> {
    refresher: Arc<StateRefresher<P, B>>,
    verify_attempts: u32,
    verify_interval: Duration,
}

impl<P, B> CommandHandler<P, B>
where
    P: DeviceProtocol + 'static,
    B: MessagePublisher + 'static,
{
    pub fn new(
        refresher: Arc<StateRefresher<P, B>>,
        verify_attempts: u32,
        verify_interval: Duration,
    ) -> Self {
        Self {
            refresher,
            verify_attempts: verify_attempts.max(1),
            verify_interval,
        }
    }

    /// Decode, dispatch and verify one inbound message.
    #[tracing::instrument(skip_all, fields(topic = %message.topic))]
    pub async fn handle(&self, message: &InboundMessage) -> CommandOutcome {
        let prefix = self.refresher.topic_prefix();
        let Some((slug, TopicKind::Set)) = parse_topic(prefix, &message.topic) else {
            tracing::debug!("ignoring message outside the command topics");
            return CommandOutcome::Ignored;
        };
        let Some(device) = self.refresher.registry().find_by_slug(slug) else {
            tracing::debug!(slug, "command for unknown device dropped");
            return CommandOutcome::UnknownDevice;
        };
        let requested = match decode_command(device.capability_class, &message.payload) {
            Ok(requested) => requested,
            Err(err) => {
                tracing::warn!(identity = %device.identity, error = %err, "command rejected");
                return CommandOutcome::Rejected(err);
            }
        };

        let _guard = self.refresher.lock(&device.identity).await;
        // the device may have moved or left while we waited for the lock
        let Some(device) = self.refresher.registry().get(&device.identity) else {
            return CommandOutcome::UnknownDevice;
        };

        let (dispatched, applied) = match self.refresher.send(&device, &requested).await {
            Ok(applied) => {
                if applied.len() < requested.len() {
                    tracing::info!(
                        identity = %device.identity,
                        requested = requested.len(),
                        applied = applied.len(),
                        "device applied only part of the command"
                    );
                }
                (true, applied)
            }
            Err(err) => {
                tracing::warn!(identity = %device.identity, error = %err, "failed to send command");
                (false, Attributes::new())
            }
        };

        let (result, reflected) = self.observe(&device, &applied).await;
        match self.refresher.settle(&device, result).await {
            RefreshOutcome::Published(device) if dispatched && !applied.is_empty() && reflected => {
                tracing::debug!(identity = %device.identity, "command verified");
                CommandOutcome::Verified(device)
            }
            RefreshOutcome::Published(device) => {
                tracing::info!(identity = %device.identity, "command not confirmed by the device");
                CommandOutcome::Unconfirmed(device)
            }
            RefreshOutcome::Failed { .. } | RefreshOutcome::Evicted => CommandOutcome::Unreachable,
            RefreshOutcome::Unknown => CommandOutcome::UnknownDevice,
        }
    }

    /// Fetch until `applied` is reflected or the attempts run out.
    ///
    /// Returns the last successful fetch if any, else the last error.
    async fn observe(
        &self,
        device: &Device,
        applied: &Attributes,
    ) -> (Result<Attributes, DeviceError>, bool) {
        let mut last_observed = None;
        let mut last_error = None;
        for attempt in 1..=self.verify_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.verify_interval).await;
            }
            match self.refresher.fetch(device).await {
                Ok(observed) => {
                    let reflected = applied.iter().all(|(name, value)| {
                        observed
                            .get(name)
                            .is_some_and(|current| current.reflects(value))
                    });
                    if reflected {
                        return (Ok(observed), true);
                    }
                    tracing::debug!(identity = %device.identity, attempt, "command not reflected yet");
                    last_observed = Some(observed);
                }
                Err(err) => {
                    tracing::debug!(identity = %device.identity, attempt, error = %err, "verification fetch failed");
                    last_error = Some(err);
                }
            }
        }
        match (last_observed, last_error) {
            (Some(observed), _) => (Ok(observed), false),
            (None, Some(err)) => (Err(err), false),
            (None, None) => (Err(DeviceError::protocol("no verification fetch made")), false),
        }
    }

    /// Handle every message of `messages` on its own task until `shutdown`
    /// flips to `true` or the stream ends, then wait for in-flight commands.
    pub async fn run(
        self: Arc<Self>,
        mut messages: MessageStream,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tasks = JoinSet::new();
        tracing::info!("command handler started");
        loop {
            tokio::select! {
                message = messages.next() => {
                    let Some(message) = message else {
                        tracing::warn!("command subscription closed");
                        break;
                    };
                    let handler = Arc::clone(&self);
                    tasks.spawn(async move {
                        handler.handle(&message).await;
                    });
                }
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            while tasks.try_join_next().is_some() {}
        }
        while tasks.join_next().await.is_some() {}
        tracing::info!("command handler stopped");
    }
}
