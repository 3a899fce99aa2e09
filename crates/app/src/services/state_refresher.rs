//! State refresher: the single fetch-and-publish path.
//!
//! Both the polling loop (on every tick) and the command handler (after a
//! command) go through [`StateRefresher`], so failure counting, eviction
//! and publication behave identically for both.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;

use kasa_bridge_domain::attribute::Attributes;
use kasa_bridge_domain::device::Device;
use kasa_bridge_domain::error::DeviceError;
use kasa_bridge_domain::identity::DeviceIdentity;
use kasa_bridge_domain::mapper::{TopicKind, encode_state, topic_for};
use kasa_bridge_domain::time::now;

use crate::ports::{DeviceProtocol, MessagePublisher, OutboundMessage};
use crate::registry::DeviceRegistry;

/// Per-device async locks.
///
/// Holding a device's lock across fetch and publish keeps its publications
/// causally ordered: a post-command snapshot can never be overtaken by an
/// older polling snapshot of the same device.
#[derive(Debug, Default)]
pub struct DeviceLocks {
    locks: Mutex<HashMap<DeviceIdentity, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeviceLocks {
    /// Wait for exclusive access to `identity`.
    pub async fn acquire(&self, identity: &DeviceIdentity) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(identity.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the lock of an evicted device.
    pub fn forget(&self, identity: &DeviceIdentity) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
    }
}

/// What happened to one device during a refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// State fetched, merged and published.
    Published(Device),
    /// Fetch failed; the device stays registered for now.
    Failed { failures: u32 },
    /// Fetch failed once too often; the device left the registry.
    Evicted,
    /// The device is not (or no longer) registered.
    Unknown,
}

/// Fetches device state, records the result in the registry and publishes it.
pub struct StateRefresher<P, B> {
    registry: Arc<DeviceRegistry>,
    protocol: P,
    publisher: B,
    locks: DeviceLocks,
    topic_prefix: String,
    failure_threshold: u32,
    request_timeout: Duration,
}

impl<P, B> StateRefresher<P, B>
where
    P: DeviceProtocol,
    B: MessagePublisher,
{
    pub fn new(
        registry: Arc<DeviceRegistry>,
        protocol: P,
        publisher: B,
        topic_prefix: impl Into<String>,
        failure_threshold: u32,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            protocol,
            publisher,
            locks: DeviceLocks::default(),
            topic_prefix: topic_prefix.into(),
            failure_threshold: failure_threshold.max(1),
            request_timeout,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// Take the device's lock; see [`DeviceLocks`].
    pub async fn lock(&self, identity: &DeviceIdentity) -> OwnedMutexGuard<()> {
        self.locks.acquire(identity).await
    }

    /// Fetch, record and publish the state of one device.
    #[tracing::instrument(skip(self), fields(identity = %identity))]
    pub async fn refresh(&self, identity: &DeviceIdentity) -> RefreshOutcome {
        let _guard = self.lock(identity).await;
        let Some(device) = self.registry.get(identity) else {
            return RefreshOutcome::Unknown;
        };
        let result = self.fetch(&device).await;
        self.settle(&device, result).await
    }

    /// One bounded state fetch, without touching the registry.
    pub async fn fetch(&self, device: &Device) -> Result<Attributes, DeviceError> {
        let call = self.protocol.fetch_state(device.address, &device.identity);
        tokio::time::timeout(self.request_timeout, call)
            .await
            .unwrap_or(Err(DeviceError::Timeout {
                after: self.request_timeout,
            }))
    }

    /// One bounded command call, returning the applied subset.
    pub async fn send(
        &self,
        device: &Device,
        attributes: &Attributes,
    ) -> Result<Attributes, DeviceError> {
        let call = self
            .protocol
            .send_command(device.address, &device.identity, attributes);
        tokio::time::timeout(self.request_timeout, call)
            .await
            .unwrap_or(Err(DeviceError::Timeout {
                after: self.request_timeout,
            }))
    }

    /// Record a fetch result: publish on success, count (and maybe evict)
    /// on failure.
    ///
    /// Callers must hold the device's lock.
    pub async fn settle(
        &self,
        device: &Device,
        result: Result<Attributes, DeviceError>,
    ) -> RefreshOutcome {
        match result {
            Ok(attributes) => {
                let Some(updated) = self
                    .registry
                    .record_success(&device.identity, attributes, now())
                else {
                    return RefreshOutcome::Unknown;
                };
                self.publish_state(&updated).await;
                RefreshOutcome::Published(updated)
            }
            Err(err) => self.record_failure(device, &err),
        }
    }

    fn record_failure(&self, device: &Device, err: &DeviceError) -> RefreshOutcome {
        let Some(failures) = self.registry.record_failure(&device.identity) else {
            return RefreshOutcome::Unknown;
        };
        tracing::warn!(
            identity = %device.identity,
            alias = %device.alias,
            address = %device.address,
            failures,
            error = %err,
            "failed to fetch device state"
        );
        if failures < self.failure_threshold {
            return RefreshOutcome::Failed { failures };
        }
        if self
            .registry
            .evict_failing(&device.identity, self.failure_threshold)
            .is_none()
        {
            return RefreshOutcome::Failed { failures };
        }
        self.locks.forget(&device.identity);
        tracing::info!(
            identity = %device.identity,
            alias = %device.alias,
            failures,
            "device evicted until it is rediscovered"
        );
        RefreshOutcome::Evicted
    }

    async fn publish_state(&self, device: &Device) {
        let topic = topic_for(&self.topic_prefix, device, TopicKind::State);
        let message = OutboundMessage::json(topic, &encode_state(device), true);
        if let Err(err) = self.publisher.publish(message).await {
            tracing::warn!(identity = %device.identity, error = %err, "failed to publish device state");
        }
    }
}
