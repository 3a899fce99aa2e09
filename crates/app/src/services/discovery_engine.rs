//! Discovery engine: run the configured jobs and merge their sightings into
//! the registry.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, FuturesUnordered, StreamExt as _};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use kasa_bridge_domain::device::DeviceDescriptor;
use kasa_bridge_domain::discovery::{DiscoveryJob, DiscoveryTarget, Ipv4Network};
use kasa_bridge_domain::error::DeviceError;
use kasa_bridge_domain::identity::DeviceIdentity;
use kasa_bridge_domain::time::now;

use crate::ports::{DeviceProtocol, ProbeTarget};
use crate::registry::{DeviceRegistry, Upserted};

/// Slack given to a probe on top of its own timeout before it is abandoned.
const PROBE_GRACE: Duration = Duration::from_secs(2);

/// Summary of one discovery cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub jobs_run: usize,
    pub jobs_failed: usize,
    /// Distinct identities sighted, hub children included.
    pub devices: usize,
    /// Identities that were not registered before this cycle.
    pub new_devices: Vec<DeviceIdentity>,
}

pub struct DiscoveryEngine<P> {
    registry: Arc<DeviceRegistry>,
    protocol: P,
    jobs: Vec<DiscoveryJob>,
    scan_concurrency: usize,
}

impl<P: DeviceProtocol> DiscoveryEngine<P> {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        protocol: P,
        jobs: Vec<DiscoveryJob>,
        scan_concurrency: usize,
    ) -> Self {
        Self {
            registry,
            protocol,
            jobs,
            scan_concurrency: scan_concurrency.max(1),
        }
    }

    /// Run every job concurrently and upsert each sighted identity once.
    ///
    /// Sightings are merged in completion order, so when two jobs report the
    /// same identity the one that finished last provides its fields.
    pub async fn run_cycle(&self) -> DiscoveryReport {
        let mut pending: FuturesUnordered<_> = self
            .jobs
            .iter()
            .map(move |job| async move { (job, self.run_job(job).await) })
            .collect();

        let mut report = DiscoveryReport {
            jobs_run: self.jobs.len(),
            ..DiscoveryReport::default()
        };
        let mut sightings: HashMap<DeviceIdentity, DeviceDescriptor> = HashMap::new();
        while let Some((job, result)) = pending.next().await {
            match result {
                Ok(found) => {
                    tracing::debug!(job = %job, devices = found.len(), "discovery job complete");
                    for descriptor in found.into_iter().flat_map(DeviceDescriptor::flatten) {
                        sightings.insert(descriptor.identity.clone(), descriptor);
                    }
                }
                Err(err) => {
                    report.jobs_failed += 1;
                    tracing::warn!(job = %job, error = %err, "discovery job failed");
                }
            }
        }

        report.devices = sightings.len();
        let seen_at = now();
        for descriptor in sightings.into_values() {
            if let Upserted::Inserted(device) = self.registry.upsert(descriptor, seen_at) {
                tracing::info!(
                    identity = %device.identity,
                    alias = %device.alias,
                    address = %device.address,
                    class = %device.capability_class,
                    "discovered new device"
                );
                report.new_devices.push(device.identity);
            }
        }
        report.new_devices.sort();
        tracing::info!(
            jobs = report.jobs_run,
            failed = report.jobs_failed,
            devices = report.devices,
            new = report.new_devices.len(),
            "discovery cycle complete"
        );
        report
    }

    async fn run_job(&self, job: &DiscoveryJob) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        match job.target() {
            DiscoveryTarget::Broadcast => self.probe(ProbeTarget::Broadcast, job.timeout()).await,
            DiscoveryTarget::Host(address) => {
                self.probe(ProbeTarget::Host(*address), job.timeout()).await
            }
            DiscoveryTarget::Network(network) => Ok(self.scan(network, job.timeout()).await),
        }
    }

    async fn probe(
        &self,
        target: ProbeTarget,
        timeout: Duration,
    ) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let bound = timeout + PROBE_GRACE;
        tokio::time::timeout(bound, self.protocol.discover(target, timeout))
            .await
            .unwrap_or(Err(DeviceError::Timeout { after: bound }))
    }

    /// Probe every host of `network`, at most `scan_concurrency` at a time.
    async fn scan(&self, network: &Ipv4Network, timeout: Duration) -> Vec<DeviceDescriptor> {
        tracing::debug!(%network, hosts = network.host_count(), "scanning network");
        stream::iter(network.hosts())
            .map(move |address| async move {
                let address = IpAddr::V4(address);
                match self.probe(ProbeTarget::Host(address), timeout).await {
                    Ok(found) => found,
                    Err(err) => {
                        tracing::trace!(%address, error = %err, "no device answered");
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(self.scan_concurrency)
            .flat_map(stream::iter)
            .collect()
            .await
    }

    /// Run a cycle every `interval` until `shutdown` flips to `true`.
    ///
    /// The first cycle runs one interval from now: the bridge already ran
    /// one eagerly at startup.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = interval.as_secs(), "discovery loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::info!("discovery loop stopped");
    }
}
