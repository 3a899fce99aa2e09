//! Runtime parameters of the bridge core.
//!
//! Built by the binary from its configuration file; every bound the core
//! applies (intervals, thresholds, retry counts) comes from here rather than
//! from constants buried in the services.

use std::time::Duration;

use kasa_bridge_domain::discovery::DiscoveryJob;

/// Parameters shared by the discovery engine, polling loop and command handler.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// First topic level of every message (`kasa`).
    pub topic_prefix: String,
    /// Delay between two polling ticks.
    pub poll_interval: Duration,
    /// Delay between two discovery cycles.
    pub discovery_interval: Duration,
    /// Jobs run by every discovery cycle.
    pub discovery_jobs: Vec<DiscoveryJob>,
    /// Maximum in-flight probes of one network scan.
    pub scan_concurrency: usize,
    /// Consecutive fetch failures after which a device is evicted.
    pub failure_threshold: u32,
    /// Bound on every fetch and command call.
    pub request_timeout: Duration,
    /// Fetches made after a command before settling for what is observed.
    pub verify_attempts: u32,
    /// Pause between two verification fetches.
    pub verify_interval: Duration,
    /// Delay between two heartbeat messages.
    pub heartbeat_interval: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            topic_prefix: "kasa".to_string(),
            poll_interval: Duration::from_secs(60),
            discovery_interval: Duration::from_secs(120),
            discovery_jobs: vec![DiscoveryJob::broadcast(Duration::from_secs(5))],
            scan_concurrency: 32,
            failure_threshold: 3,
            request_timeout: Duration::from_secs(10),
            verify_attempts: 3,
            verify_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}
