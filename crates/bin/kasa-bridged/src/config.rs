//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `kasa-bridge.toml` in the working directory, or at the path in
//! `KASA_BRIDGE_CONFIG`. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use kasa_bridge_adapter_kasa::KasaConfig;
use kasa_bridge_adapter_mqtt::MqttConfig;
use kasa_bridge_app::settings::BridgeSettings;
use kasa_bridge_domain::discovery::{DiscoveryJob, DiscoveryKind};
use kasa_bridge_domain::error::ValidationError;

const DEFAULT_PATH: &str = "kasa-bridge.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection.
    pub mqtt: MqttConfig,
    /// Core timings and thresholds.
    pub bridge: BridgeConfig,
    /// Discovery jobs, run in this order every cycle.
    pub discovery_jobs: Vec<DiscoveryJobConfig>,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Which device network to talk to.
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub topic_prefix: String,
    pub poll_interval_secs: u64,
    pub discovery_interval_secs: u64,
    /// Consecutive failed fetches before a device is dropped.
    pub failure_threshold: u32,
    pub request_timeout_secs: u64,
    /// Fetches made after a command to confirm it took effect.
    pub verify_attempts: u32,
    pub verify_interval_ms: u64,
    pub heartbeat_interval_secs: u64,
    /// Probes in flight during a network scan.
    pub scan_concurrency: usize,
    /// Send `READY=1` and `WATCHDOG=1` (every heartbeat) to systemd.
    pub systemd_notify: bool,
}

/// One `[[discovery_jobs]]` table.
#[derive(Debug, Deserialize)]
pub struct DiscoveryJobConfig {
    #[serde(rename = "type")]
    pub kind: JobKind,
    /// Address for `host`, CIDR range for `network`, absent for `broadcast`.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "DiscoveryJobConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Broadcast,
    Host,
    Network,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub kind: ProtocolKind,
    /// Kasa client settings, used when `kind = "kasa"`.
    pub kasa: KasaConfig,
}

/// Device network the bridge drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Real devices on the LAN.
    #[default]
    Kasa,
    /// The built-in simulated network.
    Virtual,
}

impl Config {
    /// Load configuration from the config file (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("KASA_BRIDGE_CONFIG")
            .map_or_else(|| PathBuf::from(DEFAULT_PATH), PathBuf::from);
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("KASA_BRIDGE_MQTT_HOST") {
            self.mqtt.broker_host = val;
        }
        if let Some(val) = var("KASA_BRIDGE_MQTT_PORT")
            && let Ok(port) = val.parse()
        {
            self.mqtt.broker_port = port;
        }
        if let Some(val) = var("KASA_BRIDGE_MQTT_USER") {
            self.mqtt.username = Some(val);
        }
        if let Some(val) = var("KASA_BRIDGE_MQTT_PASSWORD") {
            self.mqtt.password = Some(val);
        }
        if let Some(val) = var("KASA_BRIDGE_KASA_USER") {
            self.protocol.kasa.username = Some(val);
        }
        if let Some(val) = var("KASA_BRIDGE_KASA_PASSWORD") {
            self.protocol.kasa.password = Some(val);
        }
        if let Some(val) = var("KASA_BRIDGE_POLL_INTERVAL")
            && let Ok(secs) = val.parse()
        {
            self.bridge.poll_interval_secs = secs;
        }
        if let Some(val) = var("KASA_BRIDGE_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker_port == 0 {
            return Err(ConfigError::Validation(
                "mqtt.broker_port must be non-zero".to_string(),
            ));
        }
        let prefix = &self.bridge.topic_prefix;
        if prefix.is_empty() || prefix.contains(['/', '+', '#']) {
            return Err(ConfigError::Validation(format!(
                "bridge.topic_prefix {prefix:?} must be a single topic level"
            )));
        }
        let positive = [
            ("bridge.poll_interval_secs", self.bridge.poll_interval_secs),
            (
                "bridge.discovery_interval_secs",
                self.bridge.discovery_interval_secs,
            ),
            ("bridge.request_timeout_secs", self.bridge.request_timeout_secs),
            (
                "bridge.heartbeat_interval_secs",
                self.bridge.heartbeat_interval_secs,
            ),
            ("bridge.failure_threshold", self.bridge.failure_threshold.into()),
            ("bridge.verify_attempts", self.bridge.verify_attempts.into()),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Validation(format!("{name} must be non-zero")));
        }
        if self.bridge.scan_concurrency == 0 {
            return Err(ConfigError::Validation(
                "bridge.scan_concurrency must be non-zero".to_string(),
            ));
        }
        let kasa = &self.protocol.kasa;
        if kasa.username.is_some() != kasa.password.is_some() {
            return Err(ConfigError::Validation(
                "protocol.kasa.username and protocol.kasa.password must be set together"
                    .to_string(),
            ));
        }
        self.discovery_jobs()?;
        Ok(())
    }

    /// Configured jobs, or a single broadcast job when none are declared.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Job`] for the first job that does not validate.
    pub fn discovery_jobs(&self) -> Result<Vec<DiscoveryJob>, ConfigError> {
        if self.discovery_jobs.is_empty() {
            return Ok(vec![DiscoveryJob::broadcast(Duration::from_secs(
                DiscoveryJobConfig::default_timeout_secs(),
            ))]);
        }
        self.discovery_jobs
            .iter()
            .enumerate()
            .map(|(index, job)| {
                job.build()
                    .map_err(|source| ConfigError::Job { index, source })
            })
            .collect()
    }

    /// Runtime parameters handed to the bridge core.
    ///
    /// # Errors
    ///
    /// Same as [`discovery_jobs`](Self::discovery_jobs).
    pub fn bridge_settings(&self) -> Result<BridgeSettings, ConfigError> {
        let bridge = &self.bridge;
        Ok(BridgeSettings {
            topic_prefix: bridge.topic_prefix.clone(),
            poll_interval: Duration::from_secs(bridge.poll_interval_secs),
            discovery_interval: Duration::from_secs(bridge.discovery_interval_secs),
            discovery_jobs: self.discovery_jobs()?,
            scan_concurrency: bridge.scan_concurrency,
            failure_threshold: bridge.failure_threshold,
            request_timeout: Duration::from_secs(bridge.request_timeout_secs),
            verify_attempts: bridge.verify_attempts,
            verify_interval: Duration::from_millis(bridge.verify_interval_ms),
            heartbeat_interval: Duration::from_secs(bridge.heartbeat_interval_secs),
        })
    }
}

impl DiscoveryJobConfig {
    fn default_timeout_secs() -> u64 {
        5
    }

    fn build(&self) -> Result<DiscoveryJob, ValidationError> {
        let kind = match self.kind {
            JobKind::Broadcast => DiscoveryKind::Broadcast,
            JobKind::Host => DiscoveryKind::Host,
            JobKind::Network => DiscoveryKind::Network,
        };
        DiscoveryJob::new(
            kind,
            self.target.as_deref(),
            Duration::from_secs(self.timeout_secs),
        )
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let settings = BridgeSettings::default();
        Self {
            topic_prefix: settings.topic_prefix,
            poll_interval_secs: settings.poll_interval.as_secs(),
            discovery_interval_secs: settings.discovery_interval.as_secs(),
            failure_threshold: settings.failure_threshold,
            request_timeout_secs: settings.request_timeout.as_secs(),
            verify_attempts: settings.verify_attempts,
            verify_interval_ms: 500,
            heartbeat_interval_secs: settings.heartbeat_interval.as_secs(),
            scan_concurrency: settings.scan_concurrency,
            systemd_notify: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "kasa_bridged=info,kasa_bridge=info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// A discovery job is malformed.
    #[error("invalid discovery job #{index}")]
    Job {
        index: usize,
        #[source]
        source: ValidationError,
    },
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use kasa_bridge_adapter_kasa::{Credentials, KasaProtocol};
    use kasa_bridge_domain::discovery::DiscoveryTarget;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.mqtt.broker_host, "localhost");
        assert_eq!(config.bridge.topic_prefix, "kasa");
        assert_eq!(config.bridge.poll_interval_secs, 60);
        assert_eq!(config.bridge.failure_threshold, 3);
        assert_eq!(config.protocol.kind, ProtocolKind::Kasa);
        assert!(!config.bridge.systemd_notify);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.bridge.heartbeat_interval_secs, 15);
        assert!(config.discovery_jobs.is_empty());
    }

    #[test]
    fn should_default_to_single_broadcast_job() {
        let jobs = Config::default().discovery_jobs().unwrap();
        assert_eq!(jobs, vec![DiscoveryJob::broadcast(Duration::from_secs(5))]);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [mqtt]
            broker_host = 'broker.lan'
            username = 'bridge'

            [bridge]
            topic_prefix = 'home'
            poll_interval_secs = 30
            verify_attempts = 5
            systemd_notify = true

            [[discovery_jobs]]
            type = 'broadcast'

            [[discovery_jobs]]
            type = 'host'
            target = '192.168.1.40'
            timeout_secs = 2

            [[discovery_jobs]]
            type = 'network'
            target = '10.0.0.0/28'

            [logging]
            filter = 'debug'

            [protocol]
            kind = 'virtual'
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.mqtt.broker_host, "broker.lan");
        assert_eq!(config.mqtt.username.as_deref(), Some("bridge"));
        assert_eq!(config.protocol.kind, ProtocolKind::Virtual);
        assert_eq!(config.logging.filter, "debug");
        assert!(config.bridge.systemd_notify);

        let settings = config.bridge_settings().unwrap();
        assert_eq!(settings.topic_prefix, "home");
        assert_eq!(settings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.verify_attempts, 5);
        assert_eq!(settings.discovery_jobs.len(), 3);
        assert_eq!(
            settings.discovery_jobs[1].target(),
            &DiscoveryTarget::Host("192.168.1.40".parse().unwrap())
        );
        assert_eq!(settings.discovery_jobs[1].timeout(), Duration::from_secs(2));
        assert_eq!(settings.discovery_jobs[2].timeout(), Duration::from_secs(5));
    }

    #[test]
    fn should_parse_kasa_protocol_settings() {
        let toml = "
            [protocol]
            kind = 'kasa'

            [protocol.kasa]
            broadcast_address = '192.168.1.255'
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.protocol.kasa.broadcast_address,
            std::net::Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(config.protocol.kasa.port, 9999);
    }

    #[test]
    fn should_parse_kasa_account_credentials() {
        let toml = "
            [protocol.kasa]
            username = 'owner@example.com'
            password = 'hunter2'
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        let credentials = config.protocol.kasa.credentials().unwrap();
        assert_eq!(credentials.username, "owner@example.com");
        assert_eq!(credentials.password, "hunter2");
    }

    #[test]
    fn should_apply_kasa_account_overrides() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            ("KASA_BRIDGE_KASA_USER", "owner@example.com"),
            ("KASA_BRIDGE_KASA_PASSWORD", "hunter2"),
        ]));
        assert!(config.validate().is_ok());

        let protocol = KasaProtocol::new(config.protocol.kasa.clone());
        assert_eq!(
            protocol.credentials(),
            Some(&Credentials::new("owner@example.com", "hunter2"))
        );
    }

    #[test]
    fn should_reject_username_without_password() {
        let mut config = Config::default();
        config.apply_overrides(env(&[("KASA_BRIDGE_KASA_USER", "owner@example.com")]));
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file(std::path::Path::new("nonexistent.toml")).unwrap();
        assert_eq!(config.mqtt.broker_port, 1883);
    }

    #[test]
    fn should_apply_environment_overrides() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            ("KASA_BRIDGE_MQTT_HOST", "10.0.0.2"),
            ("KASA_BRIDGE_MQTT_PORT", "8883"),
            ("KASA_BRIDGE_MQTT_USER", "bridge"),
            ("KASA_BRIDGE_MQTT_PASSWORD", "s3cret"),
            ("KASA_BRIDGE_POLL_INTERVAL", "10"),
            ("KASA_BRIDGE_LOG", "trace"),
        ]));
        assert_eq!(config.mqtt.broker_host, "10.0.0.2");
        assert_eq!(config.mqtt.broker_port, 8883);
        assert_eq!(config.mqtt.username.as_deref(), Some("bridge"));
        assert_eq!(config.mqtt.password.as_deref(), Some("s3cret"));
        assert_eq!(config.bridge.poll_interval_secs, 10);
        assert_eq!(config.logging.filter, "trace");
    }

    #[test]
    fn should_prefer_rust_log_over_own_variable() {
        let mut config = Config::default();
        config.apply_overrides(env(&[("KASA_BRIDGE_LOG", "trace"), ("RUST_LOG", "warn")]));
        assert_eq!(config.logging.filter, "warn");
    }

    #[test]
    fn should_ignore_unparsable_numeric_overrides() {
        let mut config = Config::default();
        config.apply_overrides(env(&[("KASA_BRIDGE_MQTT_PORT", "not-a-port")]));
        assert_eq!(config.mqtt.broker_port, 1883);
    }

    #[test]
    fn should_reject_zero_poll_interval() {
        let mut config = Config::default();
        config.bridge.poll_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_multi_level_prefix() {
        let mut config = Config::default();
        config.bridge.topic_prefix = "home/kasa".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_job_without_target() {
        let toml = "
            [[discovery_jobs]]
            type = 'network'
        ";
        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Job {
                index: 0,
                source: ValidationError::MissingTarget { .. }
            }
        ));
    }

    #[test]
    fn should_report_parse_error_for_unknown_job_type() {
        let toml = "
            [[discovery_jobs]]
            type = 'multicast'
        ";
        assert!(toml::from_str::<Config>(toml).is_err());
    }
}
