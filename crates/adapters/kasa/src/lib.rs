//! # kasa-bridge-adapter-kasa
//!
//! Kasa adapter: implements [`DeviceProtocol`] over the local protocol spoken
//! by Kasa plugs, power strips and bulbs.
//!
//! ## Responsibilities
//! - Discover devices by UDP broadcast or by probing a single address
//! - Read `get_sysinfo` (and realtime energy where a meter exists)
//! - Translate attribute changes into one request and report which of them
//!   the device applied
//!
//! Requests are JSON obfuscated with an autokey XOR cipher (see [`cipher`]),
//! sent over TCP port 9999 with a length prefix or as bare UDP datagrams for
//! discovery.
//!
//! ## Dependency rule
//! Same as other adapters: depends on `kasa-bridge-app` and `kasa-bridge-domain`.

pub mod cipher;
pub mod commands;
pub mod error;
pub mod sysinfo;
pub mod transport;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::Deserialize;

use kasa_bridge_app::ports::{DeviceProtocol, ProbeTarget};
use kasa_bridge_domain::attribute::{AttributeValue, Attributes};
use kasa_bridge_domain::capability::CapabilityClass;
use kasa_bridge_domain::device::DeviceDescriptor;
use kasa_bridge_domain::error::DeviceError;
use kasa_bridge_domain::identity::DeviceIdentity;

use self::commands::{CommandRequest, state_request, sysinfo_request};
use self::sysinfo::{Endpoint, SysInfo, realtime_power};

pub use self::error::KasaError;

/// Settings of the Kasa protocol client.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct KasaConfig {
    /// Device port for both TCP requests and UDP discovery.
    pub port: u16,
    /// Destination of discovery broadcasts.
    pub broadcast_address: Ipv4Addr,
    /// Bound on a single TCP exchange.
    pub request_timeout_secs: u64,
    /// Kasa account the devices are bound to.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for KasaConfig {
    fn default() -> Self {
        Self {
            port: 9999,
            broadcast_address: Ipv4Addr::BROADCAST,
            request_timeout_secs: 5,
            username: None,
            password: None,
        }
    }
}

impl fmt::Debug for KasaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KasaConfig")
            .field("port", &self.port)
            .field("broadcast_address", &self.broadcast_address)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl KasaConfig {
    /// Account credentials, when both halves are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                Some(Credentials::new(username.clone(), password.clone()))
            }
            _ => None,
        }
    }
}

/// Kasa account credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// [`DeviceProtocol`] speaking the Kasa local protocol.
///
/// Account credentials are held for devices that only answer an
/// authenticated session. The legacy transport below never sends them.
#[derive(Debug, Clone, Default)]
pub struct KasaProtocol {
    config: KasaConfig,
    credentials: Option<Credentials>,
}

impl KasaProtocol {
    #[must_use]
    pub fn new(config: KasaConfig) -> Self {
        Self {
            credentials: config.credentials(),
            config,
        }
    }

    /// Account the devices are bound to, if configured.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs.max(1))
    }

    async fn sysinfo(
        &self,
        address: IpAddr,
        request: &serde_json::Value,
        timeout: Duration,
    ) -> Result<(SysInfo, serde_json::Value), KasaError> {
        let answer = transport::query(address, self.config.port, request, timeout).await?;
        let info = SysInfo::from_response(&answer)?;
        Ok((info, answer))
    }
}

impl DeviceProtocol for KasaProtocol {
    async fn discover(
        &self,
        target: ProbeTarget,
        timeout: Duration,
    ) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        match target {
            ProbeTarget::Broadcast => {
                let answers = transport::broadcast(
                    self.config.broadcast_address,
                    self.config.port,
                    &sysinfo_request(),
                    timeout,
                )
                .await?;
                let found = answers
                    .into_iter()
                    .filter_map(|(address, answer)| {
                        SysInfo::from_response(&answer)
                            .and_then(|info| info.descriptor(address))
                            .inspect_err(|err| {
                                tracing::debug!(%address, error = %err, "skipping broadcast answer");
                            })
                            .ok()
                    })
                    .collect();
                Ok(found)
            }
            ProbeTarget::Host(address) => {
                let (info, _) = self.sysinfo(address, &sysinfo_request(), timeout).await?;
                Ok(vec![info.descriptor(address)?])
            }
        }
    }

    async fn fetch_state(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
    ) -> Result<Attributes, DeviceError> {
        let (info, answer) = self
            .sysinfo(address, &state_request(), self.request_timeout())
            .await?;
        let endpoint = info.endpoint(identity)?;
        let mut attributes = info.attributes(endpoint);
        if matches!(endpoint, Endpoint::Device)
            && info.capability_class()? == CapabilityClass::Plug
            && let Some(watts) = realtime_power(&answer)
        {
            attributes.insert("current_consumption".into(), AttributeValue::Float(watts));
        }
        Ok(attributes)
    }

    async fn send_command(
        &self,
        address: IpAddr,
        identity: &DeviceIdentity,
        attributes: &Attributes,
    ) -> Result<Attributes, DeviceError> {
        let timeout = self.request_timeout();
        let (info, _) = self.sysinfo(address, &sysinfo_request(), timeout).await?;
        let command = CommandRequest::build(&info, info.endpoint(identity)?, attributes);
        if command.is_empty() {
            return Ok(Attributes::new());
        }
        let answer = transport::query(address, self.config.port, &command.request, timeout).await?;
        Ok(command.applied(attributes, &answer))
    }
}
