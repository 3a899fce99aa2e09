//! Discovery jobs: configured probing strategies.
//!
//! A job is immutable once built; the discovery engine in the app crate owns
//! its execution.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ValidationError;

/// Widest prefix a network scan will enumerate.
pub const WIDEST_SCAN_PREFIX: u8 = 16;

/// Strategy of a discovery job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryKind {
    /// Network-wide discovery probe, collecting every answer.
    Broadcast,
    /// Probe a single fixed address.
    Host,
    /// Probe every address of a range.
    Network,
}

impl DiscoveryKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Host => "host",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for DiscoveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job probes; the variant determines the job kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryTarget {
    Broadcast,
    Host(IpAddr),
    Network(Ipv4Network),
}

/// A configured probing strategy bounded by a timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryJob {
    target: DiscoveryTarget,
    timeout: Duration,
}

impl DiscoveryJob {
    /// Build a job from its configured kind and optional target string.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the target does not match the
    /// kind, cannot be parsed, or the timeout is zero.
    pub fn new(
        kind: DiscoveryKind,
        target: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ValidationError> {
        if timeout.is_zero() {
            return Err(ValidationError::ZeroTimeout);
        }
        let target = target.map(str::trim).filter(|t| !t.is_empty());
        let target = match (kind, target) {
            (DiscoveryKind::Broadcast, None) => DiscoveryTarget::Broadcast,
            (DiscoveryKind::Broadcast, Some(other)) => {
                return Err(ValidationError::UnexpectedTarget {
                    kind: kind.as_str(),
                    target: other.to_string(),
                });
            }
            (DiscoveryKind::Host, Some(raw)) => DiscoveryTarget::Host(
                raw.parse()
                    .map_err(|_| ValidationError::InvalidHost(raw.to_string()))?,
            ),
            (DiscoveryKind::Network, Some(raw)) => DiscoveryTarget::Network(raw.parse()?),
            (DiscoveryKind::Host | DiscoveryKind::Network, None) => {
                return Err(ValidationError::MissingTarget {
                    kind: kind.as_str(),
                });
            }
        };
        Ok(Self { target, timeout })
    }

    /// Broadcast job with the given timeout.
    #[must_use]
    pub fn broadcast(timeout: Duration) -> Self {
        Self {
            target: DiscoveryTarget::Broadcast,
            timeout,
        }
    }

    #[must_use]
    pub fn kind(&self) -> DiscoveryKind {
        match self.target {
            DiscoveryTarget::Broadcast => DiscoveryKind::Broadcast,
            DiscoveryTarget::Host(_) => DiscoveryKind::Host,
            DiscoveryTarget::Network(_) => DiscoveryKind::Network,
        }
    }

    #[must_use]
    pub fn target(&self) -> &DiscoveryTarget {
        &self.target
    }

    /// Bound on a single exchange: the broadcast listen window, the host
    /// query, or each per-address query of a network scan.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Display for DiscoveryJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            DiscoveryTarget::Broadcast => f.write_str("broadcast"),
            DiscoveryTarget::Host(addr) => write!(f, "host {addr}"),
            DiscoveryTarget::Network(net) => write!(f, "network {net}"),
        }
    }
}

/// An IPv4 CIDR range such as `192.168.1.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Network {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Network {
    /// Number of addresses [`hosts`](Self::hosts) yields.
    #[must_use]
    pub fn host_count(&self) -> u32 {
        let (first, last) = self.host_bounds();
        last - first + 1
    }

    /// Every probe-able address in the range.
    ///
    /// The network and broadcast addresses are skipped, except for `/31`
    /// and `/32` ranges where every address is a host.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        let (first, last) = self.host_bounds();
        (first..=last).map(Ipv4Addr::from)
    }

    fn host_bounds(&self) -> (u32, u32) {
        let base = u32::from(self.network);
        let size = 1u32 << (32 - u32::from(self.prefix));
        let last = base + (size - 1);
        if self.prefix >= 31 {
            (base, last)
        } else {
            (base + 1, last - 1)
        }
    }
}

impl FromStr for Ipv4Network {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidNetwork(raw.to_string());
        let (addr, prefix) = raw.split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.trim().parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.trim().parse().map_err(|_| invalid())?;
        if prefix > 32 {
            return Err(invalid());
        }
        if prefix < WIDEST_SCAN_PREFIX {
            return Err(ValidationError::NetworkTooWide {
                prefix,
                max: WIDEST_SCAN_PREFIX,
            });
        }
        let mask = u32::MAX << (32 - u32::from(prefix));
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & mask),
            prefix,
        })
    }
}

impl fmt::Display for Ipv4Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
