//! Value types shared by templates, server records and container specs.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// CPU and memory allotment for one server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    /// CPU share in cores (fractions allowed)
    pub cpu: f64,
    /// Memory ceiling in megabytes
    pub memory_mb: u64,
}

impl ResourceLimits {
    /// Memory ceiling in bytes, as the engine expects it.
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_mb as i64).saturating_mul(1024 * 1024)
    }

    /// CPU share in billionths of a core.
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu * 1_000_000_000.0).round() as i64
    }
}

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP (default)
    #[default]
    Tcp,
    /// UDP
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A port a template's image listens on, written `25565` or `2456/udp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExposedPort {
    /// Port inside the container
    pub port: u16,
    /// Protocol
    pub protocol: Protocol,
}

impl FromStr for ExposedPort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (port, protocol) = match s.trim().split_once('/') {
            Some((port, "tcp")) => (port, Protocol::Tcp),
            Some((port, "udp")) => (port, Protocol::Udp),
            Some((_, other)) => {
                return Err(Error::Validation(format!(
                    "Unsupported protocol '{}' in port '{}'",
                    other, s
                )));
            }
            None => (s.trim(), Protocol::Tcp),
        };

        let port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::Validation(format!("Invalid port '{}'", s)))?;

        Ok(Self { port, protocol })
    }
}

impl fmt::Display for ExposedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// Mapping of a container port onto the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    /// Port inside the container
    pub container_port: u16,
    /// Port published on the host
    pub host_port: u16,
    /// Protocol
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortBinding {
    /// Publish `port` on the same host port.
    pub fn identity(port: ExposedPort) -> Self {
        Self {
            container_port: port.port,
            host_port: port.port,
            protocol: port.protocol,
        }
    }

    /// Engine key for this binding, e.g. `25565/tcp`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}
