//! Configuration Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Default container name prefix of the backend instance
pub const DEFAULT_CONTAINER_PREFIX: &str = "openclaw-sbx-agent-mox-";

/// Default relay buffer size per direction (64 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub forwarder: ForwarderConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

/// Listener and relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Ports to forward; host port N maps to backend port N
    pub ports: Vec<u16>,
    pub port_range: PortRange,
    pub bind_ip: IpAddr,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Backend discovery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub container_prefix: String,
    pub docker_binary: PathBuf,
    /// Bound applied to each control-plane query separately
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// Inclusive range of ports the forwarder may bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(9000, 9099)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A port that has been checked against the configured [`PortRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForwardedPort(u16);

impl ForwardedPort {
    /// Validate `port` against `range`.
    pub fn new(port: u16, range: PortRange) -> crate::Result<Self> {
        if !range.contains(port) {
            anyhow::bail!("Port {} outside allowed range {}", port, range);
        }
        Ok(Self(port))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ForwardedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            ports: vec![9000],
            port_range: PortRange::default(),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dial_timeout: Duration::from_secs(5),
            buffer_size: DEFAULT_BUFFER_SIZE,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            container_prefix: DEFAULT_CONTAINER_PREFIX.to_string(),
            docker_binary: PathBuf::from("docker"),
            query_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
