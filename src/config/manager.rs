//! Configuration Manager

use super::{Config, ForwardedPort};
use crate::Result;
use anyhow::{bail, Context};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIN_BUFFER_SIZE: usize = 1024;
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file, falling back to defaults when it is missing
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            Ok(Config::default())
        }
    }

    /// Load configuration from the process environment on top of defaults
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }
}

/// Values supplied on the command line; `None` leaves the loaded value untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub ports: Vec<u16>,
    pub bind_ip: Option<IpAddr>,
    pub container_prefix: Option<String>,
    pub docker_binary: Option<PathBuf>,
    pub dial_timeout: Option<Duration>,
    pub log_level: Option<String>,
}

impl Config {
    /// Override fields from `MOXFWD_*` variables returned by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind_ip) = lookup("MOXFWD_BIND_IP") {
            self.forwarder.bind_ip = bind_ip
                .parse::<IpAddr>()
                .with_context(|| format!("Invalid MOXFWD_BIND_IP: {}", bind_ip))?;
        }

        if let Some(prefix) = lookup("MOXFWD_CONTAINER_PREFIX") {
            self.backend.container_prefix = prefix;
        }

        if let Some(binary) = lookup("MOXFWD_DOCKER_BINARY") {
            self.backend.docker_binary = PathBuf::from(binary);
        }

        if let Some(timeout) = lookup("MOXFWD_DIAL_TIMEOUT") {
            self.forwarder.dial_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid MOXFWD_DIAL_TIMEOUT: {}", timeout))?;
        }

        if let Some(timeout) = lookup("MOXFWD_QUERY_TIMEOUT") {
            self.backend.query_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid MOXFWD_QUERY_TIMEOUT: {}", timeout))?;
        }

        if let Some(level) = lookup("MOXFWD_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(&mut self, overrides: ConfigOverrides) {
        if !overrides.ports.is_empty() {
            tracing::debug!("CLI override: ports set to {:?}", overrides.ports);
            self.forwarder.ports = overrides.ports;
        }

        if let Some(bind_ip) = overrides.bind_ip {
            tracing::debug!("CLI override: bind ip set to {}", bind_ip);
            self.forwarder.bind_ip = bind_ip;
        }

        if let Some(prefix) = overrides.container_prefix {
            tracing::debug!("CLI override: container prefix set to {}", prefix);
            self.backend.container_prefix = prefix;
        }

        if let Some(binary) = overrides.docker_binary {
            tracing::debug!("CLI override: docker binary set to {}", binary.display());
            self.backend.docker_binary = binary;
        }

        if let Some(timeout) = overrides.dial_timeout {
            tracing::debug!("CLI override: dial timeout set to {:?}", timeout);
            self.forwarder.dial_timeout = timeout;
        }

        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_forwarder_config()
            .context("Forwarder configuration validation failed")?;

        self.validate_backend_config()
            .context("Backend configuration validation failed")?;

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of: {}", VALID_LOG_LEVELS.join(", "));
        }

        Ok(())
    }

    fn validate_forwarder_config(&self) -> Result<()> {
        let forwarder = &self.forwarder;

        if forwarder.port_range.start > forwarder.port_range.end {
            bail!("port_range start {} is above end {}", forwarder.port_range.start, forwarder.port_range.end);
        }

        if forwarder.ports.is_empty() {
            bail!("at least one port must be configured");
        }

        // Range check comes from ForwardedPort itself.
        self.forwarded_ports()?;

        let mut seen = HashSet::new();
        for &port in &forwarder.ports {
            if !seen.insert(port) {
                bail!("port {} configured more than once", port);
            }
        }

        if forwarder.dial_timeout.is_zero() {
            bail!("dial_timeout must be greater than 0");
        }

        if forwarder.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        if forwarder.buffer_size < MIN_BUFFER_SIZE {
            bail!("buffer_size must be at least {} bytes", MIN_BUFFER_SIZE);
        }

        if forwarder.buffer_size > MAX_BUFFER_SIZE {
            bail!("buffer_size cannot exceed {} bytes", MAX_BUFFER_SIZE);
        }

        Ok(())
    }

    fn validate_backend_config(&self) -> Result<()> {
        if self.backend.container_prefix.trim().is_empty() {
            bail!("container_prefix must not be empty");
        }

        if self.backend.docker_binary.as_os_str().is_empty() {
            bail!("docker_binary must not be empty");
        }

        if self.backend.query_timeout.is_zero() {
            bail!("query_timeout must be greater than 0");
        }

        Ok(())
    }

    /// Configured ports, each checked against the port range
    pub fn forwarded_ports(&self) -> Result<Vec<ForwardedPort>> {
        self.forwarder
            .ports
            .iter()
            .map(|&port| ForwardedPort::new(port, self.forwarder.port_range))
            .collect()
    }
}
