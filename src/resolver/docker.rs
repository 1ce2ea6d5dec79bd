//! Docker CLI Resolver
//!
//! Runs `docker ps` to find the first running container whose name matches
//! the configured prefix, then `docker inspect` to read its address from the
//! attached networks. Each invocation is bounded by the query timeout and the
//! child is killed if the bound is exceeded.
//!
//! When several containers match, the first id printed by `docker ps` wins.
//! When a container sits on several networks, networks are visited in name
//! order and the first non-empty `IPAddress` wins.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::types::{AbsentReason, BackendAddress, Resolution};
use super::BackendResolver;
use crate::config::BackendConfig;

/// Resolves the backend through the docker command-line client
#[derive(Debug, Clone)]
pub struct DockerResolver {
    binary: PathBuf,
    container_prefix: String,
    query_timeout: Duration,
}

/// Subset of one `docker inspect` entry
#[derive(Debug, Deserialize)]
struct ContainerDescriptor {
    #[serde(rename = "NetworkSettings", default)]
    network_settings: Option<NetworkSettings>,
}

#[derive(Debug, Deserialize)]
struct NetworkSettings {
    #[serde(rename = "Networks", default)]
    networks: Option<BTreeMap<String, NetworkEndpoint>>,
}

#[derive(Debug, Deserialize)]
struct NetworkEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: Option<String>,
}

impl DockerResolver {
    pub fn new(binary: impl Into<PathBuf>, container_prefix: impl Into<String>, query_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            container_prefix: container_prefix.into(),
            query_timeout,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(
            config.docker_binary.clone(),
            config.container_prefix.clone(),
            config.query_timeout,
        )
    }

    async fn lookup(&self) -> Result<BackendAddress, AbsentReason> {
        let name_filter = format!("name={}", self.container_prefix);
        let listing = self.run(&["ps", "-q", "-f", &name_filter]).await?;

        let container = first_container_id(&listing).ok_or_else(|| AbsentReason::NoInstance {
            prefix: self.container_prefix.clone(),
        })?;
        debug!(container, "Matched backend container");

        let descriptor = self.run(&["inspect", container]).await?;
        match parse_inspect_output(&descriptor)? {
            Some(ip) => Ok(BackendAddress::new(ip)),
            None => Err(AbsentReason::NoAddress {
                container: container.to_string(),
            }),
        }
    }

    /// Run one docker subcommand and return its stdout
    async fn run(&self, args: &[&str]) -> Result<String, AbsentReason> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.query_timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AbsentReason::QueryFailed(format!(
                    "failed to run {}: {}",
                    self.binary.display(),
                    e
                )))
            }
            Err(_) => return Err(AbsentReason::QueryTimedOut(self.query_timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AbsentReason::QueryFailed(format!(
                "docker {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| AbsentReason::Malformed(format!("non-utf8 output: {}", e)))
    }
}

impl BackendResolver for DockerResolver {
    async fn resolve(&self) -> Resolution {
        let result = self.lookup().await;
        if let Err(reason) = &result {
            debug!(prefix = %self.container_prefix, %reason, "Backend resolution came up empty");
        }
        result.into()
    }
}

/// First container id in `docker ps -q` output
pub fn first_container_id(listing: &str) -> Option<&str> {
    listing.lines().map(str::trim).find(|line| !line.is_empty())
}

/// Extract the first usable address from `docker inspect` JSON.
///
/// `Ok(None)` means the descriptor parsed but carried no address.
pub fn parse_inspect_output(json: &str) -> Result<Option<IpAddr>, AbsentReason> {
    let descriptors: Vec<ContainerDescriptor> =
        serde_json::from_str(json).map_err(|e| AbsentReason::Malformed(e.to_string()))?;

    let networks = descriptors
        .into_iter()
        .next()
        .and_then(|d| d.network_settings)
        .and_then(|s| s.networks)
        .unwrap_or_default();

    for (name, endpoint) in networks {
        let Some(raw) = endpoint.ip_address.filter(|ip| !ip.is_empty()) else {
            continue;
        };
        return raw
            .parse::<IpAddr>()
            .map(Some)
            .map_err(|e| AbsentReason::Malformed(format!("network {} address '{}': {}", name, raw, e)));
    }

    Ok(None)
}
