//! moxfwd - forwards host ports to the Mox sandbox container
//!
//! The container address is resolved again for every inbound connection, so
//! the forwarder survives the container being recreated.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use moxfwd::config::{Config, ConfigManager, ConfigOverrides, ForwardedPort};
use moxfwd::connection::{ConnectionTracker, ForwardingSettings, ListenerManager};
use moxfwd::resolver::{BackendResolver, DockerResolver, Resolution};
use moxfwd::{ShutdownCoordinator, ShutdownSignals};

/// CLI arguments for moxfwd
#[derive(Parser, Debug)]
#[command(name = "moxfwd")]
#[command(about = "Forward host ports to the Mox sandbox container")]
#[command(version)]
#[command(long_about = "
Forward host ports to the Mox sandbox container.

Each PORT is bound on the host and relayed to the same port on the backend
container. The container address is looked up with the docker CLI on every
new connection. Ports must lie within the configured range (default 9000-9099).

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  MOXFWD_BIND_IP            - Address to bind listeners on (default 0.0.0.0)
  MOXFWD_CONTAINER_PREFIX   - Backend container name prefix
  MOXFWD_DOCKER_BINARY      - Path to the docker client
  MOXFWD_DIAL_TIMEOUT       - Backend connect timeout (e.g. 5s)
  MOXFWD_QUERY_TIMEOUT      - Timeout for each docker query (e.g. 5s)
  MOXFWD_LOG_LEVEL          - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Ports to forward (default: 9000)
    #[arg(value_name = "PORT")]
    pub ports: Vec<u16>,

    /// Configuration file path
    #[arg(short, long, default_value = "moxfwd.toml")]
    pub config: PathBuf,

    /// Address to bind listeners on
    #[arg(long)]
    pub bind_ip: Option<IpAddr>,

    /// Backend container name prefix
    #[arg(long)]
    pub container_prefix: Option<String>,

    /// Path to the docker client binary
    #[arg(long)]
    pub docker_binary: Option<PathBuf>,

    /// Backend connect timeout (e.g. 5s, 500ms)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub dial_timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config = load_config(&args)?;
    init_tracing(&args, &config);

    if let Err(e) = config.validate() {
        error!("{:#}, aborting", e);
        return Err(e);
    }

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Ports: {:?}", config.forwarder.ports);
        info!("  Port range: {}", config.forwarder.port_range);
        info!("  Bind ip: {}", config.forwarder.bind_ip);
        info!("  Container prefix: {}", config.backend.container_prefix);
        info!("  Dial timeout: {:?}", config.forwarder.dial_timeout);
        info!("  Query timeout: {:?}", config.backend.query_timeout);
        return Ok(());
    }

    run(config).await
}

fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(ConfigOverrides {
        ports: args.ports.clone(),
        bind_ip: args.bind_ip,
        container_prefix: args.container_prefix.clone(),
        docker_binary: args.docker_binary.clone(),
        dial_timeout: args.dial_timeout,
        log_level: args.log_level.clone(),
    });

    Ok(config)
}

async fn run(config: Config) -> Result<()> {
    let ports = config.forwarded_ports()?;

    // Registered first so SIGINT during startup still ends in a clean exit.
    let mut signals = ShutdownSignals::install().context("Failed to install signal handlers")?;

    info!("moxfwd v{} starting, ports: {:?}", env!("CARGO_PKG_VERSION"), config.forwarder.ports);

    let coordinator = ShutdownCoordinator::new(config.forwarder.shutdown_timeout);
    let tracker = ConnectionTracker::new();

    let managers = tokio::select! {
        started = start_listeners(&config, ports, &tracker) => started?,
        _ = signals.recv() => {
            info!("Shutting down");
            return Ok(());
        }
    };

    let mut listeners = JoinSet::new();
    for manager in managers {
        listeners.spawn(manager.run(coordinator.subscribe()));
    }

    let listener_failure = tokio::select! {
        _ = signals.recv() => None,
        Some(joined) = listeners.join_next() => Some(match joined {
            Ok(Ok(())) => anyhow!("Listener stopped unexpectedly"),
            Ok(Err(e)) => e,
            Err(e) => anyhow!("Listener task failed: {}", e),
        }),
    };

    coordinator.initiate_shutdown();
    while listeners.join_next().await.is_some() {}
    coordinator.drain_connections(&tracker).await;
    info!("Served {} connections", tracker.total());

    if let Some(e) = listener_failure {
        error!("{:#}", e);
        return Err(e);
    }

    info!("Shutting down");
    Ok(())
}

/// Log the startup discovery result and bind every port.
async fn start_listeners(
    config: &Config,
    ports: Vec<ForwardedPort>,
    tracker: &ConnectionTracker,
) -> Result<Vec<ListenerManager<DockerResolver>>> {
    let resolver = Arc::new(DockerResolver::from_config(&config.backend));
    match resolver.resolve().await {
        Resolution::Found(addr) => info!("Backend container found at {}", addr),
        Resolution::Absent(reason) => {
            warn!(%reason, "No backend container running (will resolve per-connection)")
        }
    }

    let settings = ForwardingSettings::from_config(&config.forwarder);

    // Bind everything before accepting anywhere so a bad port fails fast.
    let mut managers = Vec::with_capacity(ports.len());
    for port in ports {
        let manager = ListenerManager::bind(
            config.forwarder.bind_ip,
            port,
            Arc::clone(&resolver),
            settings,
            tracker.clone(),
        )
        .await?;
        managers.push(manager);
    }

    Ok(managers)
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config: &Config) {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true),
        )
        .with(env_filter)
        .init();
}
