//! Connection Handler
//!
//! Drives one accepted connection through
//! `Accepted -> Resolving -> Dialing -> Relaying -> Closed`, leaving early to
//! `Closed` when no backend is found or the dial fails. The backend is dialed
//! on the same port number the connection arrived on.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{ForwardedPort, ForwarderConfig};
use crate::relay::{RelayEngine, RelayStats};
use crate::resolver::{AbsentReason, BackendResolver, Resolution};

/// Lifecycle of one forwarded connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Resolving,
    Dialing,
    Relaying,
    Closed,
}

/// Failure to open the backend leg
#[derive(Debug, Error)]
pub enum DialError {
    #[error("connect timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// How a connection ended
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// No backend was resolvable; nothing was dialed
    Refused(AbsentReason),
    /// Backend resolved but could not be reached
    DialFailed { backend: SocketAddr, error: DialError },
    /// Traffic was relayed until both directions ended
    Relayed { backend: SocketAddr, stats: RelayStats },
}

/// Per-connection settings shared read-only by every handler
#[derive(Debug, Clone, Copy)]
pub struct ForwardingSettings {
    pub dial_timeout: Duration,
    pub relay: RelayEngine,
}

impl ForwardingSettings {
    pub fn from_config(config: &ForwarderConfig) -> Self {
        Self {
            dial_timeout: config.dial_timeout,
            relay: RelayEngine::from_config(config),
        }
    }
}

impl Default for ForwardingSettings {
    fn default() -> Self {
        Self::from_config(&ForwarderConfig::default())
    }
}

/// Handles exactly one inbound connection
pub struct ConnectionHandler<R> {
    port: ForwardedPort,
    resolver: Arc<R>,
    settings: ForwardingSettings,
    state: ConnectionState,
}

impl<R: BackendResolver> ConnectionHandler<R> {
    pub fn new(port: ForwardedPort, resolver: Arc<R>, settings: ForwardingSettings) -> Self {
        Self {
            port,
            resolver,
            settings,
            state: ConnectionState::Accepted,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(from = ?self.state, to = ?next, "Connection state change");
        self.state = next;
    }

    /// Run the connection to completion. Never fails: every problem is
    /// reported through the returned outcome and the inbound stream is
    /// closed on every path.
    pub async fn handle<S>(mut self, mut inbound: S, peer: SocketAddr) -> ConnectionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let port = self.port.get();

        self.transition(ConnectionState::Resolving);
        let backend_ip = match self.resolver.resolve().await {
            Resolution::Found(addr) => addr,
            Resolution::Absent(reason) => {
                warn!(port, %peer, %reason, "No backend instance running, refusing connection");
                close_quietly(&mut inbound).await;
                self.transition(ConnectionState::Closed);
                return ConnectionOutcome::Refused(reason);
            }
        };

        let backend = backend_ip.with_port(port);
        info!(port, %peer, %backend, "Forwarding connection");

        self.transition(ConnectionState::Dialing);
        let outbound = match dial_backend(backend, self.settings.dial_timeout).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(port, %peer, %backend, %error, "Connect to backend failed");
                close_quietly(&mut inbound).await;
                self.transition(ConnectionState::Closed);
                return ConnectionOutcome::DialFailed { backend, error };
            }
        };

        self.transition(ConnectionState::Relaying);
        let stats = self.settings.relay.relay(inbound, outbound).await;
        self.transition(ConnectionState::Closed);

        info!(
            port,
            %peer,
            bytes_up = stats.bytes_up,
            bytes_down = stats.bytes_down,
            duration_ms = stats.duration.as_millis() as u64,
            "Connection closed"
        );

        ConnectionOutcome::Relayed { backend, stats }
    }
}

/// Open a TCP connection to `addr`, giving up after `limit`.
pub async fn dial_backend(addr: SocketAddr, limit: Duration) -> Result<TcpStream, DialError> {
    let stream = match timeout(limit, TcpStream::connect(addr)).await {
        Ok(result) => result?,
        Err(_) => return Err(DialError::TimedOut(limit)),
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY on backend stream");
    }
    Ok(stream)
}

async fn close_quietly<S: AsyncWrite + Unpin>(stream: &mut S) {
    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Shutdown of inbound stream failed");
    }
}
