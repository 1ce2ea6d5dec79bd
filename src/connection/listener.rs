//! Listener Manager
//!
//! One listening socket per forwarded port. Every accepted connection is
//! handed to its own spawned [`ConnectionHandler`]; the accept loop never
//! waits on a handler.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::handler::{ConnectionHandler, ForwardingSettings};
use super::tracker::ConnectionTracker;
use crate::config::ForwardedPort;
use crate::resolver::BackendResolver;
use crate::Result;

/// Pause after a transient accept error so fd exhaustion does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Owns the listening socket for one forwarded port
pub struct ListenerManager<R> {
    port: ForwardedPort,
    listener: TcpListener,
    resolver: Arc<R>,
    settings: ForwardingSettings,
    tracker: ConnectionTracker,
}

impl<R: BackendResolver> ListenerManager<R> {
    /// Bind `bind_ip:port`
    pub async fn bind(
        bind_ip: IpAddr,
        port: ForwardedPort,
        resolver: Arc<R>,
        settings: ForwardingSettings,
        tracker: ConnectionTracker,
    ) -> Result<Self> {
        let bind_addr = SocketAddr::new(bind_ip, port.get());
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind listener on {}", bind_addr))?;

        Ok(Self {
            port,
            listener,
            resolver,
            settings,
            tracker,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown is signalled or the socket fails.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let span = info_span!("listener", port = self.port.get());
        self.accept_connections(shutdown).instrument(span).await
    }

    async fn accept_connections(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!("Forwarding {} -> backend:{}", local_addr, self.port);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => self.dispatch(stream, peer),
                        Err(e) if is_fatal_accept_error(&e) => {
                            error!(error = %e, "Listening socket failed");
                            return Err(e).with_context(|| format!("Listener on port {} failed", self.port));
                        }
                        Err(e) => {
                            warn!(error = %e, "Accept failed, retrying");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }

    /// Spawn a detached handler for one accepted connection
    fn dispatch(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Failed to set TCP_NODELAY on inbound stream");
        }

        let id = Uuid::new_v4();
        debug!(%peer, %id, "Accepted connection");

        let guard = self.tracker.track();
        let handler = ConnectionHandler::new(self.port, Arc::clone(&self.resolver), self.settings);
        let span = info_span!("conn", %id, %peer);

        // Not joined: the handler reports through logs and its own outcome.
        tokio::spawn(
            async move {
                let _guard = guard;
                handler.handle(stream, peer).await;
            }
            .instrument(span),
        );
    }
}

/// Errors meaning the listening socket itself is unusable
fn is_fatal_accept_error(e: &io::Error) -> bool {
    const EBADF: i32 = 9;
    e.kind() == io::ErrorKind::InvalidInput || e.raw_os_error() == Some(EBADF)
}
