//! Graceful Shutdown Handling
//!
//! Waits for SIGINT/SIGTERM, tells every listener to stop accepting, and
//! gives in-flight relays a bounded window to finish on their own.

use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::connection::ConnectionTracker;
use crate::Result;

/// Termination signals, registered as soon as this value is created so a
/// signal arriving during startup is queued instead of killing the process.
pub struct ShutdownSignals {
    #[cfg(unix)]
    sigterm: signal::unix::Signal,
    #[cfg(unix)]
    sigint: signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: signal::windows::CtrlC,
}

impl ShutdownSignals {
    /// Register handlers for SIGTERM and SIGINT (Ctrl+C on Windows)
    pub fn install() -> Result<Self> {
        debug!("Installing shutdown signal handlers");

        #[cfg(unix)]
        let signals = Self {
            sigterm: signal::unix::signal(signal::unix::SignalKind::terminate())?,
            sigint: signal::unix::signal(signal::unix::SignalKind::interrupt())?,
        };

        #[cfg(windows)]
        let signals = Self {
            ctrl_c: signal::windows::ctrl_c()?,
        };

        Ok(signals)
    }

    /// Wait for the next termination signal
    pub async fn recv(&mut self) {
        #[cfg(unix)]
        tokio::select! {
            _ = self.sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = self.sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        #[cfg(windows)]
        {
            self.ctrl_c.recv().await;
            info!("Received Ctrl+C");
        }
    }
}

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// How long in-flight connections may keep running after shutdown
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self { shutdown_tx, timeout }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Tell every subscriber to stop
    pub fn initiate_shutdown(&self) {
        match self.shutdown_tx.send(()) {
            Ok(receivers) => debug!("Shutdown signal sent to {} listeners", receivers),
            Err(_) => debug!("Shutdown signal sent with no listeners subscribed"),
        }
    }

    /// Wait for in-flight connections to close, up to the shutdown timeout.
    /// Returns the number still open when waiting stopped.
    pub async fn drain_connections(&self, tracker: &ConnectionTracker) -> usize {
        let start_time = Instant::now();
        let active = tracker.active();
        if active == 0 {
            return 0;
        }

        info!("Waiting for {} active connections to close (timeout: {:?})", active, self.timeout);

        if tracker.wait_idle(self.timeout).await {
            info!("All connections closed gracefully in {:?}", start_time.elapsed());
            0
        } else {
            let remaining = tracker.active();
            warn!(
                "Shutdown timeout reached after {:?} with {} connections still active",
                start_time.elapsed(),
                remaining
            );
            remaining
        }
    }
}
