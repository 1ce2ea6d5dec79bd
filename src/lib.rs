//! moxfwd Library
//!
//! TCP port forwarder for a dynamically-addressed backend container. Each
//! forwarded host port N relays to port N on whatever address the backend
//! container has at the moment a connection arrives, so the backend can be
//! recreated without restarting the forwarder.

pub mod config;
pub mod connection;
pub mod relay;
pub mod resolver;
pub mod shutdown;

pub use config::Config;
pub use connection::{ConnectionHandler, ListenerManager};
pub use relay::RelayEngine;
pub use resolver::{BackendResolver, DockerResolver};
pub use shutdown::{ShutdownCoordinator, ShutdownSignals};

/// Common error type for the forwarder
pub type Result<T> = anyhow::Result<T>;
