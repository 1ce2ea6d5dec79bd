//! Connection Management Module
//!
//! Listening sockets, per-connection handling, and in-flight tracking.

pub mod handler;
pub mod listener;
pub mod tracker;

pub use handler::{dial_backend, ConnectionHandler, ConnectionOutcome, ConnectionState, DialError, ForwardingSettings};
pub use listener::ListenerManager;
pub use tracker::{ConnectionGuard, ConnectionTracker};
