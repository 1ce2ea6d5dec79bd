//! Data Relay Module
//!
//! Handles bidirectional data relay between the inbound client stream and
//! the backend stream.

pub mod engine;
pub mod session;

pub use engine::RelayEngine;
pub use session::{DirectionEnd, RelaySession, RelayStats};
