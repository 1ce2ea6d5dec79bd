//! Configuration Module
//!
//! Handles configuration loading, validation, and port-range checks.

pub mod manager;
pub mod types;

pub use manager::{ConfigManager, ConfigOverrides};
pub use types::*;
