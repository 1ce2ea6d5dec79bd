//! Resolution Types

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Network address of the backend instance, observed at resolution time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendAddress(IpAddr);

impl BackendAddress {
    pub fn new(ip: IpAddr) -> Self {
        Self(ip)
    }

    /// Socket address of this backend on `port`
    pub fn with_port(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.0, port)
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why no backend address could be produced
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbsentReason {
    #[error("no running instance matches '{prefix}'")]
    NoInstance { prefix: String },

    #[error("instance {container} has no network address")]
    NoAddress { container: String },

    #[error("control-plane query failed: {0}")]
    QueryFailed(String),

    #[error("control-plane query timed out after {0:?}")]
    QueryTimedOut(Duration),

    #[error("malformed control-plane output: {0}")]
    Malformed(String),
}

/// Outcome of one resolution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(BackendAddress),
    Absent(AbsentReason),
}

impl From<Result<BackendAddress, AbsentReason>> for Resolution {
    fn from(result: Result<BackendAddress, AbsentReason>) -> Self {
        match result {
            Ok(addr) => Resolution::Found(addr),
            Err(reason) => Resolution::Absent(reason),
        }
    }
}
