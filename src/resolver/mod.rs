//! Backend Address Resolution
//!
//! Discovers the current network address of the backend container. A
//! resolver never fails hard: every problem collapses into
//! [`Resolution::Absent`] with a reason, since a missing backend is a normal
//! operating condition.

pub mod docker;
pub mod types;

use std::future::Future;
use std::sync::Arc;

pub use docker::DockerResolver;
pub use types::{AbsentReason, BackendAddress, Resolution};

/// Looks up the backend address. Called once per inbound connection, so
/// implementations must not cache across calls and must be safe to call
/// concurrently.
pub trait BackendResolver: Send + Sync + 'static {
    fn resolve(&self) -> impl Future<Output = Resolution> + Send;
}

impl<R: BackendResolver> BackendResolver for Arc<R> {
    fn resolve(&self) -> impl Future<Output = Resolution> + Send {
        (**self).resolve()
    }
}
