use std::future::Future;

use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;

/// The external resource refused to shut down cleanly.
#[derive(Error, Debug)]
#[error("Failed to release resource: {message}")]
pub struct ReleaseError {
    message: String,
}

impl ReleaseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Tears down the external resource behind a session handle.
///
/// The store calls this at most once per handle, after the handle has left
/// the session map. Errors are logged by the store and never reach callers.
pub trait ResourceReleaser<H>: Send + Sync + 'static {
    fn release(&self, handle: H) -> BoxFuture<'static, Result<(), ReleaseError>>;
}

impl<H, F, Fut> ResourceReleaser<H> for F
where
    F: Fn(H) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ReleaseError>> + Send + 'static,
{
    fn release(&self, handle: H) -> BoxFuture<'static, Result<(), ReleaseError>> {
        self(handle).boxed()
    }
}
