//! Driver factory traits
//!
//! A persistent connection never builds or tears down a driver session itself.
//! It goes through one of these factories, supplied per connection key.

use async_trait::async_trait;
use std::sync::Arc;

use crate::Result;

/// Factory for blocking driver handles.
///
/// Handles are shared with callers as `Arc<Handle>`; `close` receives the
/// lifecycle's own reference and should release whatever it can. Callers
/// still holding a clone keep the handle alive until they drop it.
pub trait HandleFactory: Send + Sync + 'static {
    /// The driver session or client type.
    type Handle: Send + Sync + 'static;

    /// Create a new handle. Errors are classified for retry by their message.
    fn create(&self) -> Result<Self::Handle>;

    /// Cheap liveness round-trip against an existing handle.
    fn probe(&self, handle: &Self::Handle) -> bool;

    /// Tear a handle down.
    fn close(&self, handle: Arc<Self::Handle>) -> Result<()>;
}

/// Factory for async driver handles.
///
/// `create` and `probe` are the only points where a connect may suspend.
#[async_trait]
pub trait AsyncHandleFactory: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    async fn create(&self) -> Result<Self::Handle>;

    async fn probe(&self, handle: &Self::Handle) -> bool;

    async fn close(&self, handle: Arc<Self::Handle>) -> Result<()>;
}

impl<T: HandleFactory> HandleFactory for Arc<T> {
    type Handle = T::Handle;

    fn create(&self) -> Result<Self::Handle> {
        (**self).create()
    }

    fn probe(&self, handle: &Self::Handle) -> bool {
        (**self).probe(handle)
    }

    fn close(&self, handle: Arc<Self::Handle>) -> Result<()> {
        (**self).close(handle)
    }
}

#[async_trait]
impl<T: AsyncHandleFactory> AsyncHandleFactory for Arc<T> {
    type Handle = T::Handle;

    async fn create(&self) -> Result<Self::Handle> {
        (**self).create().await
    }

    async fn probe(&self, handle: &Self::Handle) -> bool {
        (**self).probe(handle).await
    }

    async fn close(&self, handle: Arc<Self::Handle>) -> Result<()> {
        (**self).close(handle).await
    }
}
