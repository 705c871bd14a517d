//! Async persistent connection

use async_trait::async_trait;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{AsyncHandleFactory, ConnectionKey, Result};
use tokio::sync::Mutex;

use super::config::LifecycleConfig;
use super::state::{Activity, ConnectionState, StateCell};
use super::sweeper::{AsyncSweepable, SweeperTask};
use super::{ConnectionMode, ManagedConnection};
use crate::retry::{RetryPolicy, retry_operation_async};

struct AsyncShared<F: AsyncHandleFactory> {
    key: ConnectionKey,
    factory: F,
    config: LifecycleConfig,
    retry: RetryPolicy,
    state: StateCell,
    activity: Activity,
    /// `Some` exactly when `state` is `Connected`
    handle: Mutex<Option<Arc<F::Handle>>>,
}

impl<F: AsyncHandleFactory> AsyncShared<F> {
    async fn release(&self, slot: &mut Option<Arc<F::Handle>>) {
        if let Some(handle) = slot.take() {
            if let Err(e) = self.factory.close(handle).await {
                tracing::warn!(key = %self.key, error = %e, "error closing connection");
            }
        }
        self.state.store(ConnectionState::Disconnected);
    }

    /// Release the handle from synchronous code.
    ///
    /// The close is spawned onto the current runtime when there is one;
    /// otherwise the handle is only dropped. A handle lock held by an
    /// in-flight connect is left alone.
    fn release_detached(self: &Arc<Self>) {
        let Ok(mut slot) = self.handle.try_lock() else {
            tracing::debug!(key = %self.key, "handle busy, skipping synchronous release");
            return;
        };
        let Some(handle) = slot.take() else {
            return;
        };
        self.state.store(ConnectionState::Disconnected);
        drop(slot);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = self.clone();
                runtime.spawn(async move {
                    if let Err(e) = shared.factory.close(handle).await {
                        tracing::warn!(key = %shared.key, error = %e, "error closing connection");
                    }
                });
            }
            Err(_) => {
                tracing::debug!(key = %self.key, "no runtime available, dropping handle");
                drop(handle);
            }
        }
    }
}

#[async_trait]
impl<F: AsyncHandleFactory> AsyncSweepable for AsyncShared<F> {
    fn key(&self) -> &ConnectionKey {
        &self.key
    }

    async fn sweep(&self) {
        let mut slot = self.handle.lock().await;
        if slot.is_none() {
            return;
        }

        let idle = self.activity.idle_for();
        if idle >= self.config.idle_timeout() {
            tracing::info!(
                key = %self.key,
                idle_secs = idle.as_secs(),
                "connection idle, disconnecting"
            );
            self.release(&mut slot).await;
        }
    }
}

/// Persistent connection over an async driver.
///
/// The handle lock is a `tokio::sync::Mutex`, held across the whole connect
/// including retry back-off, so concurrent tasks observe a single create.
/// The sweeper is a task on the runtime that ran the first connect.
pub struct AsyncPersistentConnection<F: AsyncHandleFactory> {
    shared: Arc<AsyncShared<F>>,
    sweeper: parking_lot::Mutex<Option<SweeperTask>>,
}

impl<F: AsyncHandleFactory> AsyncPersistentConnection<F> {
    pub fn new(
        key: ConnectionKey,
        factory: F,
        config: LifecycleConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(AsyncShared {
                key,
                factory,
                config,
                retry,
                state: StateCell::new(),
                activity: Activity::new(),
                handle: Mutex::new(None),
            }),
            sweeper: parking_lot::Mutex::new(None),
        }
    }

    pub fn with_defaults(key: ConnectionKey, factory: F) -> Self {
        Self::new(key, factory, LifecycleConfig::default(), RetryPolicy::default())
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.shared.key
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.shared.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.shared.retry
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    pub fn idle_for(&self) -> Duration {
        self.shared.activity.idle_for()
    }

    pub fn touch(&self) {
        self.shared.activity.touch();
    }

    pub fn is_sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(SweeperTask::is_running)
    }

    /// Return a live handle, creating or replacing it as needed.
    #[tracing::instrument(skip(self), fields(key = %self.shared.key))]
    pub async fn connect(&self) -> Result<Arc<F::Handle>> {
        let shared = &*self.shared;
        let mut slot = shared.handle.lock().await;
        shared.activity.touch();

        if let Some(handle) = slot.clone() {
            if shared.factory.probe(&handle).await {
                return Ok(handle);
            }
            tracing::warn!("connection lost, reconnecting");
            shared.release(&mut slot).await;
        }

        let connecting = shared.state.begin_connect();
        let factory = &shared.factory;
        let created = if shared.config.auto_reconnect() {
            let operation_name = format!("{}_connect", shared.key);
            retry_operation_async(move || factory.create(), &shared.retry, &operation_name).await
        } else {
            factory.create().await
        };

        let handle = Arc::new(created?);
        *slot = Some(handle.clone());
        connecting.finish(ConnectionState::Connected);
        shared.activity.touch();
        tracing::info!("connected");

        self.ensure_sweeper();
        Ok(handle)
    }

    pub async fn session(&self) -> Result<AsyncSession<'_, F>> {
        let handle = self.connect().await?;
        Ok(AsyncSession { conn: self, handle })
    }

    /// Close the handle, if any. Close errors are logged, never returned.
    pub async fn disconnect(&self) {
        let mut slot = self.shared.handle.lock().await;
        if slot.is_some() {
            self.shared.release(&mut slot).await;
            tracing::info!(key = %self.shared.key, "disconnected");
        }
    }

    /// Cancel the sweeper, disconnect, and wait (bounded) for the sweeper task.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = &sweeper {
            sweeper.cancel();
        }
        self.disconnect().await;
        if let Some(sweeper) = sweeper {
            sweeper
                .stop_and_join(self.shared.config.shutdown_timeout())
                .await;
        }
    }

    /// Synchronous shutdown: abort the sweeper and release the handle without awaiting.
    pub fn shutdown_now(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.shared.release_detached();
    }

    fn ensure_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(SweeperTask::is_running) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                *sweeper = Some(SweeperTask::spawn(
                    &runtime,
                    self.shared.clone(),
                    self.shared.config.health_check_interval(),
                ));
            }
            Err(_) => {
                tracing::warn!(key = %self.shared.key, "no tokio runtime, idle sweeper not started");
            }
        }
    }
}

impl<F: AsyncHandleFactory> std::fmt::Debug for AsyncPersistentConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPersistentConnection")
            .field("key", &self.shared.key)
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl<F: AsyncHandleFactory> Drop for AsyncPersistentConnection<F> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
        self.shared.release_detached();
    }
}

#[async_trait]
impl<F: AsyncHandleFactory> ManagedConnection for AsyncPersistentConnection<F> {
    fn key(&self) -> &ConnectionKey {
        &self.shared.key
    }

    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Async
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    fn shutdown(&self) {
        self.shutdown_now();
    }

    async fn shutdown_async(&self) {
        AsyncPersistentConnection::shutdown(self).await;
    }
}

/// A borrowed handle from [`AsyncPersistentConnection::session`].
pub struct AsyncSession<'a, F: AsyncHandleFactory> {
    conn: &'a AsyncPersistentConnection<F>,
    handle: Arc<F::Handle>,
}

impl<F: AsyncHandleFactory> AsyncSession<'_, F> {
    pub fn handle(&self) -> &Arc<F::Handle> {
        &self.handle
    }
}

impl<F: AsyncHandleFactory> Deref for AsyncSession<'_, F> {
    type Target = F::Handle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<F: AsyncHandleFactory> Drop for AsyncSession<'_, F> {
    fn drop(&mut self) {
        self.conn.touch();
    }
}
