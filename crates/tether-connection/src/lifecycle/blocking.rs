//! Blocking persistent connection

use async_trait::async_trait;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{ConnectionKey, HandleFactory, Result};

use super::config::LifecycleConfig;
use super::state::{Activity, ConnectionState, StateCell};
use super::sweeper::{Sweepable, SweeperThread};
use super::{ConnectionMode, ManagedConnection};
use crate::retry::{RetryPolicy, retry_operation};

/// State shared between a lifecycle and its sweeper thread.
struct Shared<F: HandleFactory> {
    key: ConnectionKey,
    factory: F,
    config: LifecycleConfig,
    retry: RetryPolicy,
    state: StateCell,
    activity: Activity,
    /// `Some` exactly when `state` is `Connected`
    handle: Mutex<Option<Arc<F::Handle>>>,
}

impl<F: HandleFactory> Shared<F> {
    /// Close whatever is in `slot` and mark the lifecycle disconnected.
    fn release(&self, slot: &mut Option<Arc<F::Handle>>) {
        if let Some(handle) = slot.take() {
            if let Err(e) = self.factory.close(handle) {
                tracing::warn!(key = %self.key, error = %e, "error closing connection");
            }
        }
        self.state.store(ConnectionState::Disconnected);
    }
}

impl<F: HandleFactory> Sweepable for Shared<F> {
    fn key(&self) -> &ConnectionKey {
        &self.key
    }

    fn sweep(&self) {
        let mut slot = self.handle.lock();
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
            self.release(&mut slot);
        }
    }
}

/// Persistent connection over a blocking driver.
///
/// `connect` serialises on an internal lock, so concurrent callers observe a
/// single create. The sweeper is a dedicated thread named
/// `idle-sweeper-<key>`, started on the first successful connect.
pub struct PersistentConnection<F: HandleFactory> {
    shared: Arc<Shared<F>>,
    sweeper: Mutex<Option<SweeperThread>>,
}

impl<F: HandleFactory> PersistentConnection<F> {
    pub fn new(
        key: ConnectionKey,
        factory: F,
        config: LifecycleConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                key,
                factory,
                config,
                retry,
                state: StateCell::new(),
                activity: Activity::new(),
                handle: Mutex::new(None),
            }),
            sweeper: Mutex::new(None),
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

    /// Time since the last connect, session or `touch`.
    pub fn idle_for(&self) -> Duration {
        self.shared.activity.idle_for()
    }

    /// Mark the connection as in use, postponing idle eviction.
    pub fn touch(&self) {
        self.shared.activity.touch();
    }

    pub fn is_sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(SweeperThread::is_running)
    }

    /// Return a live handle, creating or replacing it as needed.
    ///
    /// A cached handle is probed first; if the probe fails it is closed and a
    /// new one created. With auto-reconnect on, creation goes through the
    /// retry executor under the operation name `<key>_connect`.
    #[tracing::instrument(skip(self), fields(key = %self.shared.key))]
    pub fn connect(&self) -> Result<Arc<F::Handle>> {
        let shared = &*self.shared;
        let mut slot = shared.handle.lock();
        shared.activity.touch();

        if let Some(handle) = slot.as_ref() {
            if shared.factory.probe(handle) {
                return Ok(handle.clone());
            }
            tracing::warn!("connection lost, reconnecting");
            shared.release(&mut slot);
        }

        let connecting = shared.state.begin_connect();
        let created = if shared.config.auto_reconnect() {
            let operation_name = format!("{}_connect", shared.key);
            retry_operation(|| shared.factory.create(), &shared.retry, &operation_name)
        } else {
            shared.factory.create()
        };

        let handle = Arc::new(created?);
        *slot = Some(handle.clone());
        connecting.finish(ConnectionState::Connected);
        shared.activity.touch();
        tracing::info!("connected");

        self.ensure_sweeper();
        Ok(handle)
    }

    /// Connect and return a guard that refreshes the last-used time on drop.
    pub fn session(&self) -> Result<Session<'_, F>> {
        let handle = self.connect()?;
        Ok(Session { conn: self, handle })
    }

    /// Close the handle, if any. Close errors are logged, never returned.
    pub fn disconnect(&self) {
        let mut slot = self.shared.handle.lock();
        if slot.is_some() {
            self.shared.release(&mut slot);
            tracing::info!(key = %self.shared.key, "disconnected");
        }
    }

    /// Stop the sweeper, disconnect, and wait (bounded) for the sweeper thread.
    pub fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = &sweeper {
            sweeper.stop();
        }
        self.disconnect();
        if let Some(sweeper) = sweeper {
            sweeper.stop_and_join(self.shared.config.shutdown_timeout());
        }
    }

    /// Start the sweeper unless one is already running.
    ///
    /// Called with the handle lock held; lock order is handle, then sweeper.
    fn ensure_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(SweeperThread::is_running) {
            return;
        }

        match SweeperThread::spawn(
            self.shared.clone(),
            self.shared.config.health_check_interval(),
        ) {
            Ok(thread) => *sweeper = Some(thread),
            Err(e) => {
                tracing::warn!(key = %self.shared.key, error = %e, "failed to start idle sweeper");
            }
        }
    }
}

impl<F: HandleFactory> std::fmt::Debug for PersistentConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentConnection")
            .field("key", &self.shared.key)
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl<F: HandleFactory> Drop for PersistentConnection<F> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.stop();
        }
        let mut slot = self.shared.handle.lock();
        if slot.is_some() {
            tracing::debug!(key = %self.shared.key, "dropping connected lifecycle");
            self.shared.release(&mut slot);
        }
    }
}

#[async_trait]
impl<F: HandleFactory> ManagedConnection for PersistentConnection<F> {
    fn key(&self) -> &ConnectionKey {
        &self.shared.key
    }

    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Blocking
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    fn shutdown(&self) {
        PersistentConnection::shutdown(self);
    }

    async fn shutdown_async(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = &sweeper {
            sweeper.stop();
        }
        self.disconnect();
        if let Some(sweeper) = sweeper {
            sweeper
                .stop_and_join_async(self.shared.config.shutdown_timeout())
                .await;
        }
    }
}

/// A borrowed handle from [`PersistentConnection::session`].
///
/// Dereferences to the driver handle and refreshes the connection's
/// last-used time when dropped.
pub struct Session<'a, F: HandleFactory> {
    conn: &'a PersistentConnection<F>,
    handle: Arc<F::Handle>,
}

impl<F: HandleFactory> Session<'_, F> {
    pub fn handle(&self) -> &Arc<F::Handle> {
        &self.handle
    }
}

impl<F: HandleFactory> Deref for Session<'_, F> {
    type Target = F::Handle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<F: HandleFactory> Drop for Session<'_, F> {
    fn drop(&mut self) {
        self.conn.touch();
    }
}
