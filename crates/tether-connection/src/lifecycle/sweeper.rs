//! Idle sweepers
//!
//! A sweeper wakes every health-check interval and asks its lifecycle to
//! evict the handle if it has been idle for too long. It never holds the
//! lifecycle's handle lock while sleeping.

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tether_core::ConnectionKey;
use tokio_util::sync::CancellationToken;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Eviction hook for the blocking sweeper thread.
pub(crate) trait Sweepable: Send + Sync + 'static {
    fn key(&self) -> &ConnectionKey;

    fn sweep(&self);
}

/// Eviction hook for the async sweeper task.
#[async_trait]
pub(crate) trait AsyncSweepable: Send + Sync + 'static {
    fn key(&self) -> &ConnectionKey;

    async fn sweep(&self);
}

/// One-shot stop flag a sweeper thread can wait on.
struct StopSignal {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cvar.notify_all();
    }

    /// Wait up to `timeout`; returns true once stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            let _ = self
                .cvar
                .wait_while_for(&mut stopped, |stopped| !*stopped, timeout);
        }
        *stopped
    }
}

pub(crate) struct SweeperThread {
    stop: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

impl SweeperThread {
    pub(crate) fn spawn<T: Sweepable>(target: Arc<T>, interval: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(StopSignal::new());
        let signal = stop.clone();

        let handle = thread::Builder::new()
            .name(format!("idle-sweeper-{}", target.key()))
            .spawn(move || {
                tracing::debug!(key = %target.key(), "idle sweeper started");
                while !signal.wait(interval) {
                    target.sweep();
                }
                tracing::debug!(key = %target.key(), "idle sweeper stopped");
            })?;

        Ok(Self { stop, handle })
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub(crate) fn stop(&self) {
        self.stop.stop();
    }

    /// Stop and wait up to `timeout` for the thread to exit.
    ///
    /// Returns false if the thread was left running.
    pub(crate) fn stop_and_join(self, timeout: Duration) -> bool {
        self.stop();
        let deadline = Instant::now() + timeout;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "idle sweeper did not stop in time, detaching"
                );
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        if self.handle.join().is_err() {
            tracing::warn!("idle sweeper panicked");
        }
        true
    }

    /// Like [`stop_and_join`](Self::stop_and_join), without blocking the runtime.
    pub(crate) async fn stop_and_join_async(self, timeout: Duration) -> bool {
        self.stop();
        let wait = async {
            while !self.handle.is_finished() {
                tokio::time::sleep(JOIN_POLL_INTERVAL).await;
            }
        };
        if tokio::time::timeout(timeout, wait).await.is_err() {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "idle sweeper did not stop in time, detaching"
            );
            return false;
        }
        if self.handle.join().is_err() {
            tracing::warn!("idle sweeper panicked");
        }
        true
    }
}

pub(crate) struct SweeperTask {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl SweeperTask {
    /// Spawn onto `runtime`.
    pub(crate) fn spawn<T: AsyncSweepable>(
        runtime: &tokio::runtime::Handle,
        target: Arc<T>,
        interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = runtime.spawn(async move {
            tracing::debug!(key = %target.key(), "idle sweeper started");
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(interval) => target.sweep().await,
                }
            }
            tracing::debug!(key = %target.key(), "idle sweeper stopped");
        });

        Self { token, handle }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and abort without waiting.
    pub(crate) fn abort(&self) {
        self.token.cancel();
        self.handle.abort();
    }

    /// Cancel and wait up to `timeout`; aborts the task on timeout.
    pub(crate) async fn stop_and_join(self, timeout: Duration) -> bool {
        self.token.cancel();
        let abort = self.handle.abort_handle();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                if err.is_panic() {
                    tracing::warn!("idle sweeper panicked");
                }
                true
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "idle sweeper did not stop in time, aborting"
                );
                abort.abort();
                false
            }
        }
    }
}
