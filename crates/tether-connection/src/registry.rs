//! Connection registry
//!
//! Maps a connection key to the single live lifecycle for that key. The
//! registry holds only weak references: once every caller has dropped its
//! `Arc`, the lifecycle tears itself down and the next lookup builds a new one.

#[cfg(test)]
mod tests;

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock, Weak};
use tether_core::{ConnectionKey, Result, TetherError};

use crate::lifecycle::ManagedConnection;

struct Entry {
    lifecycle: Weak<dyn ManagedConnection>,
    /// Same allocation, kept for downcasting back to the concrete type.
    any: Weak<dyn Any + Send + Sync>,
}

impl Entry {
    fn new<L: ManagedConnection>(lifecycle: &Arc<L>) -> Self {
        let weak = Arc::downgrade(lifecycle);
        Self {
            lifecycle: weak.clone(),
            any: weak,
        }
    }

    fn is_live(&self) -> bool {
        self.lifecycle.strong_count() > 0
    }
}

/// Keyed store of persistent connections.
///
/// All operations serialise on one registry-wide lock. Lifecycles are built
/// under that lock, so two racing `get_or_create` calls for the same key
/// always return the same instance.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<ConnectionKey, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static ConnectionRegistry {
        static GLOBAL: OnceLock<ConnectionRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ConnectionRegistry::new)
    }

    /// Return the live lifecycle for `key`, or build and register one.
    ///
    /// `build` only runs when no live lifecycle exists. Asking for a key that
    /// is registered with a different lifecycle type (for example a blocking
    /// lifecycle where an async one was requested) is an
    /// [`UnsupportedOperation`](TetherError::UnsupportedOperation) error.
    #[tracing::instrument(skip(self, key, build), fields(key = %key))]
    pub fn get_or_create<L, B>(&self, key: &ConnectionKey, build: B) -> Result<Arc<L>>
    where
        L: ManagedConnection,
        B: FnOnce() -> L,
    {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(key) {
            if let Some(existing) = entry.any.upgrade() {
                return existing.downcast::<L>().map_err(|_| {
                    let mode = entry
                        .lifecycle
                        .upgrade()
                        .map(|lifecycle| lifecycle.mode().to_string())
                        .unwrap_or_else(|| "different".into());
                    TetherError::UnsupportedOperation(format!(
                        "connection '{key}' is already registered as a {mode} lifecycle of another type"
                    ))
                });
            }
        }

        entries.retain(|_, entry| entry.is_live());

        let lifecycle = Arc::new(build());
        entries.insert(key.clone(), Entry::new(&lifecycle));
        tracing::debug!(mode = %lifecycle.mode(), "registered persistent connection");
        Ok(lifecycle)
    }

    /// Live lifecycle for `key`, if it exists and has type `L`.
    pub fn get<L: ManagedConnection>(&self, key: &ConnectionKey) -> Option<Arc<L>> {
        let entries = self.entries.lock();
        let existing = entries.get(key)?.any.upgrade()?;
        existing.downcast::<L>().ok()
    }

    /// Type-erased view of the live lifecycle for `key`.
    pub fn get_managed(&self, key: &ConnectionKey) -> Option<Arc<dyn ManagedConnection>> {
        self.entries.lock().get(key)?.lifecycle.upgrade()
    }

    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.entries.lock().get(key).is_some_and(Entry::is_live)
    }

    /// Number of live lifecycles.
    pub fn len(&self) -> usize {
        self.entries.lock().values().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of live lifecycles, sorted.
    pub fn keys(&self) -> Vec<ConnectionKey> {
        let mut keys: Vec<_> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Forget `key` without shutting its lifecycle down.
    ///
    /// Current holders keep working; the next `get_or_create` builds a new
    /// lifecycle. Returns whether a live entry was removed.
    pub fn remove(&self, key: &ConnectionKey) -> bool {
        self.entries
            .lock()
            .remove(key)
            .is_some_and(|entry| entry.is_live())
    }

    /// Remove `key` and shut its lifecycle down. Returns whether one was live.
    pub fn shutdown(&self, key: &ConnectionKey) -> bool {
        let lifecycle = self
            .entries
            .lock()
            .remove(key)
            .and_then(|entry| entry.lifecycle.upgrade());

        match lifecycle {
            Some(lifecycle) => {
                shutdown_guarded(key, lifecycle.as_ref());
                true
            }
            None => false,
        }
    }

    /// Shut down every registered lifecycle and empty the registry.
    ///
    /// The registry is cleared under the lock; the lifecycles themselves are
    /// shut down after it is released. A panicking shutdown is logged and does
    /// not stop the others. Safe to call repeatedly.
    pub fn shutdown_all(&self) {
        let lifecycles = self.drain();
        let count = lifecycles.len();

        for (key, lifecycle) in lifecycles {
            shutdown_guarded(&key, lifecycle.as_ref());
        }

        tracing::info!(count, "all persistent connections shut down");
    }

    /// Async counterpart of [`shutdown_all`](Self::shutdown_all).
    pub async fn shutdown_all_async(&self) {
        let lifecycles = self.drain();
        let count = lifecycles.len();

        for (key, lifecycle) in lifecycles {
            let result = AssertUnwindSafe(lifecycle.shutdown_async())
                .catch_unwind()
                .await;
            if let Err(panic) = result {
                tracing::warn!(
                    key = %key,
                    error = panic_message(panic.as_ref()),
                    "error shutting down persistent connection"
                );
            }
        }

        tracing::info!(count, "all persistent connections shut down");
    }

    fn drain(&self) -> Vec<(ConnectionKey, Arc<dyn ManagedConnection>)> {
        self.entries
            .lock()
            .drain()
            .filter_map(|(key, entry)| entry.lifecycle.upgrade().map(|l| (key, l)))
            .collect()
    }
}

fn shutdown_guarded(key: &ConnectionKey, lifecycle: &dyn ManagedConnection) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| lifecycle.shutdown())) {
        tracing::warn!(
            key = %key,
            error = panic_message(panic.as_ref()),
            "error shutting down persistent connection"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
