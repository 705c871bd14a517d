//! Persistent connection lifecycle
//!
//! A lifecycle owns at most one driver handle for one connection key. It
//! connects lazily, probes the cached handle before every reuse, reconnects
//! through the retry executor when the probe fails, and runs a background
//! sweeper that closes the handle after a period of inactivity.
//!
//! Two flavours share the same state machine:
//!
//! - [`PersistentConnection`] for blocking drivers, with a sweeper thread
//! - [`AsyncPersistentConnection`] for async drivers, with a sweeper task
//!
//! # Example
//!
//! ```ignore
//! use tether_connection::{LifecycleConfig, PersistentConnection, RetryPolicy};
//!
//! let conn = PersistentConnection::new(key, factory, LifecycleConfig::default(), RetryPolicy::default());
//! {
//!     let session = conn.session()?;
//!     session.lock().execute("INSERT INTO events DEFAULT VALUES", [])?;
//! } // last-used time refreshed here
//! conn.shutdown();
//! ```

mod blocking;
mod config;
mod nonblocking;
mod state;
mod sweeper;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tether_core::ConnectionKey;

pub use blocking::{PersistentConnection, Session};
pub use config::LifecycleConfig;
pub use nonblocking::{AsyncPersistentConnection, AsyncSession};
pub use state::ConnectionState;

/// Whether a lifecycle drives a blocking or an async driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Blocking,
    Async,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Blocking => write!(f, "blocking"),
            ConnectionMode::Async => write!(f, "async"),
        }
    }
}

/// Type-erased view of a lifecycle, as stored by the registry.
#[async_trait]
pub trait ManagedConnection: Send + Sync + 'static {
    fn key(&self) -> &ConnectionKey;

    fn mode(&self) -> ConnectionMode;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Stop the sweeper and release the handle without awaiting anything.
    ///
    /// Async lifecycles hand their async close to the current runtime, if any.
    fn shutdown(&self);

    /// Stop the sweeper, close the handle and wait (bounded) for the sweeper to exit.
    async fn shutdown_async(&self);
}
