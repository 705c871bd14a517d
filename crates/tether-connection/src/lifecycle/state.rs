//! Connection state and activity tracking

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Where a lifecycle is in its connect / disconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No handle. Initial state, and the state after any disconnect.
    #[default]
    Disconnected,
    /// A connect call is establishing a new handle.
    Connecting,
    /// A handle is held and was live at the last check.
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Lock-free copy of the state so readers never wait on an in-flight connect.
///
/// Writes only happen while the owning lifecycle holds its handle lock.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Disconnected.to_u8()))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Enter `Connecting`; falls back to `Disconnected` unless finished.
    ///
    /// Covers a connect future dropped mid-flight and a panicking factory.
    pub(crate) fn begin_connect(&self) -> ConnectingGuard<'_> {
        self.store(ConnectionState::Connecting);
        ConnectingGuard {
            cell: self,
            armed: true,
        }
    }
}

pub(crate) struct ConnectingGuard<'a> {
    cell: &'a StateCell,
    armed: bool,
}

impl ConnectingGuard<'_> {
    pub(crate) fn finish(mut self, state: ConnectionState) {
        self.armed = false;
        self.cell.store(state);
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cell.store(ConnectionState::Disconnected);
        }
    }
}

/// Last-used timestamp, updatable without taking the handle lock.
pub(crate) struct Activity {
    origin: Instant,
    last_used_nanos: AtomicU64,
}

impl Activity {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_used_nanos: AtomicU64::new(0),
        }
    }

    pub(crate) fn touch(&self) {
        let nanos = self.origin.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        self.last_used_nanos.fetch_max(nanos, Ordering::SeqCst);
    }

    pub(crate) fn idle_for(&self) -> Duration {
        let last_used = Duration::from_nanos(self.last_used_nanos.load(Ordering::SeqCst));
        self.origin.elapsed().saturating_sub(last_used)
    }
}
