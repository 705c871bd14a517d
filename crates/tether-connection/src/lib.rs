//! Tether Connection - Persistent, keyed database connections
//!
//! This crate keeps one shared driver handle per logical connection target:
//!
//! - `retry` - Transient-failure classification and jittered exponential backoff
//! - `lifecycle` - Connect / reconnect / disconnect state machine with an idle sweeper,
//!   in blocking and async flavours
//! - `registry` - Process-wide map from connection key to lifecycle, with weak ownership

pub mod lifecycle;
pub mod registry;
pub mod retry;

pub use lifecycle::{
    AsyncPersistentConnection, AsyncSession, ConnectionMode, ConnectionState, LifecycleConfig,
    ManagedConnection, PersistentConnection, Session,
};
pub use registry::ConnectionRegistry;
pub use retry::{
    RetryPolicy, RetryPolicyBuilder, is_transient, retry_operation, retry_operation_async,
};
