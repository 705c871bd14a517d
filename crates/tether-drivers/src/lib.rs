//! Tether Drivers - Handle factories for concrete databases
//!
//! Each driver module provides a factory for the lifecycle flavour its client
//! library needs, plus an `open_*` helper that builds the lifecycle from
//! [`BackendSettings`] and registers it:
//!
//! - `sqlite` - rusqlite, blocking
//! - `postgres` - tokio-postgres, async

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConnection, PostgresFactory, open_postgres};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnection, SqliteFactory, SqliteHandle, open_sqlite};

#[cfg(any(feature = "sqlite", feature = "postgres"))]
use tether_connection::{LifecycleConfig, RetryPolicy};
#[cfg(any(feature = "sqlite", feature = "postgres"))]
use tether_core::{BackendKind, BackendSettings, Result, TetherError};

/// Lifecycle and connect-retry configuration derived from `settings`.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
fn lifecycle_parts(
    settings: &BackendSettings,
    expected: BackendKind,
) -> Result<(LifecycleConfig, RetryPolicy)> {
    if settings.kind != expected {
        return Err(TetherError::Configuration(format!(
            "expected {} settings, got {}",
            expected, settings.kind
        )));
    }

    let config = LifecycleConfig::try_from(settings)?;
    let retry = RetryPolicy::try_from(&settings.connection_retry)?;
    Ok((config, retry))
}
