//! SQLite handle factory

use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags};
use std::sync::Arc;
use tether_connection::{ConnectionRegistry, PersistentConnection};
use tether_core::{
    BackendKind, BackendSettings, ConnectionKey, ConnectionTarget, HandleFactory, Result,
    TetherError,
};

/// A rusqlite connection; the mutex serialises statements across threads.
pub type SqliteHandle = Mutex<RusqliteConnection>;

/// Persistent SQLite connection.
pub type SqliteConnection = PersistentConnection<SqliteFactory>;

/// Opens SQLite databases by path, or in memory for `:memory:`.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    path: String,
}

impl SqliteFactory {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn from_target(target: &ConnectionTarget) -> Result<Self> {
        if target.kind != BackendKind::Sqlite {
            return Err(TetherError::Configuration(format!(
                "SQLite factory cannot open a {} target",
                target.kind
            )));
        }
        Ok(Self::new(target.database.clone()))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl HandleFactory for SqliteFactory {
    type Handle = SqliteHandle;

    fn create(&self) -> Result<SqliteHandle> {
        tracing::debug!(path = %self.path, "opening SQLite database");

        let conn = if self.path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                TetherError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            let file_path = std::path::Path::new(&self.path);
            if let Some(parent) = file_path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                return Err(TetherError::Configuration(format!(
                    "Parent directory does not exist: {}",
                    parent.display()
                )));
            }

            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            RusqliteConnection::open_with_flags(&self.path, flags).map_err(|e| {
                TetherError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    self.path, e
                ))
            })?
        };

        conn.pragma_update(None, "foreign_keys", "ON").map_err(|e| {
            TetherError::Connection(format!("Failed to enable foreign keys: {}", e))
        })?;

        Ok(Mutex::new(conn))
    }

    fn probe(&self, handle: &SqliteHandle) -> bool {
        handle
            .lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn close(&self, handle: Arc<SqliteHandle>) -> Result<()> {
        match Arc::try_unwrap(handle) {
            Ok(conn) => conn.into_inner().close().map_err(|(_, e)| {
                TetherError::Connection(format!("Failed to close SQLite database: {}", e))
            }),
            Err(_) => {
                // A session still holds the handle; it closes when the last one drops.
                tracing::debug!(path = %self.path, "SQLite handle still in use, deferring close");
                Ok(())
            }
        }
    }
}

/// Get or register the persistent connection described by `settings`.
pub fn open_sqlite(
    registry: &ConnectionRegistry,
    settings: &BackendSettings,
) -> Result<Arc<SqliteConnection>> {
    let (config, retry) = crate::lifecycle_parts(settings, BackendKind::Sqlite)?;
    let target = settings.target();
    let factory = SqliteFactory::from_target(&target)?;
    let key = ConnectionKey::for_target(&target);

    registry.get_or_create(&key, || {
        PersistentConnection::new(key.clone(), factory, config, retry)
    })
}
