//! Connection identity: backend kinds, targets and registry keys

use serde::{Deserialize, Serialize};
use std::fmt;

/// Database backend a connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Postgres,
    Mysql,
    Mssql,
    Oracle,
    Mongodb,
}

impl BackendKind {
    /// All supported backends, in a stable order.
    pub const ALL: [BackendKind; 6] = [
        BackendKind::Sqlite,
        BackendKind::Postgres,
        BackendKind::Mysql,
        BackendKind::Mssql,
        BackendKind::Oracle,
        BackendKind::Mongodb,
    ];

    /// URL scheme used as the first segment of a connection key.
    pub fn scheme(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgres => "postgresql",
            BackendKind::Mysql => "mysql",
            BackendKind::Mssql => "mssql",
            BackendKind::Oracle => "oracle",
            BackendKind::Mongodb => "mongodb",
        }
    }

    /// Prefix for environment variables holding this backend's settings.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "SQLITE",
            BackendKind::Postgres => "POSTGRESQL",
            BackendKind::Mysql => "MYSQL",
            BackendKind::Mssql => "MSSQL",
            BackendKind::Oracle => "ORACLE",
            BackendKind::Mongodb => "MONGODB",
        }
    }

    /// Whether the backend is file-based (no host, port or credentials).
    pub fn is_file_based(&self) -> bool {
        matches!(self, BackendKind::Sqlite)
    }

    /// Parse a backend from its scheme or a common alias.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(BackendKind::Sqlite),
            "postgres" | "postgresql" | "pg" => Some(BackendKind::Postgres),
            "mysql" | "mariadb" => Some(BackendKind::Mysql),
            "mssql" | "sqlserver" => Some(BackendKind::Mssql),
            "oracle" => Some(BackendKind::Oracle),
            "mongodb" | "mongo" => Some(BackendKind::Mongodb),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Stable identifier of a logical connection target.
///
/// Two targets that differ only in their password share a key. The key is
/// what the registry uses to hand out one lifecycle per target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    /// Derive the key for a network backend: `<scheme>://<user>@<host>:<port>/<database>`.
    ///
    /// `user` and `host` are percent-encoded so a `@`, `:` or `/` inside them
    /// cannot make two different targets share a key.
    pub fn new(kind: BackendKind, user: &str, host: &str, port: u16, database: &str) -> Self {
        Self(format!(
            "{}://{}@{}:{}/{}",
            kind.scheme(),
            urlencoding::encode(user),
            urlencoding::encode(host),
            port,
            database
        ))
    }

    /// Derive the key for a file-based backend: `<scheme>:///<path>`.
    pub fn for_file(kind: BackendKind, path: &str) -> Self {
        Self(format!("{}:///{}", kind.scheme(), path))
    }

    /// Derive the key for a full connection target.
    pub fn for_target(target: &ConnectionTarget) -> Self {
        if target.kind.is_file_based() {
            Self::for_file(target.kind, &target.database)
        } else {
            Self::new(
                target.kind,
                &target.user,
                &target.host,
                target.port,
                &target.database,
            )
        }
    }

    /// Wrap an already-derived key, e.g. for custom drivers.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where and as whom to connect.
///
/// For file-based backends `database` holds the file path and the network
/// fields are ignored.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub kind: BackendKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl ConnectionTarget {
    /// Create a target for a network backend.
    pub fn new(
        kind: BackendKind,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            user: user.into(),
            password: String::new(),
            database: database.into(),
        }
    }

    /// Create a target for a file-based backend.
    pub fn file(kind: BackendKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            database: path.into(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// The registry key for this target.
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::for_target(self)
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}
