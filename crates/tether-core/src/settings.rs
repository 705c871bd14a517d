//! Per-backend connection settings
//!
//! Settings start from built-in defaults for each backend, then take values
//! from an optional TOML file and finally from environment variables named
//! `<PREFIX>_<FIELD>` (for example `POSTGRESQL_HOST` or `MYSQL_CONN_MAX_RETRIES`).
//! A `.env` file in the working directory is loaded once per process before
//! the environment is read.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Once;

use crate::{BackendKind, ConnectionTarget, Result, TetherError};


static DOTENV: Once = Once::new();

/// Plain retry settings as read from configuration.
///
/// Delays are in seconds. Validation happens when these are turned into a
/// runtime retry policy, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub enable_retry: bool,
    pub max_retries: u32,
    pub initial_retry_delay: f64,
    pub max_retry_delay: f64,
    pub jitter: f64,
}

impl RetrySettings {
    fn connection_defaults(kind: BackendKind) -> Self {
        // File-based databases rarely benefit from reconnect storms
        let (enable_retry, max_retries) = if kind.is_file_based() {
            (false, 1)
        } else {
            (true, 3)
        };
        Self {
            enable_retry,
            max_retries,
            initial_retry_delay: 1.0,
            max_retry_delay: 30.0,
            jitter: 0.1,
        }
    }

    fn operation_defaults(kind: BackendKind) -> Self {
        let (enable_retry, max_retries) = if kind.is_file_based() {
            (false, 1)
        } else {
            (true, 3)
        };
        Self {
            enable_retry,
            max_retries,
            initial_retry_delay: 0.5,
            max_retry_delay: 10.0,
            jitter: 0.1,
        }
    }
}

/// Connection settings for one backend.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database name, Oracle service name, or SQLite file path.
    pub database: String,
    /// Retry policy for establishing connections.
    pub connection_retry: RetrySettings,
    /// Retry policy for driver calls made through a live connection.
    ///
    /// Lifecycles never read this. It is for callers that wrap their own
    /// driver calls in `retry_operation`, typically via
    /// `RetryPolicy::try_from(&settings.operation_retry)`.
    pub operation_retry: RetrySettings,
    /// Seconds of inactivity before a persistent connection is closed.
    pub idle_timeout_secs: u64,
    /// Seconds between idle checks.
    pub health_check_interval_secs: u64,
}

impl BackendSettings {
    /// Built-in defaults for a backend.
    pub fn defaults_for(kind: BackendKind) -> Self {
        let (host, port, user, password, database) = match kind {
            BackendKind::Sqlite => ("", 0, "", "", "sqlite.db"),
            BackendKind::Postgres => ("localhost", 5432, "postgres", "postgres", "postgres"),
            BackendKind::Mysql => ("localhost", 3306, "root", "root", "dev"),
            BackendKind::Mssql => ("localhost", 1433, "sa", "sa", "master"),
            BackendKind::Oracle => ("localhost", 1521, "system", "oracle", "xe"),
            BackendKind::Mongodb => ("localhost", 27017, "admin", "admin", "admin"),
        };

        Self {
            kind,
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            database: database.to_string(),
            connection_retry: RetrySettings::connection_defaults(kind),
            operation_retry: RetrySettings::operation_defaults(kind),
            idle_timeout_secs: 300,
            health_check_interval_secs: 30,
        }
    }

    /// Defaults overlaid with `.env` and process environment variables.
    pub fn from_env(kind: BackendKind) -> Result<Self> {
        Self::load(kind, None)
    }

    /// Defaults, then the settings file (if any), then the environment.
    pub fn load(kind: BackendKind, file: Option<&SettingsFile>) -> Result<Self> {
        ensure_dotenv_loaded();

        let mut settings = match file {
            Some(file) => file.settings_for(kind)?,
            None => Self::defaults_for(kind),
        };

        let prefix = kind.env_prefix();
        settings.overlay(|field| std::env::var(format!("{}_{}", prefix, field)).ok(), prefix)?;
        Ok(settings)
    }

    /// The connection target described by these settings.
    pub fn target(&self) -> ConnectionTarget {
        if self.kind.is_file_based() {
            ConnectionTarget::file(self.kind, self.database.clone())
        } else {
            ConnectionTarget::new(
                self.kind,
                self.host.clone(),
                self.port,
                self.user.clone(),
                self.database.clone(),
            )
            .with_password(self.password.clone())
        }
    }

    /// Name of the field that holds `database` for this backend.
    fn database_field(&self) -> &'static str {
        match self.kind {
            BackendKind::Sqlite => "FILE_PATH",
            BackendKind::Oracle => "SERVICENAME",
            _ => "DATABASE",
        }
    }

    /// Apply values from `lookup`, keyed by upper-case field name.
    ///
    /// `origin` only shows up in error messages.
    pub(crate) fn overlay<L>(&mut self, lookup: L, origin: &str) -> Result<()>
    where
        L: Fn(&str) -> Option<String>,
    {
        let get = |field: &str| lookup(field).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.host = v;
        }
        if let Some(v) = get("PORT") {
            self.port = parse_value(origin, "PORT", &v)?;
        }
        if let Some(v) = get("USER") {
            self.user = v;
        }
        if let Some(v) = get("PASSWORD") {
            self.password = v;
        }
        if let Some(v) = get(self.database_field()) {
            self.database = v;
        }

        overlay_retry(&mut self.connection_retry, &get, origin, "CONN")?;
        overlay_retry(&mut self.operation_retry, &get, origin, "OP")?;

        if let Some(v) = get("CONN_DISCONNECT_IDLE_TIMEOUT") {
            self.idle_timeout_secs = parse_value(origin, "CONN_DISCONNECT_IDLE_TIMEOUT", &v)?;
        }
        if let Some(v) = get("CONN_HEALTH_CHECK_INTERVAL") {
            self.health_check_interval_secs =
                parse_value(origin, "CONN_HEALTH_CHECK_INTERVAL", &v)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSettings")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("connection_retry", &self.connection_retry)
            .field("operation_retry", &self.operation_retry)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("health_check_interval_secs", &self.health_check_interval_secs)
            .finish()
    }
}

fn overlay_retry<G>(retry: &mut RetrySettings, get: &G, origin: &str, group: &str) -> Result<()>
where
    G: Fn(&str) -> Option<String>,
{
    let field = |name: &str| format!("{}_{}", group, name);

    if let Some(v) = get(&field("ENABLE_RETRY")) {
        retry.enable_retry = parse_bool(origin, &field("ENABLE_RETRY"), &v)?;
    }
    if let Some(v) = get(&field("MAX_RETRIES")) {
        retry.max_retries = parse_value(origin, &field("MAX_RETRIES"), &v)?;
    }
    if let Some(v) = get(&field("INITIAL_RETRY_DELAY")) {
        retry.initial_retry_delay = parse_value(origin, &field("INITIAL_RETRY_DELAY"), &v)?;
    }
    if let Some(v) = get(&field("MAX_RETRY_DELAY")) {
        retry.max_retry_delay = parse_value(origin, &field("MAX_RETRY_DELAY"), &v)?;
    }
    if let Some(v) = get(&field("JITTER")) {
        retry.jitter = parse_value(origin, &field("JITTER"), &v)?;
    }
    Ok(())
}

fn parse_value<T: FromStr>(origin: &str, field: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        TetherError::Configuration(format!(
            "invalid value for {}_{}: '{}'",
            origin, field, raw
        ))
    })
}

fn parse_bool(origin: &str, field: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TetherError::Configuration(format!(
            "invalid boolean for {}_{}: '{}'",
            origin, field, raw
        ))),
    }
}

fn ensure_dotenv_loaded() {
    DOTENV.call_once(|| match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = ?path, "loaded .env file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env file"),
    });
}

/// Settings read from a TOML document with one table per backend.
///
/// ```toml
/// [postgres]
/// host = "db.internal"
/// conn_max_retries = 5
///
/// [sqlite]
/// file_path = "/var/lib/app/app.db"
/// ```
#[derive(Debug, Clone, Default)]
pub struct SettingsFile {
    tables: HashMap<BackendKind, toml::Table>,
}

impl SettingsFile {
    /// Default location: `<config_dir>/tether/settings.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tether").join("settings.toml"))
    }

    /// Read and parse a settings file.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = ?path, "loading settings file");
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse settings from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let document: toml::Table = toml::from_str(content)
            .map_err(|e| TetherError::Configuration(format!("invalid settings file: {}", e)))?;

        let mut tables = HashMap::new();
        for (name, value) in document {
            let kind = BackendKind::from_name(&name).ok_or_else(|| {
                TetherError::Configuration(format!("unknown backend section [{}]", name))
            })?;
            let toml::Value::Table(table) = value else {
                return Err(TetherError::Configuration(format!(
                    "section [{}] must be a table",
                    name
                )));
            };
            tables.insert(kind, table);
        }

        Ok(Self { tables })
    }

    /// Whether the file has a section for `kind`.
    pub fn has_section(&self, kind: BackendKind) -> bool {
        self.tables.contains_key(&kind)
    }

    /// Defaults for `kind` overlaid with this file's section, if present.
    pub fn settings_for(&self, kind: BackendKind) -> Result<BackendSettings> {
        let mut settings = BackendSettings::defaults_for(kind);
        if let Some(table) = self.tables.get(&kind) {
            let lookup = |field: &str| {
                table.get(&field.to_ascii_lowercase()).map(|value| match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            };
            settings.overlay(lookup, kind.scheme())?;
        }
        Ok(settings)
    }
}
