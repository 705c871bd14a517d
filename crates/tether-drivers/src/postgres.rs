//! PostgreSQL handle factory

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tether_connection::{AsyncPersistentConnection, ConnectionRegistry};
use tether_core::{
    AsyncHandleFactory, BackendKind, BackendSettings, ConnectionKey, ConnectionTarget, Result,
    TetherError,
};
use tokio_postgres::{Client, NoTls};

/// Persistent PostgreSQL connection.
pub type PostgresConnection = AsyncPersistentConnection<PostgresFactory>;

/// Connects with tokio-postgres over plain TCP.
///
/// The connection future returned by tokio-postgres is spawned on the
/// current runtime and lives until the client is dropped.
#[derive(Clone)]
pub struct PostgresFactory {
    config: tokio_postgres::Config,
}

impl PostgresFactory {
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }

    pub fn from_target(target: &ConnectionTarget) -> Result<Self> {
        if target.kind != BackendKind::Postgres {
            return Err(TetherError::Configuration(format!(
                "PostgreSQL factory cannot open a {} target",
                target.kind
            )));
        }

        let mut config = tokio_postgres::Config::new();
        config
            .host(&target.host)
            .port(target.port)
            .dbname(&target.database)
            .connect_timeout(Duration::from_secs(10));
        if !target.user.is_empty() {
            config.user(&target.user);
        }
        if !target.password.is_empty() {
            config.password(&target.password);
        }
        Ok(Self { config })
    }
}

impl std::fmt::Debug for PostgresFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresFactory")
            .field("hosts", &self.config.get_hosts())
            .field("ports", &self.config.get_ports())
            .field("dbname", &self.config.get_dbname())
            .field("user", &self.config.get_user())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AsyncHandleFactory for PostgresFactory {
    type Handle = Client;

    async fn create(&self) -> Result<Client> {
        let (client, connection) = self.config.connect(NoTls).await.map_err(|e| {
            TetherError::Connection(format!("Failed to connect to PostgreSQL: {}", e))
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(client)
    }

    async fn probe(&self, client: &Client) -> bool {
        !client.is_closed() && client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self, client: Arc<Client>) -> Result<()> {
        // Dropping the last client ends the spawned connection task.
        drop(client);
        Ok(())
    }
}

/// Get or register the persistent connection described by `settings`.
pub fn open_postgres(
    registry: &ConnectionRegistry,
    settings: &BackendSettings,
) -> Result<Arc<PostgresConnection>> {
    let (config, retry) = crate::lifecycle_parts(settings, BackendKind::Postgres)?;
    let target = settings.target();
    let factory = PostgresFactory::from_target(&target)?;
    let key = ConnectionKey::for_target(&target);

    registry.get_or_create(&key, || {
        AsyncPersistentConnection::new(key.clone(), factory, config, retry)
    })
}
