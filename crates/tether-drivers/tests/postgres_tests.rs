#![cfg(feature = "postgres")]

//! PostgreSQL factory tests that need no running server

use pretty_assertions::assert_eq;
use tether_connection::{
    AsyncPersistentConnection, ConnectionMode, ConnectionRegistry, ConnectionState,
    LifecycleConfig, ManagedConnection, RetryPolicy,
};
use tether_core::{BackendKind, BackendSettings, ConnectionTarget, TetherError};
use tether_drivers::postgres::{PostgresFactory, open_postgres};

fn unreachable_target() -> ConnectionTarget {
    ConnectionTarget::new(BackendKind::Postgres, "127.0.0.1", 1, "app", "orders")
        .with_password("hunter2")
}

#[test]
fn test_debug_hides_password() {
    let factory = PostgresFactory::from_target(&unreachable_target()).unwrap();
    let rendered = format!("{:?}", factory);
    assert!(rendered.contains("orders"));
    assert!(!rendered.contains("hunter2"));
}

#[test]
fn test_from_target_rejects_other_backends() {
    let err =
        PostgresFactory::from_target(&ConnectionTarget::file(BackendKind::Sqlite, "app.db"))
            .unwrap_err();
    assert!(matches!(err, TetherError::Configuration(_)));
}

#[test]
fn test_open_postgres_is_lazy() {
    let registry = ConnectionRegistry::new();
    let settings = BackendSettings::defaults_for(BackendKind::Postgres);

    let conn = open_postgres(&registry, &settings).unwrap();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.mode(), ConnectionMode::Async);
    assert_eq!(
        conn.key().as_str(),
        "postgresql://postgres@localhost:5432/postgres"
    );
    assert!(registry.contains(conn.key()));
}

#[tokio::test]
async fn test_refused_connect_surfaces_error() {
    let target = unreachable_target();
    let conn = AsyncPersistentConnection::new(
        target.key(),
        PostgresFactory::from_target(&target).unwrap(),
        LifecycleConfig::default().with_auto_reconnect(false),
        RetryPolicy::disabled(),
    );

    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, TetherError::Connection(_)));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(!conn.is_sweeper_running());
}
