//! Tests for the connection registry

use super::*;
use crate::lifecycle::{
    AsyncPersistentConnection, ConnectionMode, ConnectionState, LifecycleConfig,
    PersistentConnection,
};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tether_core::{AsyncHandleFactory, HandleFactory};

#[derive(Default)]
struct CountingFactory {
    creates: AtomicUsize,
    closes: AtomicUsize,
}

impl HandleFactory for CountingFactory {
    type Handle = usize;

    fn create(&self) -> Result<usize> {
        Ok(self.creates.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn probe(&self, _handle: &usize) -> bool {
        true
    }

    fn close(&self, _handle: Arc<usize>) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AsyncHandleFactory for CountingFactory {
    type Handle = usize;

    async fn create(&self) -> Result<usize> {
        Ok(self.creates.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn probe(&self, _handle: &usize) -> bool {
        true
    }

    async fn close(&self, _handle: Arc<usize>) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type Blocking = PersistentConnection<Arc<CountingFactory>>;
type Async = AsyncPersistentConnection<Arc<CountingFactory>>;

fn key(name: &str) -> ConnectionKey {
    ConnectionKey::from_raw(format!("sqlite:///{name}.db"))
}

fn blocking(key: &ConnectionKey, factory: &Arc<CountingFactory>) -> Blocking {
    PersistentConnection::new(
        key.clone(),
        factory.clone(),
        LifecycleConfig::default(),
        RetryPolicy::disabled(),
    )
}

fn nonblocking(key: &ConnectionKey, factory: &Arc<CountingFactory>) -> Async {
    AsyncPersistentConnection::new(
        key.clone(),
        factory.clone(),
        LifecycleConfig::default(),
        RetryPolicy::disabled(),
    )
}

/// Lifecycle whose shutdown always panics.
struct Exploding(ConnectionKey);

#[async_trait]
impl ManagedConnection for Exploding {
    fn key(&self) -> &ConnectionKey {
        &self.0
    }

    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Blocking
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Connected
    }

    fn shutdown(&self) {
        panic!("driver exploded");
    }

    async fn shutdown_async(&self) {
        panic!("driver exploded");
    }
}

mod lookup_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_same_key_returns_same_instance() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let k = key("orders");

        let first = registry.get_or_create(&k, || blocking(&k, &factory)).unwrap();
        let second: Arc<Blocking> = registry
            .get_or_create(&k, || panic!("must not build twice"))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&k));
    }

    #[test]
    fn test_concurrent_get_or_create_builds_once() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let k = key("orders");
        let builds = AtomicUsize::new(0);
        let barrier = std::sync::Barrier::new(16);

        let conns: Vec<Arc<Blocking>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry
                            .get_or_create(&k, || {
                                builds.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(std::time::Duration::from_millis(50));
                                blocking(&k, &factory)
                            })
                            .unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(conns.iter().all(|conn| Arc::ptr_eq(conn, &conns[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_different_keys_are_independent() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let (a, b) = (key("a"), key("b"));

        let first = registry.get_or_create(&a, || blocking(&a, &factory)).unwrap();
        let second = registry.get_or_create(&b, || blocking(&b, &factory)).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.keys(), vec![a, b]);
    }

    #[test]
    fn test_dropped_lifecycle_is_rebuilt() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let k = key("orders");

        let first = registry.get_or_create(&k, || blocking(&k, &factory)).unwrap();
        first.connect().unwrap();
        drop(first);

        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
        assert!(!registry.contains(&k));
        assert!(registry.is_empty());

        let mut built = false;
        let second = registry
            .get_or_create(&k, || {
                built = true;
                blocking(&k, &factory)
            })
            .unwrap();
        assert!(built);
        assert_eq!(second.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_mode_mismatch_is_rejected() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let k = key("orders");

        let _held = registry.get_or_create(&k, || blocking(&k, &factory)).unwrap();
        let err = registry
            .get_or_create(&k, || nonblocking(&k, &factory))
            .unwrap_err();

        assert!(matches!(err, TetherError::UnsupportedOperation(_)));
        assert!(err.to_string().contains("blocking"));
    }

    #[test]
    fn test_typed_and_erased_get() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let k = key("orders");

        assert!(registry.get::<Blocking>(&k).is_none());
        let held = registry.get_or_create(&k, || blocking(&k, &factory)).unwrap();

        assert!(registry.get::<Blocking>(&k).is_some());
        assert!(registry.get::<Async>(&k).is_none());
        assert_eq!(registry.get_managed(&k).unwrap().mode(), ConnectionMode::Blocking);
        drop(held);
        assert!(registry.get_managed(&k).is_none());
    }

    #[test]
    fn test_remove_leaves_holders_working() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let k = key("orders");

        let held = registry.get_or_create(&k, || blocking(&k, &factory)).unwrap();
        assert!(registry.remove(&k));
        assert!(!registry.remove(&k));

        assert!(held.connect().is_ok());
        let fresh = registry.get_or_create(&k, || blocking(&k, &factory)).unwrap();
        assert!(!Arc::ptr_eq(&held, &fresh));
        held.shutdown();
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(
            ConnectionRegistry::global(),
            ConnectionRegistry::global()
        ));
    }
}

mod eviction_tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_registered_connection_goes_idle() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let k = key("idle");
        let config = LifecycleConfig::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap();

        let conn = registry
            .get_or_create(&k, || {
                PersistentConnection::new(k.clone(), factory.clone(), config, RetryPolicy::disabled())
            })
            .unwrap();
        conn.connect().unwrap();
        assert!(conn.is_connected());

        std::thread::sleep(Duration::from_secs(3));

        assert!(!conn.is_connected());
        assert!(registry.contains(&k));
        assert!(conn.connect().is_ok());
        registry.shutdown_all();
    }
}

mod shutdown_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_shutdown_all_on_empty_registry() {
        let registry = ConnectionRegistry::new();
        registry.shutdown_all();
        registry.shutdown_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_shutdown_all_closes_everything() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let (a, b) = (key("a"), key("b"));

        let first = registry.get_or_create(&a, || blocking(&a, &factory)).unwrap();
        let second = registry.get_or_create(&b, || blocking(&b, &factory)).unwrap();
        first.connect().unwrap();
        second.connect().unwrap();

        registry.shutdown_all();

        assert!(registry.is_empty());
        assert_eq!(factory.closes.load(Ordering::SeqCst), 2);
        assert!(!first.is_connected());
        assert!(!second.is_sweeper_running());
    }

    #[test]
    fn test_shutdown_all_survives_panicking_lifecycle() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let (bad, good) = (key("bad"), key("good"));

        let _exploding = registry
            .get_or_create(&bad, || Exploding(bad.clone()))
            .unwrap();
        let healthy = registry.get_or_create(&good, || blocking(&good, &factory)).unwrap();
        healthy.connect().unwrap();

        registry.shutdown_all();

        assert!(registry.is_empty());
        assert!(!healthy.is_connected());
    }

    #[test]
    fn test_shutdown_single_key() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let k = key("orders");

        let held = registry.get_or_create(&k, || blocking(&k, &factory)).unwrap();
        held.connect().unwrap();

        assert!(registry.shutdown(&k));
        assert!(!registry.shutdown(&k));
        assert!(!held.is_connected());
    }

    #[tokio::test]
    async fn test_shutdown_all_async_mixed_modes() {
        let registry = ConnectionRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let (a, b, bad) = (key("a"), key("b"), key("bad"));

        let sync_conn = registry.get_or_create(&a, || blocking(&a, &factory)).unwrap();
        let async_conn = registry.get_or_create(&b, || nonblocking(&b, &factory)).unwrap();
        let _exploding = registry
            .get_or_create(&bad, || Exploding(bad.clone()))
            .unwrap();
        sync_conn.connect().unwrap();
        async_conn.connect().await.unwrap();

        registry.shutdown_all_async().await;

        assert!(registry.is_empty());
        assert!(!sync_conn.is_connected());
        assert!(!async_conn.is_connected());
        assert!(!async_conn.is_sweeper_running());
        assert_eq!(factory.closes.load(Ordering::SeqCst), 2);
    }
}
