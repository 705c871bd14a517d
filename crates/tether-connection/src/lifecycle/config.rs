//! Lifecycle configuration

use std::time::Duration;
use tether_core::{BackendSettings, Result, TetherError};

/// Idle-eviction and reconnect behaviour of a persistent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Disconnect after this much inactivity
    idle_timeout: Duration,
    /// How often the sweeper checks for inactivity
    health_check_interval: Duration,
    /// Route connects through the retry executor
    auto_reconnect: bool,
    /// Upper bound on waiting for the sweeper to exit during shutdown
    shutdown_timeout: Duration,
}

impl LifecycleConfig {
    /// Create a configuration; `health_check_interval` must be non-zero.
    pub fn new(idle_timeout: Duration, health_check_interval: Duration) -> Result<Self> {
        if health_check_interval.is_zero() {
            return Err(TetherError::Configuration(
                "health_check_interval must be greater than zero".into(),
            ));
        }

        Ok(Self {
            idle_timeout,
            health_check_interval,
            auto_reconnect: true,
            shutdown_timeout: Duration::from_secs(5),
        })
    }

    /// When false, a failed connect is surfaced after a single attempt.
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

impl Default for LifecycleConfig {
    /// Default: 5 minute idle timeout, 30 second checks, auto-reconnect on
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
            auto_reconnect: true,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl TryFrom<&BackendSettings> for LifecycleConfig {
    type Error = TetherError;

    fn try_from(settings: &BackendSettings) -> Result<Self> {
        Self::new(
            Duration::from_secs(settings.idle_timeout_secs),
            Duration::from_secs(settings.health_check_interval_secs),
        )
    }
}
