//! Retry policy and backoff delay calculation

use rand::Rng;
use std::time::Duration;
use tether_core::{Result, RetrySettings, TetherError};

/// Exponent cap so `initial * 2^attempt` stays finite for any attempt count.
const MAX_EXPONENT: u32 = 62;

/// How a failing operation is retried.
///
/// Delays grow as `initial_delay * 2^attempt`, are capped at `max_delay`, and
/// are then spread by up to `±jitter_fraction` of the capped value so that
/// many callers reconnecting at once do not retry in lockstep.
///
/// A policy is validated when it is built; an invalid combination is an
/// error, never silently adjusted.
///
/// # Example
///
/// ```
/// use tether_connection::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::builder()
///     .max_attempts(4)
///     .initial_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_millis(500))
///     .jitter_fraction(0.0)
///     .build()
///     .unwrap();
///
/// assert_eq!(policy.base_delay(0), Duration::from_millis(100));
/// assert_eq!(policy.base_delay(1), Duration::from_millis(200));
/// assert_eq!(policy.base_delay(3), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    enabled: bool,
    /// Attempts allowed beyond the first
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
}

impl RetryPolicy {
    /// Create a validated policy.
    pub fn new(
        enabled: bool,
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        jitter_fraction: f64,
    ) -> Result<Self> {
        if max_delay < initial_delay {
            return Err(TetherError::Configuration(format!(
                "max_delay ({:?}) must be >= initial_delay ({:?})",
                max_delay, initial_delay
            )));
        }
        if !jitter_fraction.is_finite() || !(0.0..=1.0).contains(&jitter_fraction) {
            return Err(TetherError::Configuration(format!(
                "jitter_fraction must be between 0 and 1, got {}",
                jitter_fraction
            )));
        }

        Ok(Self {
            enabled,
            max_attempts,
            initial_delay,
            max_delay,
            jitter_fraction,
        })
    }

    /// Start building a policy from the defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// A policy that runs the operation exactly once.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Number of retries allowed after the first attempt.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Total invocations when every attempt fails transiently.
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    /// Capped exponential delay for a zero-based attempt index, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(MAX_EXPONENT) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * factor;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped_secs).unwrap_or(self.max_delay)
    }

    /// Delay to sleep before retrying after a failure at `attempt`.
    ///
    /// Always within `[base * (1 - jitter), base * (1 + jitter)]`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt);
        if self.jitter_fraction == 0.0 {
            return capped;
        }

        let capped_secs = capped.as_secs_f64();
        let range = capped_secs * self.jitter_fraction;
        let offset = rand::thread_rng().gen_range(-range..=range);
        let jittered = (capped_secs + offset).max(0.0);
        Duration::try_from_secs_f64(jittered).unwrap_or(capped)
    }
}

impl Default for RetryPolicy {
    /// Default policy: enabled, 3 retries, 1s initial, 30s max, 10% jitter
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.1,
        }
    }
}

impl TryFrom<&RetrySettings> for RetryPolicy {
    type Error = TetherError;

    fn try_from(settings: &RetrySettings) -> Result<Self> {
        let seconds = |name: &str, value: f64| {
            Duration::try_from_secs_f64(value).map_err(|_| {
                TetherError::Configuration(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, value
                ))
            })
        };

        Self::new(
            settings.enable_retry,
            settings.max_retries,
            seconds("initial_retry_delay", settings.initial_retry_delay)?,
            seconds("max_retry_delay", settings.max_retry_delay)?,
            settings.jitter,
        )
    }
}

/// Builder for [`RetryPolicy`]; `build` performs validation.
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    enabled: bool,
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            enabled: defaults.enabled,
            max_attempts: defaults.max_attempts,
            initial_delay: defaults.initial_delay,
            max_delay: defaults.max_delay,
            jitter_fraction: defaults.jitter_fraction,
        }
    }
}

impl RetryPolicyBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    pub fn build(self) -> Result<RetryPolicy> {
        RetryPolicy::new(
            self.enabled,
            self.max_attempts,
            self.initial_delay,
            self.max_delay,
            self.jitter_fraction,
        )
    }
}
