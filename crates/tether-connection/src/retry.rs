//! Retry with exponential backoff for connection-like failures
//!
//! Failures are sorted into transient (connection-like, worth another try)
//! and terminal. Transient failures are retried with capped exponential
//! backoff plus symmetric jitter; terminal ones surface immediately.
//!
//! # Example
//!
//! ```ignore
//! use tether_connection::retry::{RetryPolicy, retry_operation};
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(2)
//!     .initial_delay(Duration::from_secs(1))
//!     .build()?;
//!
//! let handle = retry_operation(|| factory.create(), &policy, "orders_connect")?;
//! ```

mod classify;
mod executor;
mod policy;


pub use classify::{CONNECTION_ERROR_KEYWORDS, is_transient};
pub use executor::{retry_operation, retry_operation_async};
pub use policy::{RetryPolicy, RetryPolicyBuilder};
