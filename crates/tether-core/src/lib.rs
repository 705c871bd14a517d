//! Tether Core - Shared types for persistent database connections
//!
//! This crate provides the pieces every other tether crate depends on:
//!
//! - `TetherError` - Error taxonomy and `Result` alias
//! - `BackendKind`, `ConnectionKey`, `ConnectionTarget` - Identity of a logical connection
//! - `HandleFactory` / `AsyncHandleFactory` - Driver-supplied create/probe/close hooks
//! - `settings` - Per-backend defaults from the environment or a TOML file

mod driver;
mod error;
mod key;
pub mod settings;

pub use driver::*;
pub use error::*;
pub use key::*;
pub use settings::{BackendSettings, RetrySettings, SettingsFile};
