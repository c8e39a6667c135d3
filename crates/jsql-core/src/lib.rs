//! # jsql-core
//!
//! Core types shared by every jsql crate. This crate has no jsql
//! dependencies and provides the foundation for the others.
//!
//! ## Modules
//!
//! - [`error`] - The [`JsqlError`] taxonomy and result alias
//! - [`safe`] - The allow-list grammar for interpolated values
//! - [`settings`] - Runtime configuration
//! - [`settings_loader`] - Loading settings from TOML, JSON, and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod safe;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{JsqlError, JsqlResult};
pub use safe::is_safe;
pub use settings::Settings;
