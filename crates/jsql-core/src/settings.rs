//! Settings for jsql.
//!
//! [`Settings`] holds the handful of knobs the pipeline needs: logging,
//! where named templates live, the bind-variable prefix, and the default
//! database. Settings are plain data; build them once at startup (see
//! [`settings_loader`](crate::settings_loader)) and pass them to whatever
//! constructs the template environment.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{JsqlError, JsqlResult};
use crate::safe::is_safe;

/// The default prefix for generated bind-variable names (`bp0`, `bp1`, ...).
pub const DEFAULT_BIND_PREFIX: &str = "bp";

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// The database engine (e.g. `sqlite`).
    pub engine: String,
    /// The database name, or file path for `SQLite` (`:memory:` for in-memory).
    pub name: String,
    /// Additional engine-specific options.
    pub options: HashMap<String, String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: "sqlite".to_string(),
            name: ":memory:".to_string(),
            options: HashMap::new(),
        }
    }
}

/// The complete set of jsql settings.
///
/// # Examples
///
/// ```
/// use jsql_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(!settings.debug);
/// assert_eq!(settings.bind_prefix, "bp");
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Whether debug mode is enabled (pretty logs instead of JSON).
    pub debug: bool,
    /// The log level filter (e.g. "info", "debug", "jsql_db=trace").
    pub log_level: String,
    /// Directories searched, in order, for named templates.
    pub template_dirs: Vec<PathBuf>,
    /// Prefix for names produced by the `bindparam` template function.
    pub bind_prefix: String,
    /// The default database.
    pub database: DatabaseSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "info".to_string(),
            template_dirs: Vec::new(),
            bind_prefix: DEFAULT_BIND_PREFIX.to_string(),
            database: DatabaseSettings::default(),
        }
    }
}

impl Settings {
    /// Checks invariants that serde cannot express.
    ///
    /// The bind prefix ends up in rendered query text, so it must be a
    /// non-empty safe value itself.
    pub fn validate(&self) -> JsqlResult<()> {
        validate_bind_prefix(&self.bind_prefix)
    }
}

/// Checks that `prefix` can start a generated placeholder name.
///
/// Generated names are emitted into query text unvalidated, so the prefix
/// must be a non-empty Safe Value.
///
/// # Errors
///
/// Returns a `ConfigurationError` for an empty prefix or one with characters
/// outside `[A-Za-z0-9_]`.
pub fn validate_bind_prefix(prefix: &str) -> JsqlResult<()> {
    if prefix.is_empty() || !is_safe(prefix) {
        return Err(JsqlError::ConfigurationError(format!(
            "bind_prefix must be a non-empty [A-Za-z0-9_] identifier, got \"{prefix}\""
        )));
    }
    Ok(())
}
