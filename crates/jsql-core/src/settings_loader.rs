//! Settings loading from configuration files and the environment.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (keys present in the file override defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! Every loader validates the result before returning it.
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `JSQL_DEBUG` | `debug` |
//! | `JSQL_LOG_LEVEL` | `log_level` |
//! | `JSQL_TEMPLATE_DIRS` | `template_dirs` (`:`-separated) |
//! | `JSQL_BIND_PREFIX` | `bind_prefix` |
//! | `JSQL_DATABASE_NAME` | `database.name` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use jsql_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("config/jsql.toml").unwrap();
//! ```

use std::path::{Path, PathBuf};

use crate::error::{JsqlError, JsqlResult};
use crate::settings::Settings;

/// Loads settings from a TOML string.
///
/// Any fields not present in the TOML keep their default values.
pub fn from_toml_str(toml_str: &str) -> JsqlResult<Settings> {
    // Go through serde_json so a partial document can be merged over the
    // serialized defaults.
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| JsqlError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;
    merge_over_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
pub fn from_toml_file(path: impl AsRef<Path>) -> JsqlResult<Settings> {
    from_toml_str(&read_config(path.as_ref(), "TOML")?)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> JsqlResult<Settings> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from a JSON string.
pub fn from_json_str(json_str: &str) -> JsqlResult<Settings> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| JsqlError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;
    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
pub fn from_json_file(path: impl AsRef<Path>) -> JsqlResult<Settings> {
    from_json_str(&read_config(path.as_ref(), "JSON")?)
}

/// Loads settings from a JSON file and then applies environment variable overrides.
pub fn from_json_file_with_env(path: impl AsRef<Path>) -> JsqlResult<Settings> {
    let mut settings = from_json_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> JsqlResult<Settings> {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Applies `JSQL_*` environment variable overrides to a settings struct.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides_from(settings, |key| std::env::var(key).ok());
}

/// Applies overrides using `lookup` to read each `JSQL_*` variable.
///
/// `DEBUG` accepts "true"/"1"/"yes" (case-insensitive); anything else is false.
pub fn apply_overrides_from<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("JSQL_DEBUG") {
        settings.debug = matches!(val.to_lowercase().as_str(), "true" | "1" | "yes");
    }

    if let Some(val) = lookup("JSQL_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Some(val) = lookup("JSQL_TEMPLATE_DIRS") {
        settings.template_dirs = val
            .split(':')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
    }

    if let Some(val) = lookup("JSQL_BIND_PREFIX") {
        settings.bind_prefix = val;
    }

    if let Some(val) = lookup("JSQL_DATABASE_NAME") {
        settings.database.name = val;
    }
}

// ============================================================
// Helpers
// ============================================================

fn read_config(path: &Path, format: &str) -> JsqlResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        JsqlError::ConfigurationError(format!(
            "Failed to read {format} file '{}': {e}",
            path.display()
        ))
    })
}

fn merge_over_defaults(value: serde_json::Value, format: &str) -> JsqlResult<Settings> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        JsqlError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    let settings: Settings = serde_json::from_value(merged).map_err(|e| {
        JsqlError::ConfigurationError(format!("Failed to deserialize settings from {format}: {e}"))
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            debug = true
            log_level = "debug"
            template_dirs = ["sql", "shared/sql"]
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(settings.debug);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.template_dirs.len(), 2);
        // Defaults preserved
        assert_eq!(settings.bind_prefix, "bp");
    }

    #[test]
    fn test_from_toml_str_partial_database() {
        let toml = r#"
            [database]
            name = "app.db"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.database.name, "app.db");
        assert_eq!(settings.database.engine, "sqlite");
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_from_toml_str_invalid() {
        assert!(from_toml_str("[[invalid toml content").is_err());
    }

    #[test]
    fn test_from_toml_str_rejects_unsafe_bind_prefix() {
        let result = from_toml_str(r#"bind_prefix = "bp'""#);
        assert!(matches!(result, Err(JsqlError::ConfigurationError(_))));
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{"bind_prefix": "p", "log_level": "warn"}"#;
        let settings = from_json_str(json).unwrap();
        assert_eq!(settings.bind_prefix, "p");
        assert_eq!(settings.log_level, "warn");
        assert!(!settings.debug);
    }

    #[test]
    fn test_from_json_str_empty_object() {
        assert_eq!(from_json_str("{}").unwrap(), Settings::default());
    }

    #[test]
    fn test_from_json_str_invalid() {
        assert!(from_json_str("{invalid json").is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_file() {
        let dir = std::env::temp_dir().join("jsql_test_toml");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("jsql.toml");
        std::fs::write(&path, "bind_prefix = \"arg\"\n").unwrap();

        let settings = from_toml_file(&path).unwrap();
        assert_eq!(settings.bind_prefix, "arg");

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn test_from_json_file() {
        let dir = std::env::temp_dir().join("jsql_test_json");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("jsql.json");
        std::fs::write(&path, r#"{"debug": true}"#).unwrap();

        let settings = from_json_file(&path).unwrap();
        assert!(settings.debug);

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn test_missing_file() {
        let result = from_toml_file("/nonexistent/jsql.toml");
        assert!(matches!(result, Err(JsqlError::ConfigurationError(_))));
    }

    // ── Overrides ───────────────────────────────────────────────────

    #[test]
    fn test_apply_overrides_from() {
        let vars: HashMap<&str, &str> = [
            ("JSQL_DEBUG", "yes"),
            ("JSQL_LOG_LEVEL", "trace"),
            ("JSQL_TEMPLATE_DIRS", "a: b ::c"),
            ("JSQL_BIND_PREFIX", "arg"),
            ("JSQL_DATABASE_NAME", "prod.db"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        apply_overrides_from(&mut settings, |k| vars.get(k).map(|v| (*v).to_string()));

        assert!(settings.debug);
        assert_eq!(settings.log_level, "trace");
        assert_eq!(
            settings.template_dirs,
            vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]
        );
        assert_eq!(settings.bind_prefix, "arg");
        assert_eq!(settings.database.name, "prod.db");
    }

    #[test]
    fn test_apply_overrides_from_nothing_set() {
        let mut settings = Settings::default();
        apply_overrides_from(&mut settings, |_| None);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_toml_to_json() {
        let toml_val: toml::Value = toml::from_str(
            r#"
            name = "test"
            count = 42
            flag = true
            items = [1, 2, 3]
            [nested]
            key = "value"
        "#,
        )
        .unwrap();

        let json = toml_to_json(toml_val);
        assert_eq!(json["name"], "test");
        assert_eq!(json["count"], 42);
        assert_eq!(json["flag"], true);
        assert_eq!(json["items"], serde_json::json!([1, 2, 3]));
        assert_eq!(json["nested"]["key"], "value");
    }
}
