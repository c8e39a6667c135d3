//! SQLite execution backend using `rusqlite`.
//!
//! [`SqliteBackend`] implements [`DbExecutor`] by running every statement in
//! `tokio::task::spawn_blocking` against a single connection guarded by an
//! async mutex. Placeholders are bound by name: `:bp0` in the query text is
//! bound to the `bp0` parameter.
//!
//! - WAL mode for file-based databases
//! - In-memory databases via `:memory:` (used throughout the tests)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::{Null, ValueRef};
use tokio::sync::Mutex;

use jsql_core::error::{JsqlError, JsqlResult};
use jsql_core::safe::is_safe;
use jsql_core::settings::DatabaseSettings;
use jsql_db::executor::{DbExecutor, ResultSet};
use jsql_db::value::Value;

const MEMORY: &str = ":memory:";

/// A SQLite database reached through one `rusqlite` connection.
pub struct SqliteBackend {
    path: PathBuf,
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteBackend {
    /// Opens the database at `path`; `:memory:` opens an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an `OperationalError` if the database cannot be opened or
    /// configured.
    pub fn open(path: impl Into<PathBuf>) -> JsqlResult<Self> {
        let path = path.into();
        let in_memory = path.to_str() == Some(MEMORY);
        let conn = if in_memory {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| JsqlError::OperationalError(format!("SQLite open failed: {e}")))?;

        let pragmas = if in_memory {
            "PRAGMA foreign_keys=ON;"
        } else {
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;"
        };
        conn.execute_batch(pragmas)
            .map_err(|e| JsqlError::OperationalError(format!("failed to set pragmas: {e}")))?;

        tracing::debug!(path = %path.display(), "opened sqlite database");
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an `OperationalError` if the database cannot be created.
    pub fn memory() -> JsqlResult<Self> {
        Self::open(MEMORY)
    }

    /// Opens the database described by `settings`.
    ///
    /// Every entry of `settings.options` is applied as `PRAGMA key=value`;
    /// both sides must be safe identifiers.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` for a non-`sqlite` engine or an unsafe
    /// option, and an `OperationalError` if the database cannot be opened.
    pub fn from_settings(settings: &DatabaseSettings) -> JsqlResult<Self> {
        if settings.engine != "sqlite" {
            return Err(JsqlError::ConfigurationError(format!(
                "unsupported database engine \"{}\"",
                settings.engine
            )));
        }
        let mut pragmas = String::new();
        let mut options: Vec<(&String, &String)> = settings.options.iter().collect();
        options.sort();
        for (key, value) in options {
            if key.is_empty() || !is_safe(key) || !is_safe(value) {
                return Err(JsqlError::ConfigurationError(format!(
                    "invalid sqlite option {key}={value}"
                )));
            }
            pragmas.push_str(&format!("PRAGMA {key}={value};"));
        }

        let backend = Self::open(&settings.name)?;
        if !pragmas.is_empty() {
            backend
                .conn
                .try_lock()
                .map_err(|e| JsqlError::OperationalError(e.to_string()))?
                .execute_batch(&pragmas)
                .map_err(|e| JsqlError::OperationalError(format!("failed to set pragmas: {e}")))?;
        }
        Ok(backend)
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Binds every placeholder in `stmt` by name.
    fn bind_params(
        stmt: &mut rusqlite::Statement<'_>,
        params: &[(String, Value)],
    ) -> JsqlResult<()> {
        let by_name: HashMap<&str, &Value> =
            params.iter().map(|(k, v)| (k.as_str(), v)).collect();

        for idx in 1..=stmt.parameter_count() {
            let placeholder = stmt.parameter_name(idx).ok_or_else(|| {
                JsqlError::DatabaseError(format!(
                    "positional placeholder at index {idx}; use named :placeholders"
                ))
            })?;
            let name = placeholder.trim_start_matches([':', '@', '$']).to_string();
            let value = by_name
                .get(name.as_str())
                .ok_or_else(|| JsqlError::MissingParameter(name.clone()))?;
            Self::bind_one(stmt, idx, &name, value)?;
        }
        Ok(())
    }

    fn bind_one(
        stmt: &mut rusqlite::Statement<'_>,
        idx: usize,
        name: &str,
        value: &Value,
    ) -> JsqlResult<()> {
        match value {
            Value::Null => stmt.raw_bind_parameter(idx, Null),
            Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
            Value::Int(v) => stmt.raw_bind_parameter(idx, v),
            Value::Float(v) => stmt.raw_bind_parameter(idx, v),
            Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
            Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
            Value::Date(d) => stmt.raw_bind_parameter(idx, d.to_string()),
            Value::DateTime(dt) => stmt.raw_bind_parameter(idx, dt.to_string()),
            Value::DateTimeTz(dt) => stmt.raw_bind_parameter(idx, dt.to_rfc3339()),
            Value::Time(t) => stmt.raw_bind_parameter(idx, t.to_string()),
            Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.to_string()),
            Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string()),
            Value::Raw(raw) => stmt.raw_bind_parameter(idx, raw.as_str()),
            Value::List(_) | Value::Tuple(_) => {
                return Err(JsqlError::DatabaseError(format!(
                    "parameter \"{name}\" is a {}; reference it as :{name}_list to expand it",
                    value.type_name()
                )))
            }
        }
        .map_err(|e| JsqlError::DatabaseError(format!("bind error for \"{name}\": {e}")))
    }

    fn convert_value(value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Int(v),
            ValueRef::Real(v) => Value::Float(v),
            ValueRef::Text(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        }
    }

    fn run_query(
        conn: &rusqlite::Connection,
        sql: &str,
        params: &[(String, Value)],
    ) -> JsqlResult<ResultSet> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| JsqlError::DatabaseError(e.to_string()))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        Self::bind_params(&mut stmt, params)?;

        let mut raw_rows = stmt.raw_query();
        let mut rows = Vec::new();
        while let Some(row) = raw_rows
            .next()
            .map_err(|e| JsqlError::DatabaseError(e.to_string()))?
        {
            let values = (0..columns.len())
                .map(|i| {
                    row.get_ref(i)
                        .map(Self::convert_value)
                        .map_err(|e| JsqlError::DatabaseError(e.to_string()))
                })
                .collect::<JsqlResult<Vec<Value>>>()?;
            rows.push(values);
        }
        ResultSet::new(columns, rows)
    }

    fn run_statement(
        conn: &rusqlite::Connection,
        sql: &str,
        params: &[(String, Value)],
    ) -> JsqlResult<u64> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| JsqlError::DatabaseError(e.to_string()))?;
        Self::bind_params(&mut stmt, params)?;
        let count = stmt
            .raw_execute()
            .map_err(|e| JsqlError::DatabaseError(e.to_string()))?;
        Ok(count as u64)
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl DbExecutor for SqliteBackend {
    fn vendor(&self) -> &str {
        "sqlite"
    }

    async fn query(&self, sql: &str, params: &[(String, Value)]) -> JsqlResult<ResultSet> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let params = params.to_vec();
        tracing::trace!(sql = %sql, "sqlite query");

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            Self::run_query(&conn, &sql, &params)
        })
        .await
        .map_err(|e| JsqlError::DatabaseError(format!("task join error: {e}")))?
    }

    async fn execute_sql(&self, sql: &str, params: &[(String, Value)]) -> JsqlResult<u64> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let params = params.to_vec();
        tracing::trace!(sql = %sql, "sqlite execute");

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            Self::run_statement(&conn, &sql, &params)
        })
        .await
        .map_err(|e| JsqlError::DatabaseError(format!("task join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, Value)]) -> Vec<(String, Value)> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    async fn users() -> SqliteBackend {
        let db = SqliteBackend::memory().unwrap();
        db.execute_sql(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL, avatar BLOB)",
            &[],
        )
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_memory_open() {
        let db = SqliteBackend::memory().unwrap();
        assert_eq!(db.vendor(), "sqlite");
        assert_eq!(db.path(), Path::new(":memory:"));
    }

    #[tokio::test]
    async fn test_named_binding_and_types() {
        let db = users().await;
        let inserted = db
            .execute_sql(
                "INSERT INTO users (name, score, avatar) VALUES (:name, :score, :avatar)",
                &pairs(&[
                    ("avatar", Value::Bytes(vec![0, 1, 2])),
                    ("name", Value::from("Alice")),
                    ("score", Value::Float(9.5)),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let result = db
            .query(
                "SELECT id, name, score, avatar FROM users WHERE name = :name",
                &pairs(&[("name", Value::from("Alice"))]),
            )
            .await
            .unwrap();
        assert_eq!(result.columns(), ["id", "name", "score", "avatar"]);
        assert_eq!(
            result.rows()[0],
            vec![
                Value::Int(1),
                Value::from("Alice"),
                Value::Float(9.5),
                Value::Bytes(vec![0, 1, 2]),
            ]
        );
    }

    #[tokio::test]
    async fn test_same_placeholder_twice() {
        let db = SqliteBackend::memory().unwrap();
        let result = db
            .query("SELECT :x + :x AS doubled", &pairs(&[("x", Value::Int(21))]))
            .await
            .unwrap();
        assert_eq!(result.rows()[0][0], Value::Int(42));
    }

    #[tokio::test]
    async fn test_null_and_empty_result() {
        let db = users().await;
        db.execute_sql(
            "INSERT INTO users (name) VALUES (:name)",
            &pairs(&[("name", Value::Null)]),
        )
        .await
        .unwrap();
        let result = db.query("SELECT name FROM users", &[]).await.unwrap();
        assert_eq!(result.rows()[0][0], Value::Null);

        let empty = db
            .query("SELECT name FROM users WHERE id = 99", &[])
            .await
            .unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.columns(), ["name"]);
    }

    #[tokio::test]
    async fn test_missing_parameter() {
        let db = SqliteBackend::memory().unwrap();
        let err = db.query("SELECT :absent", &[]).await.unwrap_err();
        assert!(matches!(err, JsqlError::MissingParameter(ref n) if n == "absent"));
    }

    #[tokio::test]
    async fn test_list_value_needs_expansion() {
        let db = SqliteBackend::memory().unwrap();
        let err = db
            .query(
                "SELECT :ids",
                &pairs(&[("ids", Value::from(vec![1_i64, 2]))]),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains(":ids_list"));
    }

    #[tokio::test]
    async fn test_positional_placeholder_rejected() {
        let db = SqliteBackend::memory().unwrap();
        let err = db.query("SELECT ?", &[]).await.unwrap_err();
        assert!(matches!(err, JsqlError::DatabaseError(_)));
    }

    #[tokio::test]
    async fn test_sql_error_is_database_error() {
        let db = SqliteBackend::memory().unwrap();
        let err = db.execute_sql("SELEC nonsense", &[]).await.unwrap_err();
        assert!(matches!(err, JsqlError::DatabaseError(_)));
    }

    #[tokio::test]
    async fn test_extra_parameters_are_ignored() {
        let db = SqliteBackend::memory().unwrap();
        let result = db
            .query(
                "SELECT :a AS a",
                &pairs(&[("a", Value::Int(1)), ("unused", Value::Int(2))]),
            )
            .await
            .unwrap();
        assert_eq!(result.rows()[0][0], Value::Int(1));
    }

    #[test]
    fn test_from_settings() {
        let mut settings = DatabaseSettings::default();
        settings
            .options
            .insert("cache_size".to_string(), "2000".to_string());
        assert!(SqliteBackend::from_settings(&settings).is_ok());

        settings
            .options
            .insert("cache_size".to_string(), "1; drop".to_string());
        assert!(matches!(
            SqliteBackend::from_settings(&settings),
            Err(JsqlError::ConfigurationError(_))
        ));

        let postgres = DatabaseSettings {
            engine: "postgres".to_string(),
            ..DatabaseSettings::default()
        };
        assert!(SqliteBackend::from_settings(&postgres).is_err());
    }
}
