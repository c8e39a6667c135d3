//! # jsql
//!
//! Injection-safe SQL templating with list parameter expansion.
//!
//! This is the meta-crate that re-exports the jsql sub-crates. Every
//! `{{ expr }}` in a query template is checked against `[A-Za-z0-9_]*`
//! unless the value was explicitly marked with
//! [`DangerouslyInjectedSql`](template::DangerouslyInjectedSql);
//! values that need quoting go through `{{ bindparam(value) }}` instead.
//!
//! ```
//! use jsql::prelude::*;
//!
//! let (query, params) = render(
//!     "select * from {{ table }} where name = {{ bindparam(name) }} and id in :ids_list",
//!     params! { "table" => "users", "name" => "O'Brien", "ids" => vec![1_i64, 2] },
//! )
//! .unwrap();
//! let (query, params) = format_query_with_list_params(&query, params).unwrap();
//! assert_eq!(
//!     query,
//!     "select * from users where name = :bp0 and id in (:ids_list_0, :ids_list_1)"
//! );
//! assert_eq!(params.len(), 5);
//! ```

/// Error types, settings, and logging setup.
pub use jsql_core as core;

/// The safety-rewriting template engine.
pub use jsql_template as template;

/// Parameters, expansion, execution seam, sessions, and result views.
pub use jsql_db as db;

/// Execution backends (`SQLite`).
pub use jsql_db_backends as db_backends;

pub use jsql_db::params;

// Third-party crates callers need to drive the async API, implement
// `DbExecutor`, and install logging, at versions matching this crate.
pub use async_trait;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;
pub use tracing_subscriber;

/// The names most callers need.
pub mod prelude {
    pub use jsql_core::error::{JsqlError, JsqlResult};
    pub use jsql_core::logging::setup_logging;
    pub use jsql_core::settings::Settings;
    pub use jsql_db::executor::{DbExecutor, ResultSet};
    pub use jsql_db::expand::format_query_with_list_params;
    pub use jsql_db::params;
    pub use jsql_db::params::Params;
    pub use jsql_db::proxy::SqlProxy;
    pub use jsql_db::row::{FromValue, Row};
    pub use jsql_db::session::{atomic, Session};
    pub use jsql_db::sql::{
        get_sql_proxy, get_sql_proxy_from_template, render, sql, ExecutionTarget, Jsql,
        SqlProxyFactory,
    };
    pub use jsql_db::value::Value;
    #[cfg(feature = "sqlite")]
    pub use jsql_db_backends::SqliteBackend;
    pub use jsql_template::{DangerouslyInjectedSql, Environment};
}
