//! # jsql-db
//!
//! The database side of jsql: the parameter model, bind-key generation,
//! list/tuple placeholder expansion, the executor seam, sessions, result
//! views, and the pipeline that ties them to the template engine.
//!
//! ## Pipeline
//!
//! A query template is rendered by the safety-rewriting template engine,
//! its `:name_list` / `:name_tuple_list` placeholders are expanded into
//! singular placeholders, and the result is executed against an
//! [`ExecutionTarget`](sql::ExecutionTarget). Rendering and expansion are
//! pure and synchronous; only execution awaits.
//!
//! ## Module Overview
//!
//! - [`value`] - The backend-agnostic [`Value`](value::Value) enum
//! - [`params`] - The [`Params`](params::Params) mapping and the `params!` macro
//! - [`bindparam`] - Per-call `bindparam` key generation
//! - [`expand`] - List and tuple-list placeholder expansion
//! - [`executor`] - The [`DbExecutor`](executor::DbExecutor) trait and [`ResultSet`](executor::ResultSet)
//! - [`row`] - Rows and typed extraction via [`FromValue`](row::FromValue)
//! - [`session`] - Transaction-scoped sessions
//! - [`proxy`] - Read-only views over a result
//! - [`sql`] - Render, expand and execute entry points

// - doc_markdown: placeholder names like `ids_list` read better unticked in prose
// - needless_pass_by_value: Params are consumed by each pipeline stage
// - significant_drop_tightening: false positives with async Mutex guards
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::significant_drop_tightening)]

pub mod bindparam;
pub mod executor;
pub mod expand;
pub mod params;
pub mod proxy;
pub mod row;
pub mod session;
pub mod sql;
pub mod value;

pub use bindparam::BindParam;
pub use executor::{DbExecutor, ResultSet};
pub use expand::format_query_with_list_params;
pub use params::Params;
pub use proxy::SqlProxy;
pub use row::{FromValue, Row};
pub use session::Session;
pub use sql::{
    get_sql_proxy, get_sql_proxy_from_template, render, sql, ExecutionTarget, Jsql,
    SqlProxyFactory,
};
pub use value::Value;
