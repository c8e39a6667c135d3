//! # jsql-db-backends
//!
//! Execution backends implementing [`DbExecutor`](jsql_db::executor::DbExecutor).
//!
//! Supported backends:
//! - `SQLite` (feature `sqlite`, on by default)

#![allow(clippy::doc_markdown)]

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
