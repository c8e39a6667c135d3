//! Transaction-scoped sessions.
//!
//! A [`Session`] wraps a [`DbExecutor`] and tracks transaction depth. The
//! outermost [`begin`](Session::begin) issues `BEGIN`; nested calls create
//! savepoints, and [`commit`](Session::commit) / [`rollback`](Session::rollback)
//! unwind one level at a time.
//!
//! Unlike a bare connection, a session takes the parameter object whole:
//! [`Session::query`] receives `&Params` rather than keyword pairs.
//!
//! ```ignore
//! use jsql_db::params;
//! use jsql_db::session::atomic;
//!
//! atomic(&db, |session| async move {
//!     session.execute("insert into t values (:v)", &params! { "v" => 1_i64 }).await?;
//!     Ok(())
//! })
//! .await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use jsql_core::error::{JsqlError, JsqlResult};
use jsql_core::safe::is_safe;
use tokio::sync::Mutex;

use crate::executor::{DbExecutor, ResultSet};
use crate::params::Params;

static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_savepoint_name() -> String {
    let id = SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("sp_{id}")
}

#[derive(Debug, Default)]
struct SessionState {
    depth: u32,
    savepoints: Vec<String>,
}

/// A unit of work over one executor.
pub struct Session<'a> {
    db: &'a dyn DbExecutor,
    state: Mutex<SessionState>,
}

impl<'a> Session<'a> {
    /// Creates a session with no transaction open.
    pub fn new(db: &'a dyn DbExecutor) -> Self {
        Self {
            db,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Returns the underlying executor.
    pub fn executor(&self) -> &dyn DbExecutor {
        self.db
    }

    /// Current nesting depth; 0 means no transaction.
    pub async fn depth(&self) -> u32 {
        self.state.lock().await.depth
    }

    /// Names of the open savepoints, innermost last.
    pub async fn savepoints(&self) -> Vec<String> {
        self.state.lock().await.savepoints.clone()
    }

    /// Begins a transaction, or a savepoint if one is already open.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn begin(&self) -> JsqlResult<()> {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            self.db.execute_sql("BEGIN", &[]).await?;
        } else {
            let name = next_savepoint_name();
            self.db
                .execute_sql(&format!("SAVEPOINT {name}"), &[])
                .await?;
            state.savepoints.push(name);
        }
        state.depth += 1;
        tracing::debug!(depth = state.depth, "session begin");
        Ok(())
    }

    /// Commits the transaction, or releases the innermost savepoint.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if no transaction is open; propagates
    /// executor errors.
    pub async fn commit(&self) -> JsqlResult<()> {
        let mut state = self.state.lock().await;
        match state.depth {
            0 => {
                return Err(JsqlError::DatabaseError(
                    "cannot commit: not in a transaction".to_string(),
                ))
            }
            1 => {
                self.db.execute_sql("COMMIT", &[]).await?;
                state.savepoints.clear();
            }
            _ => {
                if let Some(name) = state.savepoints.pop() {
                    self.db
                        .execute_sql(&format!("RELEASE SAVEPOINT {name}"), &[])
                        .await?;
                }
            }
        }
        state.depth -= 1;
        tracing::debug!(depth = state.depth, "session commit");
        Ok(())
    }

    /// Rolls back the transaction, or to the innermost savepoint.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if no transaction is open; propagates
    /// executor errors.
    pub async fn rollback(&self) -> JsqlResult<()> {
        let mut state = self.state.lock().await;
        match state.depth {
            0 => {
                return Err(JsqlError::DatabaseError(
                    "cannot rollback: not in a transaction".to_string(),
                ))
            }
            1 => {
                self.db.execute_sql("ROLLBACK", &[]).await?;
                state.savepoints.clear();
            }
            _ => {
                if let Some(name) = state.savepoints.pop() {
                    self.db
                        .execute_sql(&format!("ROLLBACK TO SAVEPOINT {name}"), &[])
                        .await?;
                }
            }
        }
        state.depth -= 1;
        tracing::debug!(depth = state.depth, "session rollback");
        Ok(())
    }

    /// Creates a named savepoint inside the open transaction.
    ///
    /// The name is written into the statement text, so it must pass the
    /// same allow-list as template interpolations.
    ///
    /// # Errors
    ///
    /// Returns `UnsafeSql` for a name outside `[A-Za-z0-9_]`, a
    /// `DatabaseError` if no transaction is open, and propagates executor
    /// errors.
    pub async fn savepoint(&self, name: &str) -> JsqlResult<()> {
        if name.is_empty() || !is_safe(name) {
            return Err(JsqlError::UnsafeSql(name.to_string()));
        }
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            return Err(JsqlError::DatabaseError(
                "cannot create savepoint: not in a transaction".to_string(),
            ));
        }
        self.db
            .execute_sql(&format!("SAVEPOINT {name}"), &[])
            .await?;
        state.savepoints.push(name.to_string());
        state.depth += 1;
        Ok(())
    }

    /// Runs a query with the parameter object.
    ///
    /// # Errors
    ///
    /// Propagates executor errors unchanged.
    pub async fn query(&self, sql: &str, params: &Params) -> JsqlResult<ResultSet> {
        self.db.query(sql, &params.to_pairs()).await
    }

    /// Runs a statement with the parameter object.
    ///
    /// # Errors
    ///
    /// Propagates executor errors unchanged.
    pub async fn execute(&self, sql: &str, params: &Params) -> JsqlResult<u64> {
        self.db.execute_sql(sql, &params.to_pairs()).await
    }
}

/// Runs `f` inside a transaction on a fresh session.
///
/// Commits when `f` returns `Ok` and rolls back when it returns `Err`; the
/// original error wins over a failed rollback.
///
/// # Errors
///
/// Returns the error from `f`, or from `BEGIN`/`COMMIT`.
pub async fn atomic<'a, F, Fut, T>(db: &'a dyn DbExecutor, f: F) -> JsqlResult<T>
where
    F: FnOnce(Arc<Session<'a>>) -> Fut,
    Fut: std::future::Future<Output = JsqlResult<T>>,
{
    let session = Arc::new(Session::new(db));
    session.begin().await?;

    match f(Arc::clone(&session)).await {
        Ok(result) => {
            session.commit().await?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback_err) = session.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}
