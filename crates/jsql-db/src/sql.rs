//! The render, expand, execute pipeline.
//!
//! ```text
//! template + Params
//!   -> render      (safety-rewritten template, per-call `bindparam`)
//!   -> expand      (`:name_list` / `:name_tuple_list` placeholders)
//!   -> execute     (Connection: keyword pairs, Session: Params whole)
//!   -> SqlProxy
//! ```
//!
//! Rendering and expansion are synchronous and finish before the first
//! await; nothing is sent to the database if either fails.

use std::sync::Arc;

use tracing::Instrument;

use jsql_core::error::JsqlResult;
use jsql_core::logging::query_span;
use jsql_core::settings::{validate_bind_prefix, Settings, DEFAULT_BIND_PREFIX};
use jsql_template::context::Context;
use jsql_template::environment::{sql_environment, Environment, Template};

use crate::bindparam::{BindParam, BINDPARAM};
use crate::executor::{DbExecutor, ResultSet};
use crate::expand::format_query_with_list_params;
use crate::params::Params;
use crate::proxy::SqlProxy;
use crate::session::Session;

/// Where a query runs, and therefore how parameters are passed.
#[derive(Clone, Copy)]
pub enum ExecutionTarget<'a> {
    /// A one-shot connection; parameters are keyword-expanded into pairs.
    Connection(&'a dyn DbExecutor),
    /// A transaction-scoped session; parameters are passed as one object.
    Session(&'a Session<'a>),
}

impl ExecutionTarget<'_> {
    /// Runs `query` with `params` using the target's calling convention.
    ///
    /// # Errors
    ///
    /// Propagates executor errors unchanged.
    pub async fn query(&self, query: &str, params: &Params) -> JsqlResult<ResultSet> {
        match self {
            Self::Connection(db) => db.query(query, &params.to_pairs()).await,
            Self::Session(session) => session.query(query, params).await,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Session(_) => "session",
        }
    }
}

impl std::fmt::Debug for ExecutionTarget<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(db) => write!(f, "Connection({})", db.vendor()),
            Self::Session(session) => write!(f, "Session({})", session.executor().vendor()),
        }
    }
}

fn render_compiled(
    template: &Template<'_>,
    mut context: Context,
    params: Params,
    prefix: &str,
) -> JsqlResult<(String, Params)> {
    if params.contains_key(BINDPARAM) {
        let query = template.render(&mut context)?;
        return Ok((query, params));
    }
    let bind = BindParam::with_prefix(params, prefix)?;
    context.set(BINDPARAM, bind.callable());
    let query = template.render(&mut context)?;
    Ok((query, bind.take_params()?))
}

fn render_in(
    env: &Environment,
    template: &str,
    params: Params,
    prefix: &str,
) -> JsqlResult<(String, Params)> {
    let compiled = env.from_string(template)?;
    render_compiled(&compiled, params.to_context(), params, prefix)
}

/// Renders `template` with `params` in the default environment.
///
/// Every parameter is visible to the template by name. Unless `params`
/// already has a `bindparam` entry, a fresh bind function is installed
/// under that name; values it binds are added to the returned mapping.
///
/// # Errors
///
/// Returns `UnsafeSql` if an interpolated value fails the allow-list, or
/// any template syntax or render error. No partial query is returned.
///
/// # Examples
///
/// ```
/// use jsql_db::params;
/// use jsql_db::sql::render;
///
/// let (query, params) = render(
///     "select * from {{ table }} where name = {{ bindparam(name) }}",
///     params! { "table" => "users", "name" => "O'Brien" },
/// )
/// .unwrap();
/// assert_eq!(query, "select * from users where name = :bp0");
/// assert_eq!(params.get("bp0").unwrap().as_str(), Some("O'Brien"));
///
/// assert!(render("{{ name }}", params! { "name" => "O'Brien" }).is_err());
/// ```
pub fn render(template: &str, params: Params) -> JsqlResult<(String, Params)> {
    render_in(sql_environment(), template, params, DEFAULT_BIND_PREFIX)
}

/// Renders, expands and executes `template`.
///
/// # Errors
///
/// Returns render and expansion errors before anything is executed, then
/// any executor error unchanged.
pub async fn sql(
    target: ExecutionTarget<'_>,
    template: &str,
    params: Params,
) -> JsqlResult<SqlProxy> {
    run(sql_environment(), DEFAULT_BIND_PREFIX, target, template, params).await
}

async fn run(
    env: &Environment,
    prefix: &str,
    target: ExecutionTarget<'_>,
    template: &str,
    params: Params,
) -> JsqlResult<SqlProxy> {
    let span = query_span("sql");
    let (query, params) = span.in_scope(|| -> JsqlResult<(String, Params)> {
        let (query, params) = render_in(env, template, params, prefix)?;
        let (query, params) = format_query_with_list_params(&query, params)?;
        tracing::debug!(
            target_kind = target.kind(),
            query = %query,
            params = params.len(),
            "executing"
        );
        Ok((query, params))
    })?;
    let result = target.query(&query, &params).instrument(span).await?;
    Ok(SqlProxy::new(result))
}

/// Executes plain query text: expansion first, then a render with only
/// `bindparam` in scope, then execution.
///
/// # Examples
///
/// ```ignore
/// let proxy = SqlProxyFactory::new(ExecutionTarget::Connection(&db))
///     .call("select * from t where id in :ids_list", params! { "ids" => vec![1_i64, 2] })
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct SqlProxyFactory<'a> {
    target: ExecutionTarget<'a>,
    env: &'a Environment,
    bind_prefix: String,
}

impl<'a> SqlProxyFactory<'a> {
    /// A factory over the default environment and bind prefix.
    pub fn new(target: ExecutionTarget<'a>) -> Self {
        Self {
            target,
            env: sql_environment(),
            bind_prefix: DEFAULT_BIND_PREFIX.to_string(),
        }
    }

    /// Uses `env` to compile queries.
    #[must_use]
    pub fn with_environment(mut self, env: &'a Environment) -> Self {
        self.env = env;
        self
    }

    /// Uses `prefix` for keys generated by `bindparam`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if `prefix` is empty or not a Safe
    /// Value.
    pub fn with_bind_prefix(mut self, prefix: impl Into<String>) -> JsqlResult<Self> {
        let prefix = prefix.into();
        validate_bind_prefix(&prefix)?;
        self.bind_prefix = prefix;
        Ok(self)
    }

    /// Expands, renders and executes `query`.
    ///
    /// # Errors
    ///
    /// Returns expansion and render errors before anything is executed, then
    /// any executor error unchanged.
    pub async fn call(&self, query: &str, params: Params) -> JsqlResult<SqlProxy> {
        let span = query_span("factory");
        let (query, params) = span.in_scope(|| -> JsqlResult<(String, Params)> {
            let (query, params) = format_query_with_list_params(query, params)?;
            let compiled = self.env.from_string(&query)?;
            let (query, params) =
                render_compiled(&compiled, Context::new(), params, &self.bind_prefix)?;
            tracing::debug!(
                target_kind = self.target.kind(),
                query = %query,
                params = params.len(),
                "executing"
            );
            Ok((query, params))
        })?;
        let result = self.target.query(&query, &params).instrument(span).await?;
        Ok(SqlProxy::new(result))
    }
}

/// Executes plain query text with the default factory.
///
/// # Errors
///
/// See [`SqlProxyFactory::call`].
pub async fn get_sql_proxy(
    target: ExecutionTarget<'_>,
    query: &str,
    params: Params,
) -> JsqlResult<SqlProxy> {
    SqlProxyFactory::new(target).call(query, params).await
}

/// Loads `name` from `env`, renders it with `params`, and hands the result
/// to a factory over the same environment.
///
/// # Errors
///
/// Returns `TemplateDoesNotExist` if no loader has the template, then any
/// render, expansion or executor error.
pub async fn get_sql_proxy_from_template(
    target: ExecutionTarget<'_>,
    env: &Environment,
    name: &str,
    params: Params,
) -> JsqlResult<SqlProxy> {
    let (query, params) = query_span("template").in_scope(|| -> JsqlResult<(String, Params)> {
        let template = env.get_template(name)?;
        render_compiled(&template, params.to_context(), params, DEFAULT_BIND_PREFIX)
    })?;
    SqlProxyFactory::new(target)
        .with_environment(env)
        .call(&query, params)
        .await
}

/// A configured entry point: an environment and a bind prefix.
///
/// # Examples
///
/// ```
/// use jsql_core::settings::Settings;
/// use jsql_db::params;
/// use jsql_db::sql::Jsql;
///
/// let settings = Settings { bind_prefix: "arg".to_string(), ..Settings::default() };
/// let jsql = Jsql::from_settings(&settings).unwrap();
/// let (query, _) = jsql.render("x = {{ bindparam(1) }}", params! {}).unwrap();
/// assert_eq!(query, "x = :arg0");
/// ```
#[derive(Debug, Clone)]
pub struct Jsql {
    env: Arc<Environment>,
    bind_prefix: String,
}

impl Jsql {
    /// Uses `env` and the default bind prefix.
    pub fn new(env: Environment) -> Self {
        Self {
            env: Arc::new(env),
            bind_prefix: DEFAULT_BIND_PREFIX.to_string(),
        }
    }

    /// Builds the environment from the settings' template directories.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the settings do not validate.
    pub fn from_settings(settings: &Settings) -> JsqlResult<Self> {
        settings.validate()?;
        Ok(Self {
            env: Arc::new(Environment::from_settings(settings)),
            bind_prefix: settings.bind_prefix.clone(),
        })
    }

    /// The environment templates are compiled in.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// The prefix for keys generated by `bindparam`.
    pub fn bind_prefix(&self) -> &str {
        &self.bind_prefix
    }

    /// A factory over this handle's environment and prefix.
    pub fn factory<'a>(&'a self, target: ExecutionTarget<'a>) -> SqlProxyFactory<'a> {
        // `bind_prefix` was validated when the handle was built.
        SqlProxyFactory {
            target,
            env: &self.env,
            bind_prefix: self.bind_prefix.clone(),
        }
    }

    /// Renders `template`; see [`render`].
    ///
    /// # Errors
    ///
    /// See [`render`].
    pub fn render(&self, template: &str, params: Params) -> JsqlResult<(String, Params)> {
        render_in(&self.env, template, params, &self.bind_prefix)
    }

    /// Renders, expands and executes `template`; see [`sql`].
    ///
    /// # Errors
    ///
    /// See [`sql`].
    pub async fn sql(
        &self,
        target: ExecutionTarget<'_>,
        template: &str,
        params: Params,
    ) -> JsqlResult<SqlProxy> {
        run(&self.env, &self.bind_prefix, target, template, params).await
    }

    /// Renders the named template with `params`, then hands the result to
    /// this handle's factory; see [`get_sql_proxy_from_template`].
    ///
    /// # Errors
    ///
    /// Returns `TemplateDoesNotExist` if no loader has the template, then
    /// any render, expansion or executor error.
    pub async fn sql_from_template(
        &self,
        target: ExecutionTarget<'_>,
        name: &str,
        params: Params,
    ) -> JsqlResult<SqlProxy> {
        let (query, params) = query_span("template").in_scope(|| -> JsqlResult<(String, Params)> {
            let template = self.env.get_template(name)?;
            render_compiled(&template, params.to_context(), params, &self.bind_prefix)
        })?;
        self.factory(target).call(&query, params).await
    }
}

impl Default for Jsql {
    fn default() -> Self {
        Self::new(sql_environment().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::MockExecutor;
    use crate::params;
    use crate::value::Value;
    use jsql_core::error::JsqlError;
    use jsql_template::loaders::StringLoader;
    use jsql_template::raw::DangerouslyInjectedSql;

    #[test]
    fn test_render_safe_value() {
        let (query, params) = render(
            "select * from t where id = {{ id }}",
            params! { "id" => "42" },
        )
        .unwrap();
        assert_eq!(query, "select * from t where id = 42");
        assert_eq!(params.get("id"), Some(&Value::from("42")));
    }

    #[test]
    fn test_render_rejects_unsafe_value() {
        let err = render(
            "select * from t where name = {{ name }}",
            params! { "name" => "O'Brien" },
        )
        .unwrap_err();
        assert_eq!(err.unsafe_value(), Some("O'Brien"));
    }

    #[test]
    fn test_render_marked_value() {
        let (query, _) = render(
            "select {{ cols }} from t",
            params! { "cols" => DangerouslyInjectedSql::new("count(*) as n") },
        )
        .unwrap();
        assert_eq!(query, "select count(*) as n from t");
    }

    #[test]
    fn test_render_inject_helper() {
        let (query, _) = render(
            "select {{ dangerously_inject_sql(expr) }}",
            params! { "expr" => "a + b" },
        )
        .unwrap();
        assert_eq!(query, "select a + b");
    }

    #[test]
    fn test_bindparam_numbering_skips_caller_keys() {
        let (query, params) = render(
            "{{ bindparam(a) }}, {{ bindparam(b) }}",
            params! { "a" => "x y", "b" => 3_i64, "bp0" => "mine" },
        )
        .unwrap();
        assert_eq!(query, ":bp1, :bp2");
        assert_eq!(params.get("bp0"), Some(&Value::from("mine")));
        assert_eq!(params.get("bp1"), Some(&Value::from("x y")));
        assert_eq!(params.get("bp2"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_bindparam_is_per_call() {
        let first = render("{{ bindparam(1) }}", params! {}).unwrap();
        let second = render("{{ bindparam(1) }}", params! {}).unwrap();
        assert_eq!(first.0, ":bp0");
        assert_eq!(second.0, ":bp0");
    }

    #[test]
    fn test_caller_supplied_bindparam_is_kept() {
        let (query, params) =
            render("{{ bindparam }}", params! { "bindparam" => "fixed" }).unwrap();
        assert_eq!(query, "fixed");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_render_loop_over_columns() {
        let (query, _) = render(
            "select {% for c in cols %}{{ c }}{% if not loop.last %}{{ comma }} {% endif %}{% endfor %} from t",
            params! { "cols" => vec!["id", "name"] },
        )
        .unwrap();
        assert_eq!(query, "select id, name from t");
    }

    #[tokio::test]
    async fn test_sql_connection_gets_pairs() {
        let db = MockExecutor::new();
        sql(
            ExecutionTarget::Connection(&db),
            "select * from {{ table }} where id in (:ids_list)",
            params! { "table" => "users", "ids" => vec![1_i64, 2, 3] },
        )
        .await
        .unwrap();

        let call = db.calls().pop().unwrap();
        assert_eq!(
            call.sql,
            "select * from users where id in ((:ids_list_0, :ids_list_1, :ids_list_2))"
        );
        let names: Vec<&str> = call.params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["ids_list_0", "ids_list_1", "ids_list_2", "table"]);
    }

    #[tokio::test]
    async fn test_sql_empty_list_becomes_null() {
        let db = MockExecutor::new();
        sql(
            ExecutionTarget::Connection(&db),
            "select * from t where id in (:ids_list)",
            params! { "ids" => Vec::<i64>::new() },
        )
        .await
        .unwrap();
        let call = db.calls().pop().unwrap();
        assert_eq!(call.sql, "select * from t where id in (null)");
        assert!(call.params.is_empty());
    }

    #[tokio::test]
    async fn test_sql_unsafe_value_never_executes() {
        let db = MockExecutor::new();
        let err = sql(
            ExecutionTarget::Connection(&db),
            "select * from t where name = {{ name }}",
            params! { "name" => "x'; drop table t; --" },
        )
        .await
        .unwrap_err();
        assert!(err.is_security_violation());
        assert!(db.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sql_missing_list_never_executes() {
        let db = MockExecutor::new();
        let err = sql(ExecutionTarget::Connection(&db), "x in :ids_list", params! {})
            .await
            .unwrap_err();
        assert!(matches!(err, JsqlError::MissingParameter(_)));
        assert!(db.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sql_through_session() {
        let db = MockExecutor::new();
        let session = Session::new(&db);
        sql(
            ExecutionTarget::Session(&session),
            "select {{ bindparam(v) }}",
            params! { "v" => 5_i64 },
        )
        .await
        .unwrap();
        let call = db.calls().pop().unwrap();
        assert_eq!(call.sql, "select :bp0");
        assert!(call.params.contains(&("bp0".to_string(), Value::Int(5))));
    }

    #[tokio::test]
    async fn test_factory_expands_before_render() {
        let db = MockExecutor::new();
        SqlProxyFactory::new(ExecutionTarget::Connection(&db))
            .call(
                "select * from t where (a, b) in :pairs_tuple_list and c = {{ bindparam(1) }}",
                params! { "pairs" => vec![(1_i64, 2_i64), (3, 4)] },
            )
            .await
            .unwrap();
        let call = db.calls().pop().unwrap();
        assert_eq!(
            call.sql,
            "select * from t where (a, b) in ((:pairs_tuple_list_0_0, :pairs_tuple_list_0_1), \
             (:pairs_tuple_list_1_0, :pairs_tuple_list_1_1)) and c = :bp0"
        );
        assert_eq!(call.params.len(), 5);
    }

    #[tokio::test]
    async fn test_factory_does_not_expose_params_to_template() {
        let db = MockExecutor::new();
        get_sql_proxy(
            ExecutionTarget::Connection(&db),
            "select {{ table }} from t",
            params! { "table" => "users" },
        )
        .await
        .unwrap();
        // Only `bindparam` is in scope; an unknown name renders empty.
        assert_eq!(db.calls().pop().unwrap().sql, "select  from t");
    }

    #[tokio::test]
    async fn test_get_sql_proxy_from_template() {
        let env = Environment::new().with_loader(
            StringLoader::new().with("by_ids.sql", "select * from {{ table }} where id in :ids_list"),
        );
        let db = MockExecutor::new();
        get_sql_proxy_from_template(
            ExecutionTarget::Connection(&db),
            &env,
            "by_ids.sql",
            params! { "table" => "users", "ids" => vec![7_i64] },
        )
        .await
        .unwrap();
        assert_eq!(
            db.calls().pop().unwrap().sql,
            "select * from users where id in (:ids_list_0)"
        );

        let err = get_sql_proxy_from_template(
            ExecutionTarget::Connection(&db),
            &env,
            "nope.sql",
            params! {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, JsqlError::TemplateDoesNotExist(_)));
    }

    #[tokio::test]
    async fn test_jsql_handle_uses_prefix_and_loaders() {
        let env = Environment::new()
            .with_loader(StringLoader::new().with("q.sql", "select {{ bindparam(v) }}"));
        let jsql = Jsql {
            env: Arc::new(env),
            bind_prefix: "arg".to_string(),
        };
        let db = MockExecutor::new();
        jsql.sql_from_template(ExecutionTarget::Connection(&db), "q.sql", params! { "v" => 1_i64 })
            .await
            .unwrap();
        assert_eq!(db.calls().pop().unwrap().sql, "select :arg0");

        jsql.factory(ExecutionTarget::Connection(&db))
            .call("select {{ bindparam(2) }}", params! {})
            .await
            .unwrap();
        assert_eq!(db.calls().pop().unwrap().sql, "select :arg0");
    }

    #[tokio::test]
    async fn test_unsafe_bind_prefix_rejected() {
        let db = MockExecutor::new();
        let err = SqlProxyFactory::new(ExecutionTarget::Connection(&db))
            .with_bind_prefix("x; drop table users; --")
            .unwrap_err();
        assert!(matches!(err, JsqlError::ConfigurationError(_)));
        assert!(SqlProxyFactory::new(ExecutionTarget::Connection(&db))
            .with_bind_prefix("")
            .is_err());

        SqlProxyFactory::new(ExecutionTarget::Connection(&db))
            .with_bind_prefix("arg")
            .unwrap()
            .call("select * from t where id = {{ bindparam(1) }}", params! {})
            .await
            .unwrap();
        assert_eq!(db.calls().pop().unwrap().sql, "select * from t where id = :arg0");
    }

    #[test]
    fn test_render_with_unsafe_prefix_fails() {
        let env = Environment::new();
        let err = render_in(&env, "where id = {{ bindparam(1) }}", params! {}, "1 or 1=1 --")
            .unwrap_err();
        assert!(matches!(err, JsqlError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn test_template_entry_points_agree() {
        let env = Environment::new()
            .with_loader(StringLoader::new().with("q.sql", "select {{ col }} from t"));
        let col = DangerouslyInjectedSql::new("{{ bindparam(1) }}");

        let db = MockExecutor::new();
        get_sql_proxy_from_template(
            ExecutionTarget::Connection(&db),
            &env,
            "q.sql",
            params! { "col" => col.clone() },
        )
        .await
        .unwrap();
        let free = db.calls().pop().unwrap().sql;

        let jsql = Jsql::new(env);
        jsql.sql_from_template(ExecutionTarget::Connection(&db), "q.sql", params! { "col" => col })
            .await
            .unwrap();
        let handle = db.calls().pop().unwrap().sql;

        assert_eq!(free, "select :bp0 from t");
        assert_eq!(handle, free);
    }

    #[test]
    fn test_default_handle_matches_free_functions() {
        let jsql = Jsql::default();
        assert_eq!(jsql.bind_prefix(), "bp");
        let a = jsql.render("{{ x }}", params! { "x" => "ok" }).unwrap();
        let b = render("{{ x }}", params! { "x" => "ok" }).unwrap();
        assert_eq!(a, b);
    }
}
