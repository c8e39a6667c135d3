//! The template environment: compiling and rendering query templates.
//!
//! An [`Environment`] owns the filter registry, the globals, any custom
//! stream filters, and the template loaders. It is configured through
//! `&mut self` methods and then shared read-only. Every environment carries
//! the safety layer and it cannot be removed: the `assert_safe` filter, the
//! `dangerously_inject_sql` function and filter, the `comma` global, and the
//! [`AssertSafeExtension`] rewriter, which always runs after any custom
//! stream filters so nothing a custom filter emits can escape it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use jsql_core::error::{JsqlError, JsqlResult};
use jsql_core::settings::Settings;

use crate::context::{Callable, Context, ContextValue};
use crate::filters::{default_registry, mark_raw, Filter, FilterRegistry};
use crate::lexer::{self, Token};
use crate::loaders::{FileSystemLoader, TemplateLoader};
use crate::parser::{self, Node};
use crate::raw::DangerouslyInjectedSql;
use crate::render::Renderer;
use crate::safety::{AssertSafeExtension, StreamFilter, COMMA, DANGEROUSLY_INJECT_SQL, RESERVED_NAMES};

/// Compiles and renders templates with the safety layer installed.
///
/// # Examples
///
/// ```
/// use jsql_template::context::Context;
/// use jsql_template::environment::Environment;
///
/// let env = Environment::new();
/// let mut ctx = Context::new();
/// ctx.set("table", "users");
///
/// let query = env.render_str("select * from {{ table }}", &mut ctx).unwrap();
/// assert_eq!(query, "select * from users");
///
/// ctx.set("table", "users; drop table users");
/// assert!(env.render_str("select * from {{ table }}", &mut ctx).is_err());
/// ```
#[derive(Clone)]
pub struct Environment {
    filters: FilterRegistry,
    globals: HashMap<String, ContextValue>,
    stream_filters: Vec<Arc<dyn StreamFilter>>,
    loaders: Vec<Arc<dyn TemplateLoader>>,
}

impl Environment {
    /// Creates an environment with the built-in filters and the safety layer.
    pub fn new() -> Self {
        let mut globals = HashMap::new();
        globals.insert(
            DANGEROUSLY_INJECT_SQL.to_string(),
            ContextValue::Function(Callable::new(inject_sql_function)),
        );
        globals.insert(
            COMMA.to_string(),
            ContextValue::Raw(DangerouslyInjectedSql::new(",")),
        );

        Self {
            filters: default_registry().clone(),
            globals,
            stream_filters: Vec::new(),
            loaders: Vec::new(),
        }
    }

    /// Creates an environment from settings.
    ///
    /// A [`FileSystemLoader`] over `settings.template_dirs` is installed when
    /// any directories are configured.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut env = Self::new();
        if !settings.template_dirs.is_empty() {
            env.add_loader(FileSystemLoader::new(settings.template_dirs.clone()));
        }
        env
    }

    /// Registers a filter.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the name belongs to the safety layer.
    pub fn add_filter(&mut self, filter: Arc<dyn Filter>) -> JsqlResult<()> {
        check_not_reserved(filter.name())?;
        self.filters.register(filter);
        Ok(())
    }

    /// Registers a closure as a filter.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the name belongs to the safety layer.
    pub fn add_filter_fn<F>(&mut self, name: &str, func: F) -> JsqlResult<()>
    where
        F: Fn(&ContextValue, &[ContextValue]) -> JsqlResult<ContextValue> + Send + Sync + 'static,
    {
        check_not_reserved(name)?;
        self.filters.register_fn(name, func);
        Ok(())
    }

    /// Registers a global visible to every template rendered here.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the name belongs to the safety layer.
    pub fn add_global(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ContextValue>,
    ) -> JsqlResult<()> {
        let name = name.into();
        check_not_reserved(&name)?;
        self.globals.insert(name, value.into());
        Ok(())
    }

    /// Adds a stream filter. Custom filters run in registration order, before
    /// the safety rewrite.
    pub fn add_stream_filter(&mut self, filter: Arc<dyn StreamFilter>) {
        self.stream_filters.push(filter);
    }

    /// Appends a template loader. Loaders are consulted in order.
    pub fn add_loader(&mut self, loader: impl TemplateLoader + 'static) {
        self.loaders.push(Arc::new(loader));
    }

    /// Builder form of [`add_loader`](Self::add_loader).
    #[must_use]
    pub fn with_loader(mut self, loader: impl TemplateLoader + 'static) -> Self {
        self.add_loader(loader);
        self
    }

    /// Returns `true` if a filter with this name is available.
    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains(name)
    }

    /// Looks up a global.
    pub fn global(&self, name: &str) -> Option<&ContextValue> {
        self.globals.get(name)
    }

    /// Compiles a template from source text.
    ///
    /// # Errors
    ///
    /// Returns a `TemplateSyntaxError` if the source does not parse.
    pub fn from_string(&self, source: &str) -> JsqlResult<Template<'_>> {
        self.compile(None, source)
    }

    /// Loads and compiles a named template from the configured loaders.
    ///
    /// # Errors
    ///
    /// Returns `TemplateDoesNotExist` if no loader has it, or a
    /// `TemplateSyntaxError` if it does not parse.
    pub fn get_template(&self, name: &str) -> JsqlResult<Template<'_>> {
        let source = self.load_source(name)?;
        self.compile(Some(name.to_string()), &source)
    }

    /// Compiles and renders `source` in one step.
    ///
    /// # Errors
    ///
    /// Returns any compile or render error, including `UnsafeSql`.
    pub fn render_str(&self, source: &str, context: &mut Context) -> JsqlResult<String> {
        self.from_string(source)?.render(context)
    }

    fn load_source(&self, name: &str) -> JsqlResult<String> {
        for loader in &self.loaders {
            match loader.load(name) {
                Ok(source) => return Ok(source),
                Err(JsqlError::TemplateDoesNotExist(_)) => {}
                Err(other) => return Err(other),
            }
        }
        Err(JsqlError::TemplateDoesNotExist(format!(
            "Template '{name}' could not be found"
        )))
    }

    /// Runs the custom stream filters and then the safety rewrite.
    fn filter_stream(&self, mut tokens: Vec<Token>) -> Vec<Token> {
        for filter in &self.stream_filters {
            tracing::trace!(filter = filter.name(), "applying stream filter");
            tokens = filter.filter_stream(tokens);
        }
        AssertSafeExtension.filter_stream(tokens)
    }

    fn compile(&self, name: Option<String>, source: &str) -> JsqlResult<Template<'_>> {
        tracing::debug!(template = name.as_deref().unwrap_or("<string>"), "compiling template");
        let tokens = self.filter_stream(lexer::tokenize(source)?);
        let nodes = parser::parse(tokens)?;
        Ok(Template {
            env: self,
            name,
            nodes,
        })
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut globals: Vec<&String> = self.globals.keys().collect();
        globals.sort();
        f.debug_struct("Environment")
            .field("filters", &self.filters)
            .field("globals", &globals)
            .field("stream_filters", &self.stream_filters.len())
            .field("loaders", &self.loaders.len())
            .finish()
    }
}

fn check_not_reserved(name: &str) -> JsqlResult<()> {
    if RESERVED_NAMES.contains(&name) {
        return Err(JsqlError::ConfigurationError(format!(
            "'{name}' is reserved by the safety layer and cannot be re-registered"
        )));
    }
    Ok(())
}

fn inject_sql_function(args: &[ContextValue]) -> JsqlResult<ContextValue> {
    match args {
        [value] => Ok(mark_raw(value)),
        _ => Err(JsqlError::RenderError(format!(
            "{DANGEROUSLY_INJECT_SQL}() takes exactly one argument ({} given)",
            args.len()
        ))),
    }
}

/// Returns the process-wide default environment.
///
/// Built once on first use and read-only afterwards.
pub fn sql_environment() -> &'static Environment {
    static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();
    ENVIRONMENT.get_or_init(Environment::new)
}

/// A compiled template bound to the environment that compiled it.
pub struct Template<'env> {
    env: &'env Environment,
    name: Option<String>,
    nodes: Vec<Node>,
}

impl Template<'_> {
    /// The template's name, if it was loaded by name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Renders the template.
    ///
    /// # Errors
    ///
    /// Returns the first render error. No partial output is produced.
    pub fn render(&self, context: &mut Context) -> JsqlResult<String> {
        Renderer::new(&self.env.filters, &self.env.globals).render(&self.nodes, context)
    }
}

impl fmt::Debug for Template<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
