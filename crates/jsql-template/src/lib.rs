//! # jsql-template
//!
//! Template engine for jsql. Query templates use a Jinja-flavoured syntax
//! (`{{ expr }}`, `{% tag %}`, `{# comment #}`), and every interpolation is
//! rewritten at the token level into `{{ (expr) | assert_safe }}` before it
//! is parsed. A value reaches the rendered query only if it is none, matches
//! `[A-Za-z0-9_]*`, or was explicitly wrapped in a
//! [`DangerouslyInjectedSql`](raw::DangerouslyInjectedSql) marker.
//!
//! ## Modules
//!
//! - [`lexer`] - Tokenizes template source into a flat token stream
//! - [`safety`] - The validator and the token-stream safety rewriter
//! - [`parser`] - Parses tokens into an expression/node tree
//! - [`render`] - Evaluates the node tree against a context
//! - [`context`] - Template context and dynamic values
//! - [`filters`] - The filter registry and built-in filters
//! - [`loaders`] - Template loaders (filesystem, in-memory)
//! - [`environment`] - Compiles and renders templates; the default environment
//! - [`raw`] - The raw-injection marker

pub mod context;
pub mod environment;
pub mod filters;
pub mod lexer;
pub mod loaders;
pub mod parser;
pub mod raw;
pub mod render;
pub mod safety;

pub use context::{Callable, Context, ContextValue};
pub use environment::{sql_environment, Environment, Template};
pub use raw::DangerouslyInjectedSql;
pub use safety::assert_safe;
