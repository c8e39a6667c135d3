//! Logging integration for jsql.
//!
//! Provides [`setup_logging`] for installing a [`tracing`] subscriber from
//! [`Settings`](crate::settings::Settings), and [`query_span`] for grouping
//! the events of one render/expand/execute pipeline run.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level`. In debug mode a pretty,
/// human-readable format is used; otherwise structured JSON. Installing a
/// second subscriber is silently ignored.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for one pipeline invocation.
///
/// `kind` names the entry point (e.g. "sql", "render", "factory").
///
/// # Examples
///
/// ```
/// use jsql_core::logging::query_span;
///
/// let span = query_span("render");
/// let _guard = span.enter();
/// tracing::debug!("rendering");
/// ```
pub fn query_span(kind: &str) -> tracing::Span {
    tracing::info_span!("jsql_query", kind = kind)
}
