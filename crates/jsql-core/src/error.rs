//! Core error types for jsql.
//!
//! [`JsqlError`] covers every way a render, expansion, or execution can fail.
//! The one variant that matters for security is [`JsqlError::UnsafeSql`]: it
//! is raised when an interpolated value fails the allow-list check and always
//! aborts the whole render.

use thiserror::Error;

/// The primary error type for jsql.
///
/// # Examples
///
/// ```
/// use jsql_core::error::JsqlError;
///
/// let err = JsqlError::UnsafeSql("O'Brien".to_string());
/// assert_eq!(err.to_string(), "unsafe sql param \"O'Brien\"");
/// assert_eq!(err.unsafe_value(), Some("O'Brien"));
/// ```
#[derive(Error, Debug)]
pub enum JsqlError {
    // ── Safety ───────────────────────────────────────────────────────

    /// A value reaching an interpolation point failed the allow-list check.
    #[error("unsafe sql param \"{0}\"")]
    UnsafeSql(String),

    // ── Templates ────────────────────────────────────────────────────

    /// A template contains invalid syntax.
    #[error("Template syntax error: {0}")]
    TemplateSyntaxError(String),

    /// The requested template was not found by any loader.
    #[error("Template does not exist: {0}")]
    TemplateDoesNotExist(String),

    /// A template failed while rendering (unknown filter, bad call, ...).
    #[error("Render error: {0}")]
    RenderError(String),

    // ── Parameters ───────────────────────────────────────────────────

    /// A referenced parameter is absent from the parameter mapping.
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// A list or tuple-list parameter does not have the required shape.
    #[error("Malformed list parameter: {0}")]
    MalformedListParameter(String),

    // ── Database ─────────────────────────────────────────────────────

    /// A generic database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An operational database error (connection failure, etc.).
    #[error("Operational error: {0}")]
    OperationalError(String),

    /// A query expected a row but found none.
    #[error("Object does not exist: {0}")]
    DoesNotExist(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl JsqlError {
    /// Returns the rejected string if this is an [`UnsafeSql`](Self::UnsafeSql) error.
    pub fn unsafe_value(&self) -> Option<&str> {
        match self {
            Self::UnsafeSql(value) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` if this error was raised by the safety validator.
    pub const fn is_security_violation(&self) -> bool {
        matches!(self, Self::UnsafeSql(_))
    }

    /// Returns `true` for errors produced by the parameter expansion step.
    pub const fn is_parameter_error(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter(_) | Self::MalformedListParameter(_)
        )
    }
}

/// A convenience type alias for `Result<T, JsqlError>`.
pub type JsqlResult<T> = Result<T, JsqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsafe_sql_display() {
        let err = JsqlError::UnsafeSql("1; DROP TABLE x".into());
        assert_eq!(err.to_string(), "unsafe sql param \"1; DROP TABLE x\"");
    }

    #[test]
    fn test_unsafe_value_accessor() {
        let err = JsqlError::UnsafeSql("a b".into());
        assert_eq!(err.unsafe_value(), Some("a b"));
        assert!(err.is_security_violation());

        let other = JsqlError::MissingParameter("ids_list".into());
        assert_eq!(other.unsafe_value(), None);
        assert!(!other.is_security_violation());
    }

    #[test]
    fn test_parameter_errors() {
        assert!(JsqlError::MissingParameter("x".into()).is_parameter_error());
        assert!(JsqlError::MalformedListParameter("x".into()).is_parameter_error());
        assert!(!JsqlError::DatabaseError("x".into()).is_parameter_error());
    }

    #[test]
    fn test_display_prefixes() {
        assert_eq!(
            JsqlError::TemplateSyntaxError("Unclosed tag".into()).to_string(),
            "Template syntax error: Unclosed tag"
        );
        assert_eq!(
            JsqlError::MissingParameter("ids_list".into()).to_string(),
            "Missing parameter: ids_list"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: JsqlError = io_err.into();
        assert!(err.to_string().contains("file missing"));
    }
}
