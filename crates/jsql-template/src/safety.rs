//! The safety layer bolted onto the template engine.
//!
//! Two pieces work together:
//!
//! - [`assert_safe`] is the validator. A value passes if it is none (emits
//!   nothing), carries the raw-injection marker (emitted verbatim), or has a
//!   string form matching `[A-Za-z0-9_]*`. Anything else aborts the render
//!   with [`JsqlError::UnsafeSql`].
//! - [`AssertSafeExtension`] is a [`StreamFilter`] that rewrites every
//!   interpolation `{{ expr }}` into `{{ (expr) | assert_safe }}` at the token
//!   level, after lexing and before parsing. Because it works on tokens, an
//!   interpolation cannot slip past it through comments, string literals, or
//!   unusual spacing.

use jsql_core::error::{JsqlError, JsqlResult};
use jsql_core::safe::is_safe;

use crate::context::ContextValue;
use crate::lexer::{Token, TokenKind};

/// Name of the validator filter every interpolation is routed through.
pub const ASSERT_SAFE: &str = "assert_safe";

/// Name of the marker constructor, available as a global and as a filter.
pub const DANGEROUSLY_INJECT_SQL: &str = "dangerously_inject_sql";

/// Name of the global holding a marked `","`.
pub const COMMA: &str = "comma";

/// Names every environment installs and nobody may re-register.
pub const RESERVED_NAMES: [&str; 3] = [ASSERT_SAFE, DANGEROUSLY_INJECT_SQL, COMMA];

/// Validates a value about to be written into query text.
///
/// # Errors
///
/// Returns [`JsqlError::UnsafeSql`] carrying the offending string form when
/// the value is neither none, marked, nor allow-listed.
///
/// # Examples
///
/// ```
/// use jsql_template::context::ContextValue;
/// use jsql_template::safety::assert_safe;
///
/// assert!(assert_safe(&ContextValue::from("users")).is_ok());
/// assert!(assert_safe(&ContextValue::from("users; drop")).is_err());
/// ```
pub fn assert_safe(value: &ContextValue) -> JsqlResult<ContextValue> {
    match value {
        ContextValue::None => Ok(ContextValue::None),
        ContextValue::Raw(_) => Ok(value.clone()),
        other => {
            let text = other.to_display_string();
            if is_safe(&text) {
                Ok(ContextValue::String(text))
            } else {
                tracing::warn!("rejected unsafe value at interpolation point");
                tracing::debug!(value = %text, "unsafe value");
                Err(JsqlError::UnsafeSql(text))
            }
        }
    }
}

/// A transformation applied to a template's token stream before parsing.
pub trait StreamFilter: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Rewrites the token stream.
    fn filter_stream(&self, tokens: Vec<Token>) -> Vec<Token>;
}

/// Wraps every interpolation expression in `( ... ) | assert_safe`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertSafeExtension;

impl StreamFilter for AssertSafeExtension {
    fn name(&self) -> &str {
        "assert_safe_extension"
    }

    fn filter_stream(&self, tokens: Vec<Token>) -> Vec<Token> {
        let mut out = Vec::with_capacity(tokens.len() + tokens.len() / 2);
        for token in tokens {
            let lineno = token.lineno;
            match token.kind {
                TokenKind::VariableBegin => {
                    out.push(token);
                    out.push(Token::new(lineno, TokenKind::LParen));
                }
                TokenKind::VariableEnd => {
                    out.push(Token::new(lineno, TokenKind::RParen));
                    out.push(Token::new(lineno, TokenKind::Pipe));
                    out.push(Token::new(lineno, TokenKind::Name(ASSERT_SAFE.to_string())));
                    out.push(token);
                }
                _ => out.push(token),
            }
        }
        out
    }
}
