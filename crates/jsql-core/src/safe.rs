//! The allow-list grammar for values that may be written into query text.
//!
//! A value is safe when its string form matches `^[A-Za-z0-9_]*$`. The empty
//! string is safe. Nothing else is: no whitespace, quotes, punctuation, or
//! non-ASCII letters.

use once_cell::sync::Lazy;
use regex::Regex;

/// The allow-list pattern, anchored at both ends.
pub const SAFE_VALUE_PATTERN: &str = r"\A[A-Za-z0-9_]*\z";

static SAFE_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(SAFE_VALUE_PATTERN).expect("allow-list pattern compiles"));

/// Returns `true` if `value` matches the allow-list grammar.
///
/// # Examples
///
/// ```
/// use jsql_core::safe::is_safe;
///
/// assert!(is_safe("users_2024"));
/// assert!(is_safe(""));
/// assert!(!is_safe("O'Brien"));
/// assert!(!is_safe("id\n"));
/// ```
pub fn is_safe(value: &str) -> bool {
    SAFE_VALUE_RE.is_match(value)
}
