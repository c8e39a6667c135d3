//! The raw-injection marker.
//!
//! [`DangerouslyInjectedSql`] is the only way to get text into a rendered
//! query without passing the allow-list check. It has a single constructor,
//! cannot be deserialized, and is never produced from a parameter value on
//! its own: somebody has to call [`DangerouslyInjectedSql::new`] (directly,
//! or through the `dangerously_inject_sql` template function/filter).

use std::fmt;

use serde::Serialize;

/// A string the caller asserts is safe to write into query text verbatim.
///
/// # Examples
///
/// ```
/// use jsql_template::raw::DangerouslyInjectedSql;
///
/// let raw = DangerouslyInjectedSql::new("count(*) as n");
/// assert_eq!(raw.as_str(), "count(*) as n");
/// assert_eq!(raw.to_string(), "count(*) as n");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DangerouslyInjectedSql(String);

impl DangerouslyInjectedSql {
    /// Marks `sql` as exempt from validation.
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    /// Returns the text that will be emitted.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwraps the marker into the text it carries.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DangerouslyInjectedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
