//! Built-in template filters.
//!
//! Each filter is a [`Filter`] registered in a [`FilterRegistry`]. The
//! registry always carries [`assert_safe`](crate::safety::assert_safe) and the
//! `dangerously_inject_sql` marker filter; the rest are the small set of
//! string and list helpers query templates tend to need.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use jsql_core::error::{JsqlError, JsqlResult};

use crate::context::ContextValue;
use crate::raw::DangerouslyInjectedSql;
use crate::safety::{assert_safe, ASSERT_SAFE, DANGEROUSLY_INJECT_SQL};

/// A template filter function.
///
/// Takes a value and optional arguments, and returns a transformed value.
pub trait Filter: Send + Sync {
    /// Returns the filter name.
    fn name(&self) -> &str;

    /// Applies the filter to a value with the given arguments.
    fn apply(&self, value: &ContextValue, args: &[ContextValue]) -> JsqlResult<ContextValue>;
}

/// A filter backed by a closure, for [`FilterRegistry::register_fn`].
struct FnFilter<F> {
    name: String,
    func: F,
}

impl<F> Filter for FnFilter<F>
where
    F: Fn(&ContextValue, &[ContextValue]) -> JsqlResult<ContextValue> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, value: &ContextValue, args: &[ContextValue]) -> JsqlResult<ContextValue> {
        (self.func)(value, args)
    }
}

/// A registry of available template filters.
#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn Filter>>,
}

impl FilterRegistry {
    /// Creates a new empty filter registry.
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// Registers a filter, replacing any filter with the same name.
    pub fn register(&mut self, filter: Arc<dyn Filter>) {
        self.filters.insert(filter.name().to_string(), filter);
    }

    /// Registers a closure as a filter.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&ContextValue, &[ContextValue]) -> JsqlResult<ContextValue> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnFilter {
            name: name.into(),
            func,
        }));
    }

    /// Returns `true` if a filter with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Applies a named filter to a value.
    ///
    /// # Errors
    ///
    /// Returns a `RenderError` for an unknown filter, or whatever the filter
    /// itself returns.
    pub fn apply(
        &self,
        name: &str,
        value: &ContextValue,
        args: &[ContextValue],
    ) -> JsqlResult<ContextValue> {
        let filter = self
            .filters
            .get(name)
            .ok_or_else(|| JsqlError::RenderError(format!("Unknown filter: '{name}'")))?;
        filter.apply(value, args)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("FilterRegistry")
            .field("filters", &names)
            .finish()
    }
}

/// Returns the default filter registry with all built-in filters.
pub fn default_registry() -> &'static FilterRegistry {
    static REGISTRY: OnceLock<FilterRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut r = FilterRegistry::new();
        register_all(&mut r);
        r
    })
}

/// Registers all built-in filters.
fn register_all(r: &mut FilterRegistry) {
    // Safety
    r.register(Arc::new(AssertSafeFilter));
    r.register(Arc::new(DangerouslyInjectSqlFilter));

    // String filters
    r.register(Arc::new(LowerFilter));
    r.register(Arc::new(UpperFilter));
    r.register(Arc::new(TrimFilter));
    r.register(Arc::new(ReplaceFilter));

    // List filters
    r.register(Arc::new(LengthFilter));
    r.register(Arc::new(FirstFilter));
    r.register(Arc::new(LastFilter));
    r.register(Arc::new(JoinFilter));

    // Conversion and logic
    r.register(Arc::new(IntFilter));
    r.register(Arc::new(DefaultFilter));
}

fn arg_or_empty(args: &[ContextValue], idx: usize) -> String {
    args.get(idx)
        .map(ContextValue::to_display_string)
        .unwrap_or_default()
}

// ============================================================
// Safety filters
// ============================================================

struct AssertSafeFilter;
impl Filter for AssertSafeFilter {
    fn name(&self) -> &str {
        ASSERT_SAFE
    }
    fn apply(&self, value: &ContextValue, _args: &[ContextValue]) -> JsqlResult<ContextValue> {
        assert_safe(value)
    }
}

/// Wraps a value in the raw-injection marker.
///
/// Shared by the filter form (`x | dangerously_inject_sql`) and the global
/// function form (`dangerously_inject_sql(x)`).
pub fn mark_raw(value: &ContextValue) -> ContextValue {
    match value {
        ContextValue::Raw(_) => value.clone(),
        other => ContextValue::Raw(DangerouslyInjectedSql::new(other.to_display_string())),
    }
}

struct DangerouslyInjectSqlFilter;
impl Filter for DangerouslyInjectSqlFilter {
    fn name(&self) -> &str {
        DANGEROUSLY_INJECT_SQL
    }
    fn apply(&self, value: &ContextValue, _args: &[ContextValue]) -> JsqlResult<ContextValue> {
        tracing::debug!("marking value as raw sql");
        Ok(mark_raw(value))
    }
}

// ============================================================
// String filters
// ============================================================

struct LowerFilter;
impl Filter for LowerFilter {
    fn name(&self) -> &str {
        "lower"
    }
    fn apply(&self, value: &ContextValue, _args: &[ContextValue]) -> JsqlResult<ContextValue> {
        Ok(ContextValue::String(
            value.to_display_string().to_lowercase(),
        ))
    }
}

struct UpperFilter;
impl Filter for UpperFilter {
    fn name(&self) -> &str {
        "upper"
    }
    fn apply(&self, value: &ContextValue, _args: &[ContextValue]) -> JsqlResult<ContextValue> {
        Ok(ContextValue::String(
            value.to_display_string().to_uppercase(),
        ))
    }
}

struct TrimFilter;
impl Filter for TrimFilter {
    fn name(&self) -> &str {
        "trim"
    }
    fn apply(&self, value: &ContextValue, _args: &[ContextValue]) -> JsqlResult<ContextValue> {
        Ok(ContextValue::String(
            value.to_display_string().trim().to_string(),
        ))
    }
}

struct ReplaceFilter;
impl Filter for ReplaceFilter {
    fn name(&self) -> &str {
        "replace"
    }
    fn apply(&self, value: &ContextValue, args: &[ContextValue]) -> JsqlResult<ContextValue> {
        if args.len() < 2 {
            return Err(JsqlError::RenderError(
                "replace filter requires two arguments".to_string(),
            ));
        }
        let old = arg_or_empty(args, 0);
        let new = arg_or_empty(args, 1);
        Ok(ContextValue::String(
            value.to_display_string().replace(&old, &new),
        ))
    }
}

// ============================================================
// List filters
// ============================================================

struct LengthFilter;
impl Filter for LengthFilter {
    fn name(&self) -> &str {
        "length"
    }
    fn apply(&self, value: &ContextValue, _args: &[ContextValue]) -> JsqlResult<ContextValue> {
        Ok(ContextValue::from(value.len().unwrap_or(0)))
    }
}

struct FirstFilter;
impl Filter for FirstFilter {
    fn name(&self) -> &str {
        "first"
    }
    fn apply(&self, value: &ContextValue, _args: &[ContextValue]) -> JsqlResult<ContextValue> {
        Ok(match value {
            ContextValue::List(items) => items.first().cloned().unwrap_or(ContextValue::None),
            ContextValue::String(s) => s
                .chars()
                .next()
                .map_or(ContextValue::None, |c| ContextValue::String(c.to_string())),
            _ => ContextValue::None,
        })
    }
}

struct LastFilter;
impl Filter for LastFilter {
    fn name(&self) -> &str {
        "last"
    }
    fn apply(&self, value: &ContextValue, _args: &[ContextValue]) -> JsqlResult<ContextValue> {
        Ok(match value {
            ContextValue::List(items) => items.last().cloned().unwrap_or(ContextValue::None),
            ContextValue::String(s) => s
                .chars()
                .last()
                .map_or(ContextValue::None, |c| ContextValue::String(c.to_string())),
            _ => ContextValue::None,
        })
    }
}

struct JoinFilter;
impl Filter for JoinFilter {
    fn name(&self) -> &str {
        "join"
    }
    fn apply(&self, value: &ContextValue, args: &[ContextValue]) -> JsqlResult<ContextValue> {
        let sep = arg_or_empty(args, 0);
        match value {
            ContextValue::List(items) => {
                let parts: Vec<String> = items.iter().map(ContextValue::to_display_string).collect();
                Ok(ContextValue::String(parts.join(&sep)))
            }
            other => Ok(ContextValue::String(other.to_display_string())),
        }
    }
}

// ============================================================
// Conversion and logic
// ============================================================

struct IntFilter;
impl Filter for IntFilter {
    fn name(&self) -> &str {
        "int"
    }
    fn apply(&self, value: &ContextValue, args: &[ContextValue]) -> JsqlResult<ContextValue> {
        let fallback = args.first().and_then(ContextValue::as_integer).unwrap_or(0);
        Ok(ContextValue::Integer(value.as_integer().unwrap_or(fallback)))
    }
}

struct DefaultFilter;
impl Filter for DefaultFilter {
    fn name(&self) -> &str {
        "default"
    }
    fn apply(&self, value: &ContextValue, args: &[ContextValue]) -> JsqlResult<ContextValue> {
        if matches!(value, ContextValue::None) {
            Ok(args.first().cloned().unwrap_or(ContextValue::None))
        } else {
            Ok(value.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_filter(name: &str, value: ContextValue, args: Vec<ContextValue>) -> ContextValue {
        default_registry().apply(name, &value, &args).unwrap()
    }

    #[test]
    fn test_assert_safe_registered() {
        assert_eq!(
            apply_filter(ASSERT_SAFE, ContextValue::from("ok_1"), vec![]),
            ContextValue::from("ok_1")
        );
        let err = default_registry()
            .apply(ASSERT_SAFE, &ContextValue::from("no way"), &[])
            .unwrap_err();
        assert!(err.is_security_violation());
    }

    #[test]
    fn test_dangerously_inject_sql() {
        let result = apply_filter(DANGEROUSLY_INJECT_SQL, ContextValue::from("a, b"), vec![]);
        assert!(result.is_raw());
        assert_eq!(result.to_display_string(), "a, b");
        // Marking twice keeps the same text.
        assert_eq!(mark_raw(&result), result);
    }

    #[test]
    fn test_lower_upper_trim() {
        assert_eq!(
            apply_filter("lower", ContextValue::from("USERS"), vec![]).to_display_string(),
            "users"
        );
        assert_eq!(
            apply_filter("upper", ContextValue::from("asc"), vec![]).to_display_string(),
            "ASC"
        );
        assert_eq!(
            apply_filter("trim", ContextValue::from("  id "), vec![]).to_display_string(),
            "id"
        );
    }

    #[test]
    fn test_replace() {
        let result = apply_filter(
            "replace",
            ContextValue::from("created-at"),
            vec![ContextValue::from("-"), ContextValue::from("_")],
        );
        assert_eq!(result.to_display_string(), "created_at");
        assert!(default_registry()
            .apply("replace", &ContextValue::from("x"), &[])
            .is_err());
    }

    #[test]
    fn test_list_filters() {
        let list = ContextValue::from(vec!["a", "b", "c"]);
        assert_eq!(
            apply_filter("length", list.clone(), vec![]),
            ContextValue::Integer(3)
        );
        assert_eq!(
            apply_filter("first", list.clone(), vec![]),
            ContextValue::from("a")
        );
        assert_eq!(
            apply_filter("last", list.clone(), vec![]),
            ContextValue::from("c")
        );
        assert_eq!(
            apply_filter("join", list, vec![ContextValue::from("_")]),
            ContextValue::from("a_b_c")
        );
        assert_eq!(
            apply_filter("first", ContextValue::List(vec![]), vec![]),
            ContextValue::None
        );
    }

    #[test]
    fn test_int() {
        assert_eq!(
            apply_filter("int", ContextValue::from("42"), vec![]),
            ContextValue::Integer(42)
        );
        assert_eq!(
            apply_filter("int", ContextValue::from("x"), vec![ContextValue::Integer(7)]),
            ContextValue::Integer(7)
        );
    }

    #[test]
    fn test_default() {
        assert_eq!(
            apply_filter("default", ContextValue::None, vec![ContextValue::from("id")]),
            ContextValue::from("id")
        );
        assert_eq!(
            apply_filter("default", ContextValue::from("name"), vec![ContextValue::from("id")]),
            ContextValue::from("name")
        );
    }

    #[test]
    fn test_unknown_filter() {
        let err = default_registry()
            .apply("nope", &ContextValue::None, &[])
            .unwrap_err();
        assert!(matches!(err, JsqlError::RenderError(_)));
    }

    #[test]
    fn test_register_fn() {
        let mut registry = FilterRegistry::new();
        registry.register_fn("double", |v: &ContextValue, _: &[ContextValue]| {
            Ok(ContextValue::Integer(v.as_integer().unwrap_or(0) * 2))
        });
        assert!(registry.contains("double"));
        assert_eq!(
            registry.apply("double", &ContextValue::Integer(4), &[]).unwrap(),
            ContextValue::Integer(8)
        );
    }
}
