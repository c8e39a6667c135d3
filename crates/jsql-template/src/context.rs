//! Template context for variable resolution and rendering.
//!
//! Provides [`Context`] for holding template variables in a stack-based scope,
//! [`ContextValue`] for dynamic template values, and [`TemplateFunction`] for
//! values that templates can call (`{{ bindparam(x) }}`).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jsql_core::JsqlResult;

use crate::raw::DangerouslyInjectedSql;

/// A function that can be stored in a context and called from a template.
///
/// Closures of the right shape implement this automatically.
pub trait TemplateFunction: Send + Sync {
    /// Calls the function with already-evaluated arguments.
    fn call(&self, args: &[ContextValue]) -> JsqlResult<ContextValue>;
}

impl<F> TemplateFunction for F
where
    F: Fn(&[ContextValue]) -> JsqlResult<ContextValue> + Send + Sync,
{
    fn call(&self, args: &[ContextValue]) -> JsqlResult<ContextValue> {
        self(args)
    }
}

/// A shareable handle to a [`TemplateFunction`].
#[derive(Clone)]
pub struct Callable(Arc<dyn TemplateFunction>);

impl Callable {
    /// Wraps a function so it can be placed in a context.
    pub fn new(func: impl TemplateFunction + 'static) -> Self {
        Self(Arc::new(func))
    }

    /// Wraps an already shared function.
    pub fn from_arc(func: Arc<dyn TemplateFunction>) -> Self {
        Self(func)
    }

    /// Invokes the function.
    pub fn call(&self, args: &[ContextValue]) -> JsqlResult<ContextValue> {
        self.0.call(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<function>")
    }
}

/// Represents a dynamic value in a template context.
#[derive(Debug, Clone)]
pub enum ContextValue {
    /// A string value.
    String(String),
    /// A 64-bit integer.
    Integer(i64),
    /// A 64-bit floating point number.
    Float(f64),
    /// A boolean value.
    Bool(bool),
    /// An ordered list of values.
    List(Vec<ContextValue>),
    /// A key-value mapping.
    Dict(HashMap<String, ContextValue>),
    /// The absence of a value. Also what undefined names resolve to.
    None,
    /// Text exempt from the safety check.
    Raw(DangerouslyInjectedSql),
    /// A callable value.
    Function(Callable),
}

impl ContextValue {
    /// Returns `true` if this value is considered "truthy" in template logic.
    ///
    /// - `None` is falsy
    /// - Empty strings, empty lists, empty dicts are falsy
    /// - `Bool(false)` is falsy
    /// - `Integer(0)` and `Float(0.0)` are falsy
    /// - Everything else is truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Raw(r) => !r.as_str().is_empty(),
            Self::List(l) => !l.is_empty(),
            Self::Dict(d) => !d.is_empty(),
            Self::Function(_) => true,
        }
    }

    /// Converts this value to its display string.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Raw(r) => r.as_str().to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => {
                // Integer-valued floats keep their decimal point
                if f.fract() == 0.0 {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Self::Bool(b) => {
                if *b {
                    "True".to_string()
                } else {
                    "False".to_string()
                }
            }
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Self::to_repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Dict(map) => {
                let mut inner: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.to_repr()))
                    .collect();
                inner.sort();
                format!("{{{}}}", inner.join(", "))
            }
            Self::None => String::new(),
            Self::Function(_) => "<function>".to_string(),
        }
    }

    /// Returns a repr-style string (strings quoted).
    fn to_repr(&self) -> String {
        match self {
            Self::String(s) => format!("'{s}'"),
            Self::None => "None".to_string(),
            other => other.to_display_string(),
        }
    }

    /// Returns `true` if this value carries the raw-injection marker.
    pub const fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    /// Resolves one attribute or index segment (e.g. `name`, `0`).
    pub fn resolve_path(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Dict(map) => map.get(key),
            Self::List(list) => key.parse::<usize>().ok().and_then(|idx| list.get(idx)),
            _ => None,
        }
    }

    /// Returns the length of a list, string, or dict.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::String(s) => Some(s.chars().count()),
            Self::Raw(r) => Some(r.as_str().chars().count()),
            Self::List(l) => Some(l.len()),
            Self::Dict(d) => Some(d.len()),
            _ => None,
        }
    }

    /// Returns `true` if this is an empty collection or empty string.
    pub fn is_empty(&self) -> Option<bool> {
        self.len().map(|l| l == 0)
    }

    /// Attempts to convert this value to an i64.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            Self::String(s) => s.trim().parse::<i64>().ok(),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Attempts to convert this value to an f64.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            Self::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Returns the string contents if this is a `String` or `Raw`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Raw(r) => Some(r.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl PartialEq for ContextValue {
    #[allow(clippy::cast_precision_loss)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Raw(a), Self::Raw(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Integer(a), Self::Float(b)) | (Self::Float(b), Self::Integer(a)) => {
                (*a as f64) == *b
            }
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::None, Self::None) => true,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

// -- From implementations --

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i32> for ContextValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<i64> for ContextValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<u32> for ContextValue {
    fn from(i: u32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<usize> for ContextValue {
    #[allow(clippy::cast_possible_wrap)]
    fn from(i: usize) -> Self {
        Self::Integer(i as i64)
    }
}

impl From<f64> for ContextValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for ContextValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<DangerouslyInjectedSql> for ContextValue {
    fn from(r: DangerouslyInjectedSql) -> Self {
        Self::Raw(r)
    }
}

impl From<Callable> for ContextValue {
    fn from(c: Callable) -> Self {
        Self::Function(c)
    }
}

impl<T: Into<Self>> From<Vec<T>> for ContextValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Self>> From<HashMap<String, T>> for ContextValue {
    fn from(m: HashMap<String, T>) -> Self {
        Self::Dict(m.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Self>> From<Option<T>> for ContextValue {
    fn from(o: Option<T>) -> Self {
        o.map_or(Self::None, Into::into)
    }
}

impl From<serde_json::Value> for ContextValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    Self::None
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(arr) => Self::List(arr.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Dict(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// A template context that holds variables in a stack of scopes.
///
/// `{% for %}` bodies get their own scope; lookups search from the top of the
/// stack downward.
///
/// # Examples
///
/// ```
/// use jsql_template::context::{Context, ContextValue};
///
/// let mut ctx = Context::new();
/// ctx.set("table", ContextValue::from("users"));
/// assert_eq!(ctx.get("table").unwrap().to_display_string(), "users");
///
/// ctx.push();
/// ctx.set("table", ContextValue::from("orders"));
/// assert_eq!(ctx.get("table").unwrap().to_display_string(), "orders");
///
/// ctx.pop();
/// assert_eq!(ctx.get("table").unwrap().to_display_string(), "users");
/// ```
pub struct Context {
    stack: Vec<HashMap<String, ContextValue>>,
}

impl Context {
    /// Creates a new empty context with a single scope.
    pub fn new() -> Self {
        Self {
            stack: vec![HashMap::new()],
        }
    }

    /// Pushes a new scope onto the context stack.
    pub fn push(&mut self) {
        self.stack.push(HashMap::new());
    }

    /// Pops the top scope from the context stack.
    ///
    /// If only one scope remains, this is a no-op.
    pub fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// Sets a variable in the current (top) scope.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        if let Some(top) = self.stack.last_mut() {
            top.insert(key.into(), value.into());
        }
    }

    /// Returns `true` if any scope defines `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.stack.iter().any(|scope| scope.contains_key(key))
    }

    /// Looks up a variable by name, searching from the top scope downward.
    ///
    /// Supports dot-separated paths like `user.name` or `items.0`.
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        let mut parts = key.split('.');
        let root_key = parts.next()?;

        let mut current = self
            .stack
            .iter()
            .rev()
            .find_map(|scope| scope.get(root_key))?;

        for part in parts {
            current = current.resolve_path(part)?;
        }

        Some(current)
    }

    /// Flattens all scopes into a single map, with later scopes overriding earlier ones.
    pub fn flatten(&self) -> HashMap<String, ContextValue> {
        let mut result = HashMap::new();
        for scope in &self.stack {
            for (k, v) in scope {
                result.insert(k.clone(), v.clone());
            }
        }
        result
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, V: Into<ContextValue>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Self::new();
        for (k, v) in iter {
            ctx.set(k, v);
        }
        ctx
    }
}
