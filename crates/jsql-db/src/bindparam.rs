//! Bind-key generation.
//!
//! Templates call `{{ bindparam(value) }}` to turn a value into a named
//! placeholder instead of interpolating it. Each call stores the value in the
//! call's [`Params`] under a fresh key (`bp0`, `bp1`, ...) and emits the key
//! with its `:` sigil. A [`KeyGenerator`] never hands out a key that already
//! exists in the mapping, and a new one is built for every top-level render,
//! so numbering depends only on the order of calls within that render.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use jsql_core::error::{JsqlError, JsqlResult};
use jsql_core::settings::{validate_bind_prefix, DEFAULT_BIND_PREFIX};
use jsql_template::context::{Callable, ContextValue};
use jsql_template::raw::DangerouslyInjectedSql;

use crate::params::Params;
use crate::value::Value;

/// Name under which the bind function is exposed to templates.
pub const BINDPARAM: &str = "bindparam";

/// Produces collision-free placeholder names, one counter per prefix.
///
/// # Examples
///
/// ```
/// use jsql_db::bindparam::KeyGenerator;
/// use jsql_db::params;
///
/// let taken = params! { "bp1" => 0_i64 };
/// let mut keys = KeyGenerator::new();
/// assert_eq!(keys.next_key("bp", &taken), "bp0");
/// assert_eq!(keys.next_key("bp", &taken), "bp2");
/// assert_eq!(keys.next_key("arg", &taken), "arg0");
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    counters: HashMap<String, usize>,
}

impl KeyGenerator {
    /// Creates a generator with every counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next name for `prefix` that is not a key of `params`.
    ///
    /// The counter advances on every candidate, including rejected ones.
    pub fn next_key(&mut self, prefix: &str, params: &Params) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        loop {
            let candidate = format!("{prefix}{counter}");
            *counter += 1;
            if !params.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

#[derive(Debug, Default)]
struct BindState {
    params: Params,
    keys: KeyGenerator,
}

/// The per-call bind function and the parameter mapping it writes into.
///
/// Cloning shares the same state, which is how the template-side
/// [`Callable`] and the caller see the same mapping.
#[derive(Debug, Clone)]
pub struct BindParam {
    prefix: String,
    state: Arc<Mutex<BindState>>,
}

impl BindParam {
    /// Creates a bind function over `params` using the default prefix.
    pub fn new(params: Params) -> Self {
        Self::from_parts(params, DEFAULT_BIND_PREFIX.to_string())
    }

    /// Creates a bind function over `params` using `prefix`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if `prefix` is empty or not a Safe
    /// Value, since generated names reach the query text unvalidated.
    pub fn with_prefix(params: Params, prefix: impl Into<String>) -> JsqlResult<Self> {
        let prefix = prefix.into();
        validate_bind_prefix(&prefix)?;
        Ok(Self::from_parts(params, prefix))
    }

    fn from_parts(params: Params, prefix: String) -> Self {
        Self {
            prefix,
            state: Arc::new(Mutex::new(BindState {
                params,
                keys: KeyGenerator::new(),
            })),
        }
    }

    fn lock(&self) -> JsqlResult<MutexGuard<'_, BindState>> {
        self.state
            .lock()
            .map_err(|_| JsqlError::RenderError("bind parameter state poisoned".to_string()))
    }

    /// Stores `value` under a fresh key and returns `:key`.
    ///
    /// # Errors
    ///
    /// Returns a `RenderError` if the shared state is poisoned.
    pub fn bind(&self, value: impl Into<Value>) -> JsqlResult<String> {
        let mut state = self.lock()?;
        let BindState { params, keys } = &mut *state;
        let key = keys.next_key(&self.prefix, params);
        params.insert(key.clone(), value);
        tracing::trace!(key = %key, "bound parameter");
        Ok(format!(":{key}"))
    }

    /// Returns the template-callable form: `bindparam(value)`.
    ///
    /// The returned placeholder is marked raw; the prefix is checked at
    /// construction, so names are the sigil, a safe prefix and digits.
    pub fn callable(&self) -> Callable {
        let bind = self.clone();
        Callable::new(move |args: &[ContextValue]| -> JsqlResult<ContextValue> {
            let [arg] = args else {
                return Err(JsqlError::RenderError(format!(
                    "{BINDPARAM}() takes exactly one argument ({} given)",
                    args.len()
                )));
            };
            let placeholder = bind.bind(value_from_context(arg)?)?;
            Ok(ContextValue::Raw(DangerouslyInjectedSql::new(placeholder)))
        })
    }

    /// Takes the mapping out, leaving an empty one behind.
    ///
    /// # Errors
    ///
    /// Returns a `RenderError` if the shared state is poisoned.
    pub fn take_params(&self) -> JsqlResult<Params> {
        Ok(std::mem::take(&mut self.lock()?.params))
    }
}

/// Converts a template value back into a parameter value.
///
/// # Errors
///
/// Returns a `RenderError` for functions, which have no parameter form.
pub fn value_from_context(value: &ContextValue) -> JsqlResult<Value> {
    Ok(match value {
        ContextValue::None => Value::Null,
        ContextValue::Bool(b) => Value::Bool(*b),
        ContextValue::Integer(i) => Value::Int(*i),
        ContextValue::Float(f) => Value::Float(*f),
        ContextValue::String(s) => Value::String(s.clone()),
        ContextValue::Raw(raw) => Value::String(raw.as_str().to_string()),
        ContextValue::List(items) => Value::List(
            items
                .iter()
                .map(value_from_context)
                .collect::<JsqlResult<_>>()?,
        ),
        ContextValue::Dict(map) => {
            let mut object = serde_json::Map::new();
            for (k, v) in map {
                let json = serde_json::to_value(value_from_context(v)?)
                    .map_err(|e| JsqlError::SerializationError(e.to_string()))?;
                object.insert(k.clone(), json);
            }
            Value::Json(serde_json::Value::Object(object))
        }
        ContextValue::Function(_) => {
            return Err(JsqlError::RenderError(
                "a function cannot be bound as a parameter".to_string(),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn test_counter_starts_at_zero_per_prefix() {
        let empty = Params::new();
        let mut keys = KeyGenerator::new();
        assert_eq!(keys.next_key("bp", &empty), "bp0");
        assert_eq!(keys.next_key("bp", &empty), "bp1");
        assert_eq!(keys.next_key("x", &empty), "x0");
        assert_eq!(keys.next_key("bp", &empty), "bp2");
    }

    #[test]
    fn test_skips_existing_keys() {
        let taken = params! { "bp0" => 1_i64, "bp1" => 2_i64, "bp3" => 3_i64 };
        let mut keys = KeyGenerator::new();
        assert_eq!(keys.next_key("bp", &taken), "bp2");
        assert_eq!(keys.next_key("bp", &taken), "bp4");
    }

    #[test]
    fn test_bind_stores_value_and_returns_placeholder() {
        let bind = BindParam::new(params! { "bp0" => "taken" });
        assert_eq!(bind.bind(5_i64).unwrap(), ":bp1");
        assert_eq!(bind.bind("x").unwrap(), ":bp2");

        let p = bind.take_params().unwrap();
        assert_eq!(p.get("bp0"), Some(&Value::from("taken")));
        assert_eq!(p.get("bp1"), Some(&Value::Int(5)));
        assert_eq!(p.get("bp2"), Some(&Value::from("x")));
    }

    #[test]
    fn test_custom_prefix() {
        let bind = BindParam::with_prefix(Params::new(), "arg").unwrap();
        assert_eq!(bind.bind(1_i64).unwrap(), ":arg0");
    }

    #[test]
    fn test_unsafe_prefix_rejected() {
        for prefix in ["1 or 1=1 --", "x; drop table users; --", "bp:", ""] {
            let err = BindParam::with_prefix(Params::new(), prefix).unwrap_err();
            assert!(
                matches!(err, JsqlError::ConfigurationError(_)),
                "prefix {prefix:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_independent_instances_do_not_share_counters() {
        let a = BindParam::new(Params::new());
        let b = BindParam::new(Params::new());
        assert_eq!(a.bind(1_i64).unwrap(), ":bp0");
        assert_eq!(a.bind(1_i64).unwrap(), ":bp1");
        assert_eq!(b.bind(1_i64).unwrap(), ":bp0");
    }

    #[test]
    fn test_callable_returns_raw_placeholder() {
        let bind = BindParam::new(Params::new());
        let f = bind.callable();
        let out = f.call(&[ContextValue::from("O'Brien")]).unwrap();
        assert!(out.is_raw());
        assert_eq!(out.to_display_string(), ":bp0");
        assert_eq!(
            bind.take_params().unwrap().get("bp0"),
            Some(&Value::from("O'Brien"))
        );
        assert!(f.call(&[]).is_err());
    }

    #[test]
    fn test_value_from_context() {
        assert_eq!(value_from_context(&ContextValue::None).unwrap(), Value::Null);
        assert_eq!(
            value_from_context(&ContextValue::from(vec![1_i64, 2])).unwrap(),
            Value::from(vec![1_i64, 2])
        );
        let mut map = HashMap::new();
        map.insert("k".to_string(), ContextValue::Integer(1));
        assert!(matches!(
            value_from_context(&ContextValue::Dict(map)).unwrap(),
            Value::Json(_)
        ));
        let f = Callable::new(|_: &[ContextValue]| -> JsqlResult<ContextValue> {
            Ok(ContextValue::None)
        });
        assert!(value_from_context(&ContextValue::Function(f)).is_err());
    }
}
