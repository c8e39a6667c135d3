//! List and tuple-list parameter expansion.
//!
//! Query text may reference `:name_list` and `:name_tuple_list` placeholders.
//! Expansion replaces each with a parenthesized group of singular
//! placeholders and moves the elements into the parameter mapping:
//!
//! ```text
//! where id in :ids_list                 {ids: [1, 2]}
//! where id in (:ids_list_0, :ids_list_1) {ids_list_0: 1, ids_list_1: 2}
//!
//! where (a, b) in :pairs_tuple_list      {pairs: [(1, 2)]}
//! where (a, b) in ((:pairs_tuple_list_0_0, :pairs_tuple_list_0_1))
//! ```
//!
//! An empty sequence is replaced by the literal `null`.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use jsql_core::error::{JsqlError, JsqlResult};

use crate::params::Params;
use crate::value::Value;

/// Suffix marking a plain list placeholder.
pub const LIST_SUFFIX: &str = "_list";

/// Suffix marking a tuple-list placeholder.
pub const TUPLE_LIST_SUFFIX: &str = "_tuple_list";

// A leading second colon is captured so `x::text_list` casts are left alone.
static LIST_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<cast>:?):(?P<name>[A-Za-z_][A-Za-z0-9_]*_list)\b")
        .expect("list placeholder pattern compiles")
});

/// Returns the distinct list-placeholder names in `query`, without sigils.
pub fn list_param_keys(query: &str) -> BTreeSet<String> {
    LIST_KEY_RE
        .captures_iter(query)
        .filter(|caps| caps["cast"].is_empty())
        .map(|caps| caps["name"].to_string())
        .collect()
}

/// Expands every `:name_list` / `:name_tuple_list` placeholder in `query`.
///
/// The entry is looked up under the placeholder name (`ids_list`), falling
/// back to the stem (`ids`). It is removed from the mapping and replaced by
/// one entry per element.
///
/// # Errors
///
/// - `MissingParameter` if neither the name nor the stem is present.
/// - `MalformedListParameter` if the entry is not a sequence, a tuple-list
///   element is not a tuple, tuples differ in arity, a plain list contains a
///   nested sequence, or a generated key is already taken.
///
/// # Examples
///
/// ```
/// use jsql_db::expand::format_query_with_list_params;
/// use jsql_db::params;
/// use jsql_db::value::Value;
///
/// let (query, params) = format_query_with_list_params(
///     "select * from t where id in :ids_list",
///     params! { "ids" => vec![1_i64, 2] },
/// )
/// .unwrap();
/// assert_eq!(query, "select * from t where id in (:ids_list_0, :ids_list_1)");
/// assert_eq!(params.get("ids_list_1"), Some(&Value::Int(2)));
/// assert!(!params.contains_key("ids"));
/// ```
pub fn format_query_with_list_params(
    query: &str,
    mut params: Params,
) -> JsqlResult<(String, Params)> {
    let keys = list_param_keys(query);
    if keys.is_empty() {
        return Ok((query.to_string(), params));
    }

    let mut replacements: HashMap<String, String> = HashMap::with_capacity(keys.len());
    for name in keys {
        let value = take_list_value(&name, &mut params)?;
        let replacement = if name.ends_with(TUPLE_LIST_SUFFIX) {
            expand_tuple_list(&name, value, &mut params)?
        } else {
            expand_list(&name, value, &mut params)?
        };
        replacements.insert(name, replacement);
    }

    // One pass over the text, so a group inserted for one placeholder is
    // never rescanned as part of another.
    let expanded = LIST_KEY_RE.replace_all(query, |caps: &Captures<'_>| {
        match replacements.get(&caps["name"]) {
            Some(replacement) if caps["cast"].is_empty() => replacement.clone(),
            _ => caps[0].to_string(),
        }
    });

    tracing::debug!(placeholders = replacements.len(), "expanded list parameters");
    Ok((expanded.into_owned(), params))
}

fn take_list_value(name: &str, params: &mut Params) -> JsqlResult<Value> {
    if let Some(value) = params.remove(name) {
        return Ok(value);
    }
    let stem = name
        .strip_suffix(TUPLE_LIST_SUFFIX)
        .or_else(|| name.strip_suffix(LIST_SUFFIX))
        .unwrap_or(name);
    params.remove(stem).ok_or_else(|| {
        JsqlError::MissingParameter(format!(
            "no value for list placeholder ':{name}' (looked up '{name}' and '{stem}')"
        ))
    })
}

fn into_elements(name: &str, value: Value) -> JsqlResult<Vec<Value>> {
    match value {
        Value::List(items) | Value::Tuple(items) => Ok(items),
        other => Err(JsqlError::MalformedListParameter(format!(
            "':{name}' expects a sequence, got {}",
            other.type_name()
        ))),
    }
}

fn insert_new(params: &mut Params, key: String, value: Value) -> JsqlResult<()> {
    if params.contains_key(&key) {
        return Err(JsqlError::MalformedListParameter(format!(
            "generated key '{key}' collides with an existing parameter"
        )));
    }
    params.insert(key, value);
    Ok(())
}

fn group_or_null(groups: &[String]) -> String {
    if groups.is_empty() {
        "null".to_string()
    } else {
        format!("({})", groups.join(", "))
    }
}

fn expand_list(name: &str, value: Value, params: &mut Params) -> JsqlResult<String> {
    let items = into_elements(name, value)?;
    let mut placeholders = Vec::with_capacity(items.len());

    for (i, item) in items.into_iter().enumerate() {
        if item.is_sequence() {
            return Err(JsqlError::MalformedListParameter(format!(
                "':{name}' element {i} is a {}; use a _tuple_list placeholder for grouped values",
                item.type_name()
            )));
        }
        let key = format!("{name}_{i}");
        placeholders.push(format!(":{key}"));
        insert_new(params, key, item)?;
    }

    Ok(group_or_null(&placeholders))
}

fn expand_tuple_list(name: &str, value: Value, params: &mut Params) -> JsqlResult<String> {
    let tuples = into_elements(name, value)?;
    let mut groups = Vec::with_capacity(tuples.len());
    let mut arity = None;

    for (i, tuple) in tuples.into_iter().enumerate() {
        let elements = match tuple {
            Value::Tuple(elements) => elements,
            other => {
                return Err(JsqlError::MalformedListParameter(format!(
                    "':{name}' element {i} is a {}, expected a tuple",
                    other.type_name()
                )))
            }
        };
        let expected = *arity.get_or_insert(elements.len());
        if elements.is_empty() || elements.len() != expected {
            return Err(JsqlError::MalformedListParameter(format!(
                "':{name}' element {i} has arity {}, expected {expected}",
                elements.len()
            )));
        }

        let mut placeholders = Vec::with_capacity(elements.len());
        for (j, element) in elements.into_iter().enumerate() {
            if element.is_sequence() {
                return Err(JsqlError::MalformedListParameter(format!(
                    "':{name}' element {i}.{j} is a {}, expected a scalar",
                    element.type_name()
                )));
            }
            let key = format!("{name}_{i}_{j}");
            placeholders.push(format!(":{key}"));
            insert_new(params, key, element)?;
        }
        groups.push(format!("({})", placeholders.join(", ")));
    }

    Ok(group_or_null(&groups))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn test_list_keys() {
        let keys = list_param_keys(
            "select :a_list, :b_tuple_list, :a_list, :plain, x::text_list, :c_list_0",
        );
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["a_list".to_string(), "b_tuple_list".to_string()]
        );
    }

    #[test]
    fn test_expand_plain_list_in_parens() {
        let (query, params) = format_query_with_list_params(
            "select * from t where id in (:ids_list)",
            params! { "ids" => vec![1_i64, 2, 3] },
        )
        .unwrap();
        assert_eq!(
            query,
            "select * from t where id in ((:ids_list_0, :ids_list_1, :ids_list_2))"
        );
        assert_eq!(
            params,
            params! { "ids_list_0" => 1_i64, "ids_list_1" => 2_i64, "ids_list_2" => 3_i64 }
        );
    }

    #[test]
    fn test_empty_list_becomes_null() {
        let (query, params) = format_query_with_list_params(
            "select * from t where id in (:ids_list)",
            params! { "ids" => Vec::<i64>::new() },
        )
        .unwrap();
        assert_eq!(query, "select * from t where id in (null)");
        assert!(params.is_empty());
    }

    #[test]
    fn test_full_key_preferred_over_stem() {
        let (query, params) = format_query_with_list_params(
            "in :ids_list",
            params! { "ids_list" => vec![7_i64], "ids" => "untouched" },
        )
        .unwrap();
        assert_eq!(query, "in (:ids_list_0)");
        assert_eq!(params.get("ids_list_0"), Some(&Value::Int(7)));
        assert_eq!(params.get("ids"), Some(&Value::from("untouched")));
        assert!(!params.contains_key("ids_list"));
    }

    #[test]
    fn test_repeated_placeholder_replaced_everywhere() {
        let (query, params) = format_query_with_list_params(
            "a in :x_list or b in :x_list",
            params! { "x" => vec!["p", "q"] },
        )
        .unwrap();
        assert_eq!(
            query,
            "a in (:x_list_0, :x_list_1) or b in (:x_list_0, :x_list_1)"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_overlapping_names_are_independent() {
        let (query, _) = format_query_with_list_params(
            ":a_list :a_list_b_list",
            params! { "a" => vec![1_i64], "a_list_b" => vec![2_i64] },
        )
        .unwrap();
        assert_eq!(query, "(:a_list_0) (:a_list_b_list_0)");
    }

    #[test]
    fn test_tuple_list_numbering() {
        let (query, params) = format_query_with_list_params(
            "where (a, b, c) in :rows_tuple_list",
            params! { "rows" => vec![(1_i64, "x", true), (2_i64, "y", false)] },
        )
        .unwrap();
        assert_eq!(
            query,
            "where (a, b, c) in ((:rows_tuple_list_0_0, :rows_tuple_list_0_1, :rows_tuple_list_0_2), \
             (:rows_tuple_list_1_0, :rows_tuple_list_1_1, :rows_tuple_list_1_2))"
        );
        assert_eq!(params.len(), 6);
        assert_eq!(params.get("rows_tuple_list_0_1"), Some(&Value::from("x")));
        assert_eq!(params.get("rows_tuple_list_1_0"), Some(&Value::Int(2)));
        assert_eq!(params.get("rows_tuple_list_1_2"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_tuple_list_single_pair() {
        let (query, params) = format_query_with_list_params(
            "in :pairs_tuple_list",
            params! { "pairs" => vec![(1_i64, 2_i64)] },
        )
        .unwrap();
        assert_eq!(query, "in ((:pairs_tuple_list_0_0, :pairs_tuple_list_0_1))");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_empty_tuple_list_becomes_null() {
        let (query, params) = format_query_with_list_params(
            "in (:pairs_tuple_list)",
            params! { "pairs" => Value::List(vec![]) },
        )
        .unwrap();
        assert_eq!(query, "in (null)");
        assert!(params.is_empty());
    }

    #[test]
    fn test_missing_key() {
        let err = format_query_with_list_params("in :ids_list", Params::new()).unwrap_err();
        assert!(matches!(err, JsqlError::MissingParameter(_)));
    }

    #[test]
    fn test_scalar_under_list_key() {
        let err =
            format_query_with_list_params("in :ids_list", params! { "ids" => 1_i64 }).unwrap_err();
        assert!(matches!(err, JsqlError::MalformedListParameter(_)));
    }

    #[test]
    fn test_non_tuple_in_tuple_list() {
        let err = format_query_with_list_params(
            "in :pairs_tuple_list",
            params! { "pairs" => vec![1_i64, 2] },
        )
        .unwrap_err();
        assert!(matches!(err, JsqlError::MalformedListParameter(_)));
    }

    #[test]
    fn test_mixed_arity_rejected() {
        let pairs = Value::List(vec![
            Value::from((1_i64, 2_i64)),
            Value::from((1_i64, 2_i64, 3_i64)),
        ]);
        let err = format_query_with_list_params("in :p_tuple_list", params! { "p" => pairs })
            .unwrap_err();
        assert!(matches!(err, JsqlError::MalformedListParameter(_)));
    }

    #[test]
    fn test_nested_list_in_plain_list_rejected() {
        let nested = Value::List(vec![Value::from(vec![1_i64])]);
        let err =
            format_query_with_list_params("in :x_list", params! { "x" => nested }).unwrap_err();
        assert!(matches!(err, JsqlError::MalformedListParameter(_)));
    }

    #[test]
    fn test_collision_with_existing_key() {
        let err = format_query_with_list_params(
            "in :ids_list",
            params! { "ids" => vec![1_i64], "ids_list_0" => 9_i64 },
        )
        .unwrap_err();
        assert!(matches!(err, JsqlError::MalformedListParameter(_)));
    }

    #[test]
    fn test_no_placeholders_is_identity() {
        let p = params! { "id" => 1_i64 };
        let (query, params) = format_query_with_list_params("select :id", p.clone()).unwrap();
        assert_eq!(query, "select :id");
        assert_eq!(params, p);
    }

    #[test]
    fn test_cast_is_left_alone() {
        let (query, _) =
            format_query_with_list_params("select x::text_list from t", Params::new()).unwrap();
        assert_eq!(query, "select x::text_list from t");
    }
}
