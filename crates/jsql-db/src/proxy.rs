//! Read-only views over a returned [`ResultSet`].
//!
//! Every projection that needs a particular column (the first for
//! `pk_map`/`scalars`, the first two for `kv_map`) checks the width once up
//! front; a result narrower than the projection is a `DatabaseError`.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use jsql_core::error::{JsqlError, JsqlResult};

use crate::executor::ResultSet;
use crate::row::{FromValue, Row};
use crate::value::Value;

/// A query result with convenience projections.
///
/// # Examples
///
/// ```
/// use jsql_db::executor::ResultSet;
/// use jsql_db::proxy::SqlProxy;
/// use jsql_db::value::Value;
///
/// let result = ResultSet::new(
///     vec!["id".into(), "name".into()],
///     vec![vec![Value::Int(1), Value::from("ada")]],
/// )
/// .unwrap();
/// let proxy = SqlProxy::new(result);
/// assert_eq!(proxy.scalars::<i64>().unwrap(), vec![1]);
/// assert_eq!(proxy.dict().unwrap().get::<String>("name").unwrap(), "ada");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlProxy {
    result: ResultSet,
}

impl SqlProxy {
    /// Wraps a result set.
    pub fn new(result: ResultSet) -> Self {
        Self { result }
    }

    /// Column names in projection order.
    pub fn columns(&self) -> &[String] {
        self.result.columns()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.result.len()
    }

    /// Returns `true` if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }

    /// The raw rows.
    pub fn rows(&self) -> &[Vec<Value>] {
        self.result.rows()
    }

    /// Unwraps the underlying result set.
    pub fn into_inner(self) -> ResultSet {
        self.result
    }

    fn require_columns(&self, needed: usize, view: &str) -> JsqlResult<()> {
        let width = self.result.columns().len();
        if width < needed {
            return Err(JsqlError::DatabaseError(format!(
                "{view} needs at least {needed} column(s), result has {width}"
            )));
        }
        Ok(())
    }

    fn row_at(&self, values: &[Value]) -> Row {
        Row {
            columns: self.result.columns().to_vec(),
            values: values.to_vec(),
        }
    }

    /// Iterates rows as column-name/value records.
    pub fn dicts_iter(&self) -> impl Iterator<Item = Row> + '_ {
        self.result.rows().iter().map(|values| self.row_at(values))
    }

    /// All rows as records.
    pub fn dicts(&self) -> Vec<Row> {
        self.dicts_iter().collect()
    }

    /// All rows collected into any map type, e.g. `HashMap<String, Value>`
    /// or `BTreeMap<String, Value>`.
    pub fn dicts_as<M>(&self) -> Vec<M>
    where
        M: FromIterator<(String, Value)>,
    {
        self.dicts_iter().map(|row| row.into_pairs().collect()).collect()
    }

    /// Iterates `(first column value, full row)`.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if the result has no columns.
    pub fn pk_map_iter(&self) -> JsqlResult<impl Iterator<Item = (&Value, Row)> + '_> {
        self.require_columns(1, "pk_map")?;
        Ok(self
            .result
            .rows()
            .iter()
            .map(|values| (&values[0], self.row_at(values))))
    }

    /// Maps the first column to the full row; later duplicates win.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if the result has no columns or a key does
    /// not convert to `K`.
    pub fn pk_map<K>(&self) -> JsqlResult<HashMap<K, Row>>
    where
        K: FromValue + Eq + Hash,
    {
        self.pk_map_iter()?
            .map(|(key, row)| Ok((K::from_value(key)?, row)))
            .collect()
    }

    /// Iterates `(first column, second column)`.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if the result has fewer than two columns.
    pub fn kv_map_iter(&self) -> JsqlResult<impl Iterator<Item = (&Value, &Value)> + '_> {
        self.require_columns(2, "kv_map")?;
        Ok(self
            .result
            .rows()
            .iter()
            .map(|values| (&values[0], &values[1])))
    }

    /// Maps the first column to the second; later duplicates win.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if the result has fewer than two columns or
    /// a value does not convert.
    pub fn kv_map<K, V>(&self) -> JsqlResult<HashMap<K, V>>
    where
        K: FromValue + Eq + Hash,
        V: FromValue,
    {
        self.kv_map_iter()?
            .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }

    /// Iterates the first column.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if the result has no columns.
    pub fn scalars_iter(&self) -> JsqlResult<impl Iterator<Item = &Value> + '_> {
        self.require_columns(1, "scalars")?;
        Ok(self.result.rows().iter().map(|values| &values[0]))
    }

    /// The first column, in row order.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if the result has no columns or a value
    /// does not convert to `T`.
    pub fn scalars<T: FromValue>(&self) -> JsqlResult<Vec<T>> {
        self.scalars_iter()?.map(T::from_value).collect()
    }

    /// The distinct values of the first column.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if the result has no columns or a value
    /// does not convert to `T`.
    pub fn scalar_set<T>(&self) -> JsqlResult<HashSet<T>>
    where
        T: FromValue + Eq + Hash,
    {
        self.scalars_iter()?.map(T::from_value).collect()
    }

    /// The first row, or `None` for an empty result.
    pub fn dict(&self) -> Option<Row> {
        self.dicts_iter().next()
    }
}

impl From<ResultSet> for SqlProxy {
    fn from(result: ResultSet) -> Self {
        Self::new(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> SqlProxy {
        SqlProxy::new(
            ResultSet::new(
                vec!["id".to_string(), "name".to_string(), "team".to_string()],
                vec![
                    vec![Value::Int(1), Value::from("ada"), Value::from("core")],
                    vec![Value::Int(2), Value::from("grace"), Value::from("core")],
                    vec![Value::Int(3), Value::from("linus"), Value::Null],
                ],
            )
            .unwrap(),
        )
    }

    fn no_columns() -> SqlProxy {
        SqlProxy::new(ResultSet::new(vec![], vec![vec![]]).unwrap())
    }

    #[test]
    fn test_basic_accessors() {
        let p = users();
        assert_eq!(p.len(), 3);
        assert!(!p.is_empty());
        assert_eq!(p.columns(), ["id", "name", "team"]);
        assert_eq!(p.rows()[2][1], Value::from("linus"));
        assert_eq!(p.clone().into_inner().len(), 3);
    }

    #[test]
    fn test_dicts() {
        let rows = users().dicts();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get::<String>("name").unwrap(), "ada");
        assert_eq!(rows[2].get::<Option<String>>("team").unwrap(), None);
    }

    #[test]
    fn test_dicts_as_hashmap() {
        let maps: Vec<HashMap<String, Value>> = users().dicts_as();
        assert_eq!(maps[1]["name"], Value::from("grace"));
        assert_eq!(maps[1].len(), 3);
    }

    #[test]
    fn test_pk_map() {
        let by_id: HashMap<i64, Row> = users().pk_map().unwrap();
        assert_eq!(by_id[&2].get::<String>("name").unwrap(), "grace");
        let p = users();
        let keys: Vec<&Value> = p.pk_map_iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![&Value::Int(1), &Value::Int(2), &Value::Int(3)]);
    }

    #[test]
    fn test_kv_map() {
        let names: HashMap<i64, String> = users().kv_map().unwrap();
        assert_eq!(names[&3], "linus");
        let p = users();
        let first: Vec<(&Value, &Value)> = p.kv_map_iter().unwrap().take(1).collect();
        assert_eq!(first, vec![(&Value::Int(1), &Value::from("ada"))]);
    }

    #[test]
    fn test_scalars_and_set() {
        let p = users();
        assert_eq!(p.scalars::<i64>().unwrap(), vec![1, 2, 3]);
        let teams: HashSet<Option<String>> = SqlProxy::new(
            ResultSet::new(
                vec!["team".to_string()],
                p.rows().iter().map(|r| vec![r[2].clone()]).collect(),
            )
            .unwrap(),
        )
        .scalar_set()
        .unwrap();
        assert_eq!(teams.len(), 2);
        assert!(teams.contains(&None));
    }

    #[test]
    fn test_scalar_type_mismatch() {
        let err = users().scalars::<bool>().unwrap_err();
        assert!(matches!(err, JsqlError::DatabaseError(_)));
    }

    #[test]
    fn test_dict_first_row_or_none() {
        assert_eq!(users().dict().unwrap().get::<i64>("id").unwrap(), 1);
        let empty = SqlProxy::new(ResultSet::new(vec!["id".to_string()], vec![]).unwrap());
        assert!(empty.dict().is_none());
        assert!(empty.scalars::<i64>().unwrap().is_empty());
    }

    #[test]
    fn test_narrow_result_rejected() {
        let one = SqlProxy::new(
            ResultSet::new(vec!["id".to_string()], vec![vec![Value::Int(1)]]).unwrap(),
        );
        let err = one.kv_map::<i64, i64>().unwrap_err();
        assert!(err.to_string().contains("kv_map needs at least 2 column(s)"));
        assert!(no_columns().scalars::<i64>().is_err());
        assert!(no_columns().pk_map::<i64>().is_err());
    }
}
