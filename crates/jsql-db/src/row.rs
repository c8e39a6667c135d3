//! Rows of a tabular result and typed value extraction.

use jsql_core::error::{JsqlError, JsqlResult};

use crate::value::Value;

/// One result row: column names paired with values, in projection order.
///
/// Typed access goes through [`FromValue`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub(crate) columns: Vec<String>,
    pub(crate) values: Vec<Value>,
}

impl Row {
    /// Creates a row from column names and values.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if the number of columns does not match the
    /// number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> JsqlResult<Self> {
        if columns.len() != values.len() {
            return Err(JsqlError::DatabaseError(format!(
                "row has {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if the column does not exist or the value
    /// cannot be converted to the requested type.
    pub fn get<T: FromValue>(&self, column: &str) -> JsqlResult<T> {
        let value = self.get_value(column).ok_or_else(|| {
            JsqlError::DatabaseError(format!("column '{column}' not found in row"))
        })?;
        T::from_value(value)
    }

    /// Gets a typed value by column index.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if the index is out of bounds or the value
    /// cannot be converted to the requested type.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> JsqlResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            JsqlError::DatabaseError(format!(
                "column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Returns the raw value under `column`.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Iterates `(column, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Consumes the row into `(column, value)` pairs.
    pub fn into_pairs(self) -> impl Iterator<Item = (String, Value)> {
        self.columns.into_iter().zip(self.values)
    }
}

/// Conversion from a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts to convert a value reference to this type.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` when the value has the wrong type.
    fn from_value(value: &Value) -> JsqlResult<Self>;
}

fn mismatch(expected: &str, value: &Value) -> JsqlError {
    JsqlError::DatabaseError(format!("expected {expected}, got {value:?}"))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> JsqlResult<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            _ => Err(mismatch("Int", value)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> JsqlResult<Self> {
        match value {
            Value::Int(i) => i32::try_from(*i).map_err(|e| {
                JsqlError::DatabaseError(format!("Int value out of i32 range: {e}"))
            }),
            _ => Err(mismatch("Int", value)),
        }
    }
}

impl FromValue for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: &Value) -> JsqlResult<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            _ => Err(mismatch("Float", value)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> JsqlResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            // SQLite has no boolean storage class.
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            _ => Err(mismatch("Bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> JsqlResult<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: &Value) -> JsqlResult<Self> {
        match value {
            Value::Uuid(u) => Ok(*u),
            Value::String(s) => uuid::Uuid::parse_str(s)
                .map_err(|e| JsqlError::DatabaseError(format!("invalid uuid {s:?}: {e}"))),
            _ => Err(mismatch("Uuid", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> JsqlResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> JsqlResult<Self> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}
