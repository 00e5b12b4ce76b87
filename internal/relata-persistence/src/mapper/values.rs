use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlite::Value;

use crate::MappingError;

/// Name of the type of a value, as used in mapping errors.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Binary(_) => "blob",
        Value::Float(_) => "real",
        Value::Integer(_) => "integer",
        Value::String(_) => "text",
        Value::Null => "null",
    }
}

/// Hashable identity of a key value, `None` for `NULL`.
pub(crate) fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::Binary(bytes) => Some(format!("b:{bytes:?}")),
        Value::Float(number) => Some(format!("f:{number}")),
        Value::Integer(number) => Some(format!("i:{number}")),
        Value::String(text) => Some(format!("s:{text}")),
        Value::Null => None,
    }
}

/// Return true if a key value is absent, `NULL`, empty text or zero.
pub(crate) fn is_unset_key(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(Value::Integer(number)) => *number == 0,
        Some(_) => false,
    }
}

pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn parse_timestamp(field: &str, value: &Value) -> Result<DateTime<Utc>, MappingError> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|error| MappingError::InvalidData {
                field: field.to_string(),
                reason: format!("'{text}' is not a RFC 3339 timestamp: {error}"),
            }),
        Value::Integer(millis) => {
            DateTime::from_timestamp_millis(*millis).ok_or_else(|| MappingError::InvalidData {
                field: field.to_string(),
                reason: format!("{millis} is out of the timestamp range"),
            })
        }
        other => Err(mismatch(field, "timestamp", other)),
    }
}

fn mismatch(field: &str, expected: &str, found: &Value) -> MappingError {
    MappingError::TypeMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
        found: value_kind(found).to_string(),
    }
}

/// Constructors of [Value] for the supported column types.
pub mod value {
    use chrono::{DateTime, Utc};
    use sqlite::Value;

    use super::format_timestamp;

    /// Text value
    pub fn text<T: Into<String>>(text: T) -> Value {
        Value::String(text.into())
    }

    /// Text value or `NULL`
    pub fn optional_text<T: Into<String>>(text: Option<T>) -> Value {
        text.map(self::text).unwrap_or(Value::Null)
    }

    /// Integer value
    pub fn integer(number: i64) -> Value {
        Value::Integer(number)
    }

    /// Integer value or `NULL`
    pub fn optional_integer(number: Option<i64>) -> Value {
        number.map(Value::Integer).unwrap_or(Value::Null)
    }

    /// Real value
    pub fn real(number: f64) -> Value {
        Value::Float(number)
    }

    /// Boolean value, stored as 0 or 1
    pub fn boolean(flag: bool) -> Value {
        Value::Integer(i64::from(flag))
    }

    /// Timestamp value, RFC 3339 text
    pub fn timestamp(at: DateTime<Utc>) -> Value {
        Value::String(format_timestamp(&at))
    }

    /// Timestamp value or `NULL`
    pub fn optional_timestamp(at: Option<DateTime<Utc>>) -> Value {
        at.map(timestamp).unwrap_or(Value::Null)
    }
}

/// Typed reads of values keyed by field path or column name.
///
/// Strict reads fail with [MappingError::MissingField] when the key is absent,
/// `optional_*` reads map an absent key and `NULL` to `None`.
pub trait ValueReader {
    /// Raw value of the key
    fn value(&self, key: &str) -> Option<&Value>;

    /// Text value
    fn string(&self, key: &str) -> Result<String, MappingError> {
        match self.value(key) {
            Some(Value::String(text)) => Ok(text.clone()),
            Some(other) => Err(mismatch(key, "text", other)),
            None => Err(MappingError::MissingField(key.to_string())),
        }
    }

    /// Text value or `None`
    fn optional_string(&self, key: &str) -> Result<Option<String>, MappingError> {
        match self.value(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.string(key).map(Some),
        }
    }

    /// Integer value
    fn integer(&self, key: &str) -> Result<i64, MappingError> {
        match self.value(key) {
            Some(Value::Integer(number)) => Ok(*number),
            Some(other) => Err(mismatch(key, "integer", other)),
            None => Err(MappingError::MissingField(key.to_string())),
        }
    }

    /// Integer value or `None`
    fn optional_integer(&self, key: &str) -> Result<Option<i64>, MappingError> {
        match self.value(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.integer(key).map(Some),
        }
    }

    /// Real value, integers are widened
    fn real(&self, key: &str) -> Result<f64, MappingError> {
        match self.value(key) {
            Some(Value::Float(number)) => Ok(*number),
            Some(Value::Integer(number)) => Ok(*number as f64),
            Some(other) => Err(mismatch(key, "real", other)),
            None => Err(MappingError::MissingField(key.to_string())),
        }
    }

    /// Real value or `None`
    fn optional_real(&self, key: &str) -> Result<Option<f64>, MappingError> {
        match self.value(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.real(key).map(Some),
        }
    }

    /// Boolean value, any non zero integer is true
    fn boolean(&self, key: &str) -> Result<bool, MappingError> {
        self.integer(key).map(|number| number != 0)
    }

    /// Binary value
    fn blob(&self, key: &str) -> Result<Vec<u8>, MappingError> {
        match self.value(key) {
            Some(Value::Binary(bytes)) => Ok(bytes.clone()),
            Some(other) => Err(mismatch(key, "blob", other)),
            None => Err(MappingError::MissingField(key.to_string())),
        }
    }

    /// Timestamp value, from RFC 3339 text or Unix milliseconds
    fn timestamp(&self, key: &str) -> Result<DateTime<Utc>, MappingError> {
        match self.value(key) {
            Some(value) => parse_timestamp(key, value),
            None => Err(MappingError::MissingField(key.to_string())),
        }
    }

    /// Timestamp value or `None`
    fn optional_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, MappingError> {
        match self.value(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => parse_timestamp(key, value).map(Some),
        }
    }

    /// Text value, empty when absent or `NULL`
    fn string_or_default(&self, key: &str) -> Result<String, MappingError> {
        self.optional_string(key).map(Option::unwrap_or_default)
    }

    /// Integer value, zero when absent or `NULL`
    fn integer_or_default(&self, key: &str) -> Result<i64, MappingError> {
        self.optional_integer(key).map(Option::unwrap_or_default)
    }

    /// Real value, zero when absent or `NULL`
    fn real_or_default(&self, key: &str) -> Result<f64, MappingError> {
        self.optional_real(key).map(Option::unwrap_or_default)
    }
}

/// Values of an entity keyed by field path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldValues {
    values: BTreeMap<String, Value>,
}

impl FieldValues {
    /// Create an empty set of values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, builder style
    pub fn with(mut self, path: &str, value: Value) -> Self {
        self.set(path, value);
        self
    }

    /// Set a value
    pub fn set(&mut self, path: &str, value: Value) {
        self.values.insert(path.to_string(), value);
    }

    /// Value at the path
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.values.get(path)
    }

    /// Remove the value at the path
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        self.values.remove(path)
    }

    /// Return true if a value, `NULL` included, is set at the path.
    pub fn contains(&self, path: &str) -> bool {
        self.values.contains_key(path)
    }

    /// Iterate over `(path, value)` pairs, sorted by path
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values
            .iter()
            .map(|(path, value)| (path.as_str(), value))
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Return true if no value is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overwrite values with the ones of `other`
    pub fn merge(&mut self, other: FieldValues) {
        self.values.extend(other.values);
    }
}

impl ValueReader for FieldValues {
    fn value(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

impl FromIterator<(String, Value)> for FieldValues {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Ordered `(column, value)` pairs: a result row or the values of a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnValues {
    columns: Vec<(String, Value)>,
}

impl ColumnValues {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column
    pub fn push(&mut self, column: &str, value: Value) {
        self.columns.push((column.to_string(), value));
    }

    /// Append a column, builder style
    pub fn with(mut self, column: &str, value: Value) -> Self {
        self.push(column, value);
        self
    }

    /// Value of the first column with that name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Remove the first column with that name and return its value
    pub fn take(&mut self, column: &str) -> Option<Value> {
        let position = self.columns.iter().position(|(name, _)| name == column)?;

        Some(self.columns.remove(position).1)
    }

    /// Remove the columns starting with `prefix`, returned with the prefix stripped
    pub fn take_prefixed(&mut self, prefix: &str) -> ColumnValues {
        let (prefixed, others): (Vec<_>, Vec<_>) = std::mem::take(&mut self.columns)
            .into_iter()
            .partition(|(name, _)| name.starts_with(prefix));
        self.columns = others;

        prefixed
            .into_iter()
            .map(|(name, value)| (name[prefix.len()..].to_string(), value))
            .collect()
    }

    /// Column names, in order
    pub fn columns(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Values, in order
    pub fn values(&self) -> Vec<Value> {
        self.columns.iter().map(|(_, value)| value.clone()).collect()
    }

    /// Iterate over `(column, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Return true if there is no column.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl ValueReader for ColumnValues {
    fn value(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

impl FromIterator<(String, Value)> for ColumnValues {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}
