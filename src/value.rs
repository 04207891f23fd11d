//! Extracted values, reference specifications and the records they produce

use crate::types::CellValue;
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Canonical value produced by normalizing a raw cell
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(untagged))]
pub enum Value {
    /// Any numeric cell (integers included) as a double
    Number(f64),
    /// Trimmed text
    Text(String),
    /// Boolean cell
    Bool(bool),
    /// Calendar date (time of day stripped)
    Date(NaiveDate),
    /// Full timestamp, only when requested through [`DateMode::DateTime`](crate::normalize::DateMode)
    DateTime(NaiveDateTime),
    /// Spreadsheet error value such as `#DIV/0!`
    Error(String),
}

impl Value {
    /// The default blank substitute: a NaN number
    pub fn nan() -> Self {
        Value::Number(f64::NAN)
    }

    /// True for `Number(NaN)`, the default blank marker
    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_nan())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::DateTime(t) => Some(t.date()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            Value::Error(code) => f.write_str(code),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

/// The result of resolving one reference: a scalar for a cell, a
/// row-major matrix for a range
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(untagged))]
pub enum Field<V = Value> {
    Scalar(V),
    Matrix(Vec<Vec<V>>),
}

impl<V> Field<V> {
    pub fn as_scalar(&self) -> Option<&V> {
        match self {
            Field::Scalar(v) => Some(v),
            Field::Matrix(_) => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&[Vec<V>]> {
        match self {
            Field::Scalar(_) => None,
            Field::Matrix(rows) => Some(rows),
        }
    }

    /// Flatten into a single row-major list; a scalar becomes a one-element list
    pub fn flatten(self) -> Vec<V> {
        match self {
            Field::Scalar(v) => vec![v],
            Field::Matrix(rows) => rows.into_iter().flatten().collect(),
        }
    }
}

impl<V> From<V> for Field<V> {
    fn from(value: V) -> Self {
        Field::Scalar(value)
    }
}

// plain Rust values become raw scalars, so fill_form takes ("A7", 68035.75)
macro_rules! cell_field_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Field<CellValue> {
                fn from(value: $t) -> Self {
                    Field::Scalar(value.into())
                }
            }
        )*
    };
}

cell_field_from!(&str, String, i32, i64, f64, bool, NaiveDate, NaiveDateTime);

impl<T: Into<CellValue>> From<Option<T>> for Field<CellValue> {
    fn from(value: Option<T>) -> Self {
        Field::Scalar(value.into())
    }
}

impl From<Vec<Vec<CellValue>>> for Field<CellValue> {
    fn from(rows: Vec<Vec<CellValue>>) -> Self {
        Field::Matrix(rows)
    }
}

/// One extracted record; its shape mirrors the [`RefSpec`] it came from
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(untagged))]
pub enum Record {
    /// From a single-cell (or `None`) scalar spec
    Scalar(Value),
    /// From a scalar spec that names a range
    Matrix(Vec<Vec<Value>>),
    /// From a list spec; range elements are nested matrices
    List(Vec<Field>),
    /// From a field-name mapping, in input order
    Map(IndexMap<String, Field>),
}

impl Record {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Record::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&[Vec<Value>]> {
        match self {
            Record::Matrix(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Field]> {
        match self {
            Record::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Field>> {
        match self {
            Record::Map(fields) => Some(fields),
            _ => None,
        }
    }

    /// Look up a mapped field by name
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.as_map().and_then(|fields| fields.get(name))
    }
}

/// Which cells to pull for one record
///
/// # Examples
///
/// ```
/// use formtab::RefSpec;
///
/// let scalar = RefSpec::from("B12");
/// let list = RefSpec::from([Some("A12"), Some("B15"), None, Some("E23")]);
/// let named = RefSpec::from([("Name", "B12"), ("Age", "B15"), ("Height", "C20")]);
/// assert_eq!(list.len(), 4);
/// assert_eq!(named.len(), 3);
/// assert_eq!(scalar.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefSpec {
    /// One reference; `None` yields the blank marker
    Single(Option<String>),
    /// Ordered references; `None` entries are placeholders
    List(Vec<Option<String>>),
    /// Field name to reference
    Map(IndexMap<String, Option<String>>),
}

impl RefSpec {
    /// Build a mapping spec from `(name, reference)` pairs
    pub fn fields<I, K, R>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<R>)>,
        K: Into<String>,
        R: Into<String>,
    {
        RefSpec::Map(
            pairs
                .into_iter()
                .map(|(k, r)| (k.into(), r.map(Into::into)))
                .collect(),
        )
    }

    /// Number of top-level entries
    pub fn len(&self) -> usize {
        match self {
            RefSpec::Single(_) => 1,
            RefSpec::List(refs) => refs.len(),
            RefSpec::Map(refs) => refs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for RefSpec {
    fn from(reference: &str) -> Self {
        RefSpec::Single(Some(reference.to_string()))
    }
}

impl From<String> for RefSpec {
    fn from(reference: String) -> Self {
        RefSpec::Single(Some(reference))
    }
}

impl From<Option<&str>> for RefSpec {
    fn from(reference: Option<&str>) -> Self {
        RefSpec::Single(reference.map(str::to_string))
    }
}

impl From<Vec<Option<String>>> for RefSpec {
    fn from(refs: Vec<Option<String>>) -> Self {
        RefSpec::List(refs)
    }
}

impl From<Vec<Option<&str>>> for RefSpec {
    fn from(refs: Vec<Option<&str>>) -> Self {
        RefSpec::List(refs.into_iter().map(|r| r.map(str::to_string)).collect())
    }
}

impl From<Vec<&str>> for RefSpec {
    fn from(refs: Vec<&str>) -> Self {
        RefSpec::List(refs.into_iter().map(|r| Some(r.to_string())).collect())
    }
}

impl<const N: usize> From<[Option<&str>; N]> for RefSpec {
    fn from(refs: [Option<&str>; N]) -> Self {
        RefSpec::from(Vec::from(refs))
    }
}

impl<const N: usize> From<[&str; N]> for RefSpec {
    fn from(refs: [&str; N]) -> Self {
        RefSpec::from(Vec::from(refs))
    }
}

impl From<IndexMap<String, Option<String>>> for RefSpec {
    fn from(refs: IndexMap<String, Option<String>>) -> Self {
        RefSpec::Map(refs)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for RefSpec {
    fn from(pairs: [(&str, &str); N]) -> Self {
        RefSpec::fields(pairs.into_iter().map(|(k, r)| (k, Some(r))))
    }
}

impl<const N: usize> From<[(&str, Option<&str>); N]> for RefSpec {
    fn from(pairs: [(&str, Option<&str>); N]) -> Self {
        RefSpec::fields(pairs)
    }
}
