//! Catalog access: the executor trait and query result types.

use std::fmt;

use serde::Serialize;

/// A single cell of a catalog query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// An integer cell.
    Int(i64),
    /// A text cell.
    Text(String),
}

impl Value {
    /// Interpret the cell as an integer.
    ///
    /// Text cells holding a decimal integer are accepted, since catalog
    /// tables commonly store numbers as strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    /// Borrow the cell as text. Integers are not converted.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// One row of a catalog query result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row(pub Vec<Value>);

impl Row {
    /// Build a row from anything convertible into values.
    pub fn new<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cell at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }
}

/// Access to the cluster's system catalog.
///
/// Every check receives the executor explicitly; nothing in this crate
/// holds a global connection. Errors are treated as fatal by the checks
/// and are never retried.
pub trait CatalogExecutor {
    /// Error type for this backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run a read-only query and return all rows.
    fn query(&self, sql: &str) -> Result<Vec<Row>, Self::Error>;

    /// Write a cluster parameter on every node.
    ///
    /// Propagation is not awaited here; callers poll for it with
    /// [`ParameterSyncWaiter`](crate::ParameterSyncWaiter).
    fn set_parameter(&self, name: &str, value: &str) -> Result<(), Self::Error>;
}

impl<T: CatalogExecutor + ?Sized> CatalogExecutor for &T {
    type Error = T::Error;

    fn query(&self, sql: &str) -> Result<Vec<Row>, Self::Error> {
        (**self).query(sql)
    }

    fn set_parameter(&self, name: &str, value: &str) -> Result<(), Self::Error> {
        (**self).set_parameter(name, value)
    }
}

/// Quote a string literal for embedding in catalog SQL.
pub(crate) fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Extract the single integer of a `SELECT count(*)`-style result.
pub(crate) fn single_count(sql: &str, rows: &[Row]) -> Result<i64, crate::CheckError> {
    let unexpected = |detail: String| crate::CheckError::UnexpectedResult {
        query: sql.to_string(),
        detail,
    };
    match rows {
        [row] if row.len() == 1 => row
            .get(0)
            .and_then(Value::as_i64)
            .ok_or_else(|| unexpected(format!("count is not an integer: {}", row.0[0]))),
        [row] => Err(unexpected(format!("expected 1 column, got {}", row.len()))),
        _ => Err(unexpected(format!("expected 1 row, got {}", rows.len()))),
    }
}
