//! Materialized query results.

use std::sync::Arc;

use rusqlite::types::Value;

/// Owned snapshot of a query: column names plus every row's values.
///
/// Rows are pulled eagerly under the query's shared lock, so no database
/// lock is held while the caller walks the result and the row count is
/// known up front instead of on demand.
#[derive(Debug, Clone)]
pub struct RowSet {
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        RowSet {
            columns: columns.into(),
            rows,
        }
    }

    /// Number of rows, computed once at materialization.
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Position of a column by name, case-insensitive like SQLite itself.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn get(&self, row: usize) -> Option<RowRef<'_>> {
        self.rows.get(row).map(|values| RowRef {
            columns: &self.columns,
            values,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(move |values| RowRef {
            columns: &self.columns,
            values,
        })
    }
}

/// One row borrowed out of a [`RowSet`]. Accessors return `None` on a
/// missing column or a type mismatch rather than panicking.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> RowRef<'a> {
    pub fn value(&self, col: usize) -> Option<&'a Value> {
        self.values.get(col)
    }

    pub fn value_named(&self, name: &str) -> Option<&'a Value> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }

    pub fn as_i64(&self, col: usize) -> Option<i64> {
        match self.values.get(col)? {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self, col: usize) -> Option<f64> {
        match self.values.get(col)? {
            Value::Real(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self, col: usize) -> Option<&'a str> {
        match self.values.get(col)? {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_blob(&self, col: usize) -> Option<&'a [u8]> {
        match self.values.get(col)? {
            Value::Blob(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn is_null(&self, col: usize) -> bool {
        matches!(self.values.get(col), Some(Value::Null))
    }
}
