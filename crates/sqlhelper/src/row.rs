//! Row accessor produced by every row-returning execution.
//!
//! A [`Row`] is an immutable, ordered tuple of [`Value`]s that shares its
//! column-name lookup ([`ColumnIndex`]) with every other row of the same
//! result set.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Bound, Index, RangeBounds};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{Error, Result};
use crate::types::{FromValue, Value};

/// Immutable column-name lookup for one result set.
///
/// Exact matches win over case-insensitive ones. For duplicate names the
/// first column wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnIndex {
    names: Vec<String>,
    exact: HashMap<String, usize>,
    folded: HashMap<String, usize>,
}

impl ColumnIndex {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut exact = HashMap::with_capacity(names.len());
        let mut folded = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            exact.entry(name.clone()).or_insert(i);
            folded.entry(name.to_lowercase()).or_insert(i);
        }
        Self {
            names,
            exact,
            folded,
        }
    }

    /// Position of a column by name.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        let name = name.strip_prefix(':').unwrap_or(name);
        self.exact
            .get(name)
            .or_else(|| self.folded.get(&name.to_lowercase()))
            .copied()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<ColumnIndex>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row. Extra values beyond the known columns stay reachable
    /// by position only.
    #[must_use]
    pub const fn new(columns: Arc<ColumnIndex>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Value at a 0-based position.
    ///
    /// # Errors
    ///
    /// Returns `Error::RowIndexOutOfRange` past the end of the row.
    pub fn get(&self, index: usize) -> Result<&Value> {
        self.values.get(index).ok_or(Error::RowIndexOutOfRange {
            index,
            len: self.values.len(),
        })
    }

    /// Value of a named column. A leading `:` is accepted.
    ///
    /// # Errors
    ///
    /// Returns `Error::ColumnNotFound` if no column has that name.
    pub fn get_by_name(&self, name: &str) -> Result<&Value> {
        self.columns
            .position(name)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    /// Typed value at a position.
    ///
    /// # Errors
    ///
    /// Out-of-range or conversion failures.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        T::from_value(self.get(index)?)
    }

    /// Typed value of a named column.
    ///
    /// # Errors
    ///
    /// Missing column or conversion failures.
    pub fn get_by_name_as<T: FromValue>(&self, name: &str) -> Result<T> {
        T::from_value(self.get_by_name(name)?)
    }

    /// Ordered sub-sequence for any range, e.g. `row.slice(1..)`.
    ///
    /// # Errors
    ///
    /// Returns `Error::RowIndexOutOfRange` if the range leaves the row.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Result<&[Value]> {
        let len = self.values.len();
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e.saturating_add(1),
            Bound::Excluded(&e) => e,
            Bound::Unbounded => len,
        };
        if start > len {
            return Err(Error::RowIndexOutOfRange { index: start, len });
        }
        if end > len || end < start {
            return Err(Error::RowIndexOutOfRange { index: end, len });
        }
        Ok(&self.values[start..end])
    }

    /// `count` values starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns `Error::RowIndexOutOfRange` if the window leaves the row.
    pub fn take(&self, start: usize, count: usize) -> Result<&[Value]> {
        self.slice(start..start.saturating_add(count))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.columns.names()
    }

    #[must_use]
    pub fn columns(&self) -> &Arc<ColumnIndex> {
        &self.columns
    }

    /// Values rendered and joined with `sep`.
    #[must_use]
    pub fn join(&self, sep: &str) -> String {
        self.values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(sep)
    }

    /// Column name → value, in column order.
    #[must_use]
    pub fn to_map(&self) -> IndexMap<String, Value> {
        self.columns
            .names()
            .iter()
            .zip(&self.values)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

impl Index<&str> for Row {
    type Output = Value;

    fn index(&self, name: &str) -> &Self::Output {
        match self.get_by_name(name) {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.join(", "))
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.columns.names().iter().zip(&self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
