//! Rows read back by matching-id and count queries.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;

/// One result row: the selected columns and their values, in select order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of a selected column, matched case-insensitively since drivers
    /// differ in how they report unquoted names.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The column at `index` as a non-negative row count, as returned by
    /// `select count(*)`.
    pub fn get_count(&self, index: usize) -> Result<u64> {
        let Some(value) = self.get(index) else {
            return Err(Error::Type(TypeError {
                expected: "u64",
                actual: format!("no column {index} in a row of {}", self.len()),
                column: None,
            }));
        };
        value
            .as_i64()
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| {
                Error::Type(TypeError {
                    expected: "u64",
                    actual: value.type_name().to_string(),
                    column: self.columns.get(index).cloned(),
                })
            })
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
