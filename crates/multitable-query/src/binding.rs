//! Column value bindings used to build SET lists and WHERE restrictions.

use crate::fragment::count_parameter_markers;
use crate::parameter::ParameterSpec;
use multitable_core::{Error, Result, SqlType};

/// A column of a physical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnReference {
    pub table: String,
    pub column: String,
    pub sql_type: SqlType,
}

impl ColumnReference {
    pub fn new(table: impl Into<String>, column: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            sql_type,
        }
    }
}

/// The SQL written for a column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteFragment {
    /// A single bind marker.
    Parameter,
    /// SQL text without bind markers (including `?` inside quoted literals).
    Literal(String),
    /// SQL text containing one or more bind markers.
    Custom { sql: String, parameter_count: usize },
}

impl WriteFragment {
    /// Classify a write fragment by its unquoted `?` markers.
    pub fn classify(fragment: &str) -> Self {
        if fragment.trim() == "?" {
            return WriteFragment::Parameter;
        }
        match count_parameter_markers(fragment) {
            0 => WriteFragment::Literal(fragment.to_string()),
            parameter_count => WriteFragment::Custom {
                sql: fragment.to_string(),
                parameter_count,
            },
        }
    }

    pub fn sql(&self) -> &str {
        match self {
            WriteFragment::Parameter => "?",
            WriteFragment::Literal(sql) | WriteFragment::Custom { sql, .. } => sql,
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            WriteFragment::Parameter => 1,
            WriteFragment::Literal(_) => 0,
            WriteFragment::Custom {
                parameter_count, ..
            } => *parameter_count,
        }
    }

    pub fn has_parameters(&self) -> bool {
        self.parameter_count() > 0
    }
}

/// A column paired with the fragment that produces its value.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValueBinding {
    column: ColumnReference,
    write_fragment: WriteFragment,
    parameters: Vec<ParameterSpec>,
}

impl ColumnValueBinding {
    /// Bind the column to a single parameter.
    pub fn parameter(column: ColumnReference, spec: ParameterSpec) -> Self {
        Self {
            column,
            write_fragment: WriteFragment::Parameter,
            parameters: vec![spec],
        }
    }

    /// Bind the column to an SQL fragment; `parameters` must match its markers.
    pub fn from_fragment(
        column: ColumnReference,
        fragment: &str,
        parameters: Vec<ParameterSpec>,
    ) -> Result<Self> {
        let write_fragment = WriteFragment::classify(fragment);
        if write_fragment.parameter_count() != parameters.len() {
            return Err(Error::parameter(
                format!("{}.{}", column.table, column.column),
                format!(
                    "fragment '{}' has {} parameter markers but {} parameters were supplied",
                    fragment,
                    write_fragment.parameter_count(),
                    parameters.len()
                ),
            ));
        }
        Ok(Self {
            column,
            write_fragment,
            parameters,
        })
    }

    pub fn column(&self) -> &ColumnReference {
        &self.column
    }

    pub fn column_name(&self) -> &str {
        &self.column.column
    }

    pub fn write_fragment(&self) -> &WriteFragment {
        &self.write_fragment
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn is_lob(&self) -> bool {
        self.column.sql_type.is_lob()
    }

    /// `column = fragment`
    pub fn assignment_sql(&self) -> String {
        format!("{} = {}", self.column.column, self.write_fragment.sql())
    }
}

/// One predicate of a mutation's WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Restriction {
    /// `column = fragment`
    Equal(ColumnValueBinding),
    /// `column is null`
    IsNull(ColumnReference),
    /// Free SQL with its own parameters.
    Fragment {
        sql: String,
        parameters: Vec<ParameterSpec>,
    },
}

impl Restriction {
    pub fn sql(&self) -> String {
        match self {
            Restriction::Equal(binding) => binding.assignment_sql(),
            Restriction::IsNull(column) => format!("{} is null", column.column),
            Restriction::Fragment { sql, .. } => sql.clone(),
        }
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        match self {
            Restriction::Equal(binding) => binding.parameters(),
            Restriction::IsNull(_) => &[],
            Restriction::Fragment { parameters, .. } => parameters,
        }
    }
}
