//! Immutable descriptors of single-table mutations.

use crate::binding::{ColumnValueBinding, Restriction};
use crate::parameter::ParameterSpec;
use multitable_core::error::StaleStateError;
use multitable_core::{Error, ExpectationKind, Result, TableMapping};
use std::fmt;
use std::sync::Arc;

/// The kind of a table or entity mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
    Merge,
}

impl MutationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            MutationKind::Insert => "insert",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
            MutationKind::Merge => "merge",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-count check applied to the result of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    None,
    RowCount(u64),
}

impl Expectation {
    pub fn verify(&self, table: &str, affected: u64, sql: &str) -> Result<()> {
        match self {
            Expectation::None => Ok(()),
            Expectation::RowCount(expected) if *expected == affected => Ok(()),
            Expectation::RowCount(expected) => Err(Error::StaleState(StaleStateError {
                table: table.to_string(),
                expected: *expected,
                actual: affected,
                sql: sql.to_string(),
            })),
        }
    }
}

impl From<ExpectationKind> for Expectation {
    fn from(kind: ExpectationKind) -> Self {
        match kind {
            ExpectationKind::None => Expectation::None,
            ExpectationKind::RowCount => Expectation::RowCount(1),
        }
    }
}

/// A rendered statement against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationStatement {
    pub(crate) table: Arc<TableMapping>,
    pub(crate) values: Vec<ColumnValueBinding>,
    pub(crate) restrictions: Vec<Restriction>,
    pub(crate) custom_sql: Option<String>,
    pub(crate) sql: String,
    pub(crate) parameters: Vec<ParameterSpec>,
    pub(crate) expectation: Expectation,
}

impl MutationStatement {
    pub fn table(&self) -> &Arc<TableMapping> {
        &self.table
    }

    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    /// Value bindings in bind order.
    pub fn values(&self) -> &[ColumnValueBinding] {
        &self.values
    }

    /// Key, optimistic-lock and free restrictions in bind order.
    pub fn restrictions(&self) -> &[Restriction] {
        &self.restrictions
    }

    pub fn custom_sql(&self) -> Option<&str> {
        self.custom_sql.as_deref()
    }

    /// SQL text with `?` markers.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter specs in marker order.
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn expectation(&self) -> Expectation {
        self.expectation
    }

    /// Parameters of the SET/VALUES part only.
    pub fn value_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.values.iter().flat_map(|v| v.parameters().iter())
    }
}

/// Update-or-insert of an optional table row.
///
/// When every written value is null the row is deleted instead.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeMutation {
    pub update: MutationStatement,
    pub insert: MutationStatement,
    pub delete: MutationStatement,
}

/// The result of building one table mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum TableMutation {
    Insert(MutationStatement),
    Update(MutationStatement),
    Delete(MutationStatement),
    Merge(Box<MergeMutation>),
    /// User supplied SQL; values bound by position into the custom text.
    Custom {
        kind: MutationKind,
        statement: MutationStatement,
    },
    /// Nothing to write; executors must skip it.
    NoSet {
        kind: MutationKind,
        table: Arc<TableMapping>,
    },
}

impl TableMutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            TableMutation::Insert(_) => MutationKind::Insert,
            TableMutation::Update(_) => MutationKind::Update,
            TableMutation::Delete(_) => MutationKind::Delete,
            TableMutation::Merge(_) => MutationKind::Merge,
            TableMutation::Custom { kind, .. } | TableMutation::NoSet { kind, .. } => *kind,
        }
    }

    pub fn table(&self) -> &Arc<TableMapping> {
        match self {
            TableMutation::Insert(s)
            | TableMutation::Update(s)
            | TableMutation::Delete(s)
            | TableMutation::Custom { statement: s, .. } => &s.table,
            TableMutation::Merge(m) => &m.update.table,
            TableMutation::NoSet { table, .. } => table,
        }
    }

    pub fn table_name(&self) -> &str {
        self.table().name()
    }

    /// The single statement of this mutation, if it has exactly one.
    pub fn statement(&self) -> Option<&MutationStatement> {
        match self {
            TableMutation::Insert(s)
            | TableMutation::Update(s)
            | TableMutation::Delete(s)
            | TableMutation::Custom { statement: s, .. } => Some(s),
            TableMutation::Merge(_) | TableMutation::NoSet { .. } => None,
        }
    }

    /// SQL text of the primary statement (the UPDATE of a merge).
    pub fn sql(&self) -> Option<&str> {
        match self {
            TableMutation::Merge(m) => Some(m.update.sql()),
            other => other.statement().map(MutationStatement::sql),
        }
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        match self {
            TableMutation::Merge(m) => m.update.parameters(),
            other => match other.statement() {
                Some(statement) => statement.parameters(),
                None => &[],
            },
        }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, TableMutation::NoSet { .. })
    }
}
