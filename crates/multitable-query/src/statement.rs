//! Bulk statement trees handed to the mutation handlers.
//!
//! These are the already-parsed forms of
//! `update Entity e set ... where ...`, `delete from Entity e where ...`
//! and `insert into Entity (...) values ... | select ...`.

use crate::expr::Expr;

/// One `column = value` of a bulk UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

impl Assignment {
    pub fn new(column: impl Into<String>, value: impl Into<Expr>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// A bulk UPDATE against one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkUpdate {
    pub entity: String,
    pub alias: String,
    pub assignments: Vec<Assignment>,
    pub predicate: Option<Expr>,
}

impl BulkUpdate {
    pub fn new(entity: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            alias: alias.into(),
            assignments: Vec::new(),
            predicate: None,
        }
    }

    /// Add `column = value` to the SET clause.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.assignments.push(Assignment::new(column, value));
        self
    }

    /// Add a WHERE condition; repeated calls are AND-ed.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.predicate = Some(match self.predicate {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Names of all assigned columns, in assignment order.
    pub fn assigned_columns(&self) -> impl Iterator<Item = &str> {
        self.assignments.iter().map(|a| a.column.as_str())
    }
}

/// A bulk DELETE against one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDelete {
    pub entity: String,
    pub alias: String,
    pub predicate: Option<Expr>,
}

impl BulkDelete {
    pub fn new(entity: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            alias: alias.into(),
            predicate: None,
        }
    }

    /// Add a WHERE condition; repeated calls are AND-ed.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.predicate = Some(match self.predicate {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }
}

/// Rows supplied to a bulk INSERT.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    /// `values (...), (...)`
    Values(Vec<Vec<Expr>>),
    /// `select <selections> from <table> <alias> [where ...]`
    Select {
        table: String,
        alias: String,
        selections: Vec<Expr>,
        predicate: Option<Expr>,
    },
}

/// A bulk INSERT into one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkInsert {
    pub entity: String,
    pub columns: Vec<String>,
    pub source: InsertSource,
}

impl BulkInsert {
    /// `insert into entity (columns) values ...`; add rows with [`row`](Self::row).
    pub fn values<I, S>(entity: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity: entity.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            source: InsertSource::Values(Vec::new()),
        }
    }

    /// `insert into entity (columns) select ...`
    pub fn select<I, S>(
        entity: impl Into<String>,
        columns: I,
        table: impl Into<String>,
        alias: impl Into<String>,
        selections: Vec<Expr>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity: entity.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            source: InsertSource::Select {
                table: table.into(),
                alias: alias.into(),
                selections,
                predicate: None,
            },
        }
    }

    /// Append one VALUES row. Ignored for SELECT sources.
    pub fn row(mut self, values: Vec<Expr>) -> Self {
        if let InsertSource::Values(rows) = &mut self.source {
            rows.push(values);
        }
        self
    }

    /// Restrict the SELECT source. Ignored for VALUES sources.
    pub fn filter(mut self, expr: Expr) -> Self {
        if let InsertSource::Select { predicate, .. } = &mut self.source {
            *predicate = Some(match predicate.take() {
                Some(existing) => existing.and(expr),
                None => expr,
            });
        }
        self
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}
