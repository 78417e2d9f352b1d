//! A minimal SELECT tree for materializing matching ids.

use crate::parameter::{ParameterSpec, RenderedSql};
use multitable_core::Dialect;

/// Join types used between the tables of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    LeftOuter,
}

impl JoinType {
    pub const fn as_str(self) -> &'static str {
        match self {
            JoinType::Inner => "inner join",
            JoinType::LeftOuter => "left outer join",
        }
    }
}

/// `join <table> <alias> on <predicate>`
#[derive(Debug, Clone, PartialEq)]
pub struct TableJoin {
    pub join_type: JoinType,
    pub table: String,
    pub alias: String,
    pub predicate: String,
}

/// Root table plus the joins needed to reach every column of the entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGroup {
    pub table: String,
    pub alias: String,
    pub joins: Vec<TableJoin>,
}

impl TableGroup {
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            joins: Vec::new(),
        }
    }

    pub fn join(mut self, join: TableJoin) -> Self {
        self.joins.push(join);
        self
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.table, self.alias);
        for join in &self.joins {
            sql.push_str(&format!(
                " {} {} {} on {}",
                join.join_type.as_str(),
                join.table,
                join.alias,
                join.predicate
            ));
        }
        sql
    }
}

/// One selected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    pub table_alias: String,
    pub column: String,
}

impl SelectItem {
    pub fn new(table_alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table_alias: table_alias.into(),
            column: column.into(),
        }
    }

    pub fn to_sql(&self) -> String {
        format!("{}.{}", self.table_alias, self.column)
    }
}

/// Row locking requested by a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    None,
    Write,
}

/// `select <selections> from <group> [where <predicate>] [for update]`
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub selections: Vec<SelectItem>,
    pub from: TableGroup,
    pub predicate: String,
    pub parameters: Vec<ParameterSpec>,
    pub lock_mode: LockMode,
}

impl QuerySpec {
    pub fn has_outer_join(&self) -> bool {
        self.from
            .joins
            .iter()
            .any(|j| j.join_type == JoinType::LeftOuter)
    }

    pub fn select_list(&self) -> String {
        self.selections
            .iter()
            .map(SelectItem::to_sql)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Everything after the select list, without the lock clause.
    pub fn from_and_where(&self) -> String {
        let mut sql = format!("from {}", self.from.to_sql());
        if !self.predicate.trim().is_empty() {
            sql.push_str(" where ");
            sql.push_str(&self.predicate);
        }
        sql
    }

    /// Render the query with `?` markers.
    pub fn render(&self, dialect: &dyn Dialect) -> RenderedSql {
        let mut sql = format!("select {} {}", self.select_list(), self.from_and_where());
        if self.lock_mode == LockMode::Write {
            sql.push_str(dialect.write_lock_clause());
        }
        RenderedSql::new(sql, self.parameters.clone())
    }
}
