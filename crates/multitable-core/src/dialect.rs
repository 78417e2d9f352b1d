//! SQL dialect capabilities consumed by the bulk mutation engine.
//!
//! The engine never inspects a database product directly; every decision
//! that depends on the database (placeholder syntax, lock clauses,
//! temporary table DDL, strategy fallback) goes through [`Dialect`].

use crate::error::{Error, Result};
use crate::types::SqlType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an id table is backed by the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporaryTableKind {
    /// ANSI global temporary table: created once, rows private to each session.
    Global,
    /// Local temporary table: private to one connection, created on use.
    Local,
    /// Ordinary table shared by all sessions, rows tagged with a session id.
    Persistent,
}

/// The family of bulk mutation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    GlobalTemporary,
    Persistent,
    LocalTemporary,
    Cte,
    Inline,
}

impl StrategyKind {
    /// Configuration name of this strategy.
    pub const fn as_str(self) -> &'static str {
        match self {
            StrategyKind::GlobalTemporary => "global_temporary",
            StrategyKind::Persistent => "persistent",
            StrategyKind::LocalTemporary => "local_temporary",
            StrategyKind::Cte => "cte",
            StrategyKind::Inline => "inline",
        }
    }

    /// The id table backing used by this strategy, if it stages into a table.
    pub const fn temporary_table_kind(self) -> Option<TemporaryTableKind> {
        match self {
            StrategyKind::GlobalTemporary => Some(TemporaryTableKind::Global),
            StrategyKind::Persistent => Some(TemporaryTableKind::Persistent),
            StrategyKind::LocalTemporary => Some(TemporaryTableKind::Local),
            StrategyKind::Cte | StrategyKind::Inline => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "global_temporary" | "global" => Ok(StrategyKind::GlobalTemporary),
            "persistent" => Ok(StrategyKind::Persistent),
            "local_temporary" | "local" | "temporary" => Ok(StrategyKind::LocalTemporary),
            "cte" => Ok(StrategyKind::Cte),
            "inline" => Ok(StrategyKind::Inline),
            other => Err(Error::config(format!(
                "unknown bulk mutation strategy '{other}'"
            ))),
        }
    }
}

/// Capability contract of a SQL dialect.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Short product name, used in log output.
    fn name(&self) -> &'static str;

    /// Placeholder for the given parameter index (1-based).
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Can `for update` be combined with an outer join?
    fn supports_outer_join_for_update(&self) -> bool {
        true
    }

    /// Must LOB values be bound after all other values of a statement?
    fn forces_lob_bindings_last(&self) -> bool {
        false
    }

    fn supports_window_functions(&self) -> bool {
        true
    }

    /// Can INSERT/UPDATE/DELETE appear inside a `with` clause?
    fn supports_data_modifying_cte(&self) -> bool {
        false
    }

    /// Clause appended to a select that write-locks the selected rows.
    /// Empty when the database has no row locking.
    fn write_lock_clause(&self) -> &'static str {
        " for update"
    }

    /// Maximum number of elements in one `in (...)` list, 0 for no limit.
    fn in_expression_limit(&self) -> usize {
        0
    }

    fn supports_temporary_table(&self, kind: TemporaryTableKind) -> bool {
        matches!(kind, TemporaryTableKind::Persistent)
    }

    /// Command that starts a CREATE TABLE statement for the given kind.
    ///
    /// Local tables are created before every use, so the command should
    /// tolerate a table left by an earlier use on the same connection.
    fn create_table_command(&self, kind: TemporaryTableKind) -> &'static str {
        match kind {
            TemporaryTableKind::Global => "create global temporary table",
            TemporaryTableKind::Local => "create local temporary table",
            TemporaryTableKind::Persistent => "create table",
        }
    }

    /// Options appended after the column list of a CREATE statement.
    fn create_table_options(&self, kind: TemporaryTableKind) -> Option<&'static str> {
        match kind {
            TemporaryTableKind::Global => Some("on commit delete rows"),
            TemporaryTableKind::Local | TemporaryTableKind::Persistent => None,
        }
    }

    /// Command that starts a DROP TABLE statement for the given kind.
    fn drop_table_command(&self, _kind: TemporaryTableKind) -> &'static str {
        "drop table"
    }

    /// Column type name in DDL.
    fn type_name(&self, sql_type: &SqlType) -> String {
        sql_type.sql_name()
    }

    /// Strategy used for bulk UPDATE/DELETE when none is configured.
    fn fallback_mutation_strategy(&self) -> StrategyKind {
        StrategyKind::Persistent
    }

    /// Strategy used for bulk INSERT when none is configured.
    fn fallback_insert_strategy(&self) -> StrategyKind {
        self.fallback_mutation_strategy()
    }
}

/// Built-in dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardDialect {
    /// PostgreSQL ($1, $2 placeholders, data-modifying CTEs)
    Postgres,
    /// MySQL (? placeholders, connection-local temporary tables)
    Mysql,
    /// SQLite (?1, ?2 placeholders, no row locking)
    Sqlite,
    /// Oracle (global temporary tables, LOBs bound last)
    Oracle,
    /// H2 (global temporary tables)
    H2,
    /// Lowest common denominator: no temporary tables
    #[default]
    Generic,
}

impl Dialect for StandardDialect {
    fn name(&self) -> &'static str {
        match self {
            StandardDialect::Postgres => "postgres",
            StandardDialect::Mysql => "mysql",
            StandardDialect::Sqlite => "sqlite",
            StandardDialect::Oracle => "oracle",
            StandardDialect::H2 => "h2",
            StandardDialect::Generic => "generic",
        }
    }

    fn placeholder(&self, index: usize) -> String {
        match self {
            StandardDialect::Postgres => format!("${index}"),
            StandardDialect::Sqlite => format!("?{index}"),
            _ => "?".to_string(),
        }
    }

    fn supports_outer_join_for_update(&self) -> bool {
        !matches!(self, StandardDialect::Postgres)
    }

    fn forces_lob_bindings_last(&self) -> bool {
        matches!(self, StandardDialect::Oracle)
    }

    fn supports_window_functions(&self) -> bool {
        !matches!(self, StandardDialect::Generic)
    }

    fn supports_data_modifying_cte(&self) -> bool {
        matches!(self, StandardDialect::Postgres)
    }

    fn write_lock_clause(&self) -> &'static str {
        match self {
            StandardDialect::Sqlite => "",
            _ => " for update",
        }
    }

    fn in_expression_limit(&self) -> usize {
        match self {
            StandardDialect::Oracle => 1000,
            StandardDialect::Sqlite => 500,
            _ => 0,
        }
    }

    fn supports_temporary_table(&self, kind: TemporaryTableKind) -> bool {
        match kind {
            TemporaryTableKind::Persistent => true,
            TemporaryTableKind::Global => {
                matches!(self, StandardDialect::Oracle | StandardDialect::H2)
            }
            TemporaryTableKind::Local => !matches!(self, StandardDialect::Generic),
        }
    }

    fn create_table_command(&self, kind: TemporaryTableKind) -> &'static str {
        match (self, kind) {
            (_, TemporaryTableKind::Persistent) => "create table",
            (_, TemporaryTableKind::Global) => "create global temporary table",
            (
                StandardDialect::Postgres | StandardDialect::Mysql | StandardDialect::Sqlite,
                TemporaryTableKind::Local,
            ) => "create temporary table if not exists",
            (_, TemporaryTableKind::Local) => "create local temporary table",
        }
    }

    fn drop_table_command(&self, kind: TemporaryTableKind) -> &'static str {
        match (self, kind) {
            (StandardDialect::Mysql, TemporaryTableKind::Local) => "drop temporary table",
            _ => "drop table",
        }
    }

    fn type_name(&self, sql_type: &SqlType) -> String {
        match (self, sql_type) {
            (StandardDialect::Oracle, SqlType::VarChar(len)) => format!("varchar2({len})"),
            (StandardDialect::Oracle, SqlType::BigInt) => "number(19,0)".to_string(),
            (StandardDialect::Postgres, SqlType::Blob) => "bytea".to_string(),
            (StandardDialect::Mysql, SqlType::Clob) => "longtext".to_string(),
            _ => sql_type.sql_name(),
        }
    }

    fn fallback_mutation_strategy(&self) -> StrategyKind {
        match self {
            StandardDialect::Postgres => StrategyKind::Cte,
            StandardDialect::Mysql | StandardDialect::Sqlite => StrategyKind::LocalTemporary,
            StandardDialect::Oracle | StandardDialect::H2 => StrategyKind::GlobalTemporary,
            StandardDialect::Generic => StrategyKind::Persistent,
        }
    }
}
