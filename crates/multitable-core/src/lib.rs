//! Core types and traits for multitable.
//!
//! This crate provides the foundational abstractions shared by the bulk
//! mutation engine:
//!
//! - `Value`, `Row` and `SqlType` for statement parameters and results
//! - `Connection` / `ConnectionProvider` traits for statement execution and DDL
//! - `Dialect` capability trait with the built-in `StandardDialect`s
//! - `MutationTarget` / `TableMapping` physical mapping metadata
//! - `Outcome` re-export from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod dialect;
pub mod error;
pub mod mapping;
pub mod row;
pub mod types;
pub mod value;

pub use connection::{Connection, ConnectionProvider, PreparedStatement};
pub use dialect::{Dialect, StandardDialect, StrategyKind, TemporaryTableKind};
pub use error::{Error, Result};
pub use mapping::{
    CollectionKind, CollectionTable, ColumnMapping, Discriminator, DiscriminatorValue,
    ExpectationKind, InheritanceType, MutationTarget, MutationTargetBuilder, TableDetails,
    TableMapping,
};
pub use row::Row;
pub use types::SqlType;
pub use value::Value;
