//! Multi-table bulk mutations for entities spread across several tables.
//!
//! A bulk UPDATE or DELETE against an entity mapped to more than one
//! table (joined inheritance, secondary tables, collection tables) is run
//! as an ordered sequence of statements: the matching ids are determined
//! once, then every physical table is mutated in constraint order with its
//! rows restricted to those ids. Bulk INSERT splits staged rows across the
//! tables the same way.
//!
//! This crate is the entry point. It ties together:
//!
//! - `BulkIdSettings`: strategy configuration from properties, the
//!   environment or serde
//! - `StrategySelector`: per-entity strategy choice with dialect fallback
//! - `BulkMutationFactory`: id table lifecycle and handler construction
//!
//! # Quick Start
//!
//! ```ignore
//! use multitable::prelude::*;
//!
//! async fn close_open_invoices(cx: &Cx, provider: &impl ConnectionProvider, conn: impl Connection) {
//!     let factory = BulkMutationFactory::builder(Arc::new(StandardDialect::Postgres))
//!         .settings(BulkIdSettings::from_env().unwrap())
//!         .entity(invoice_mapping())
//!         .build()
//!         .unwrap();
//!     factory.boot(cx, provider).await;
//!
//!     let update = BulkUpdate::new("Invoice", "i")
//!         .set("status", "CLOSED")
//!         .filter(Expr::col("status").eq("OPEN"));
//!     let handler = factory.update_handler(&update).unwrap();
//!
//!     let session = BulkSession::new(conn);
//!     let closed = handler
//!         .execute(cx, &session, &QueryParameterBindings::new())
//!         .await;
//! }
//! ```

pub mod config;
pub mod factory;
pub mod selector;

pub use config::{BulkIdSettings, TableStrategySettings};
pub use factory::{BulkMutationFactory, BulkMutationFactoryBuilder, TableBatch};
pub use selector::{SelectedStrategies, StrategySelector};

pub use multitable_bulk::{
    BulkHandler, BulkIdStrategy, BulkSession, EntityMutationPlanner, MultiTableHandler,
    TableStrategyOptions, execute_group,
};
pub use multitable_core::{
    CollectionKind, CollectionTable, ColumnMapping, Connection, ConnectionProvider, Cx, Dialect,
    Error, InheritanceType, MutationTarget, Outcome, Result, Row, SqlType, StandardDialect,
    StrategyKind, TableMapping, Value,
};
pub use multitable_query::{
    BulkDelete, BulkInsert, BulkUpdate, Expr, MutationGroup, QueryParameterBindings, RowValues,
};
pub use multitable_schema::{DdlReport, IdTableMapping};

/// Everything needed to configure the factory and run bulk statements.
///
/// ```ignore
/// use multitable::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BulkDelete, BulkHandler, BulkIdSettings, BulkIdStrategy, BulkInsert, BulkMutationFactory,
        BulkSession, BulkUpdate, CollectionKind, CollectionTable, ColumnMapping, Connection,
        ConnectionProvider, Cx, Dialect, Error, Expr, InheritanceType, MultiTableHandler,
        MutationTarget, Outcome, QueryParameterBindings, Result, RowValues, SqlType,
        StandardDialect, StrategyKind, TableMapping, TableStrategyOptions, Value,
    };
    pub use std::sync::Arc;
}
