//! Bulk mutation handlers for entities spread across several tables.
//!
//! `multitable-bulk` is the **execution layer**. A bulk UPDATE, DELETE or
//! INSERT against a multi-table entity cannot be expressed as one SQL
//! statement, so the handlers here first determine the matching ids and
//! then mutate each physical table in constraint order.
//!
//! # Role In The Architecture
//!
//! - **Matching ids**: `MatchingIdSelector` compiles the statement's
//!   restriction into an id SELECT over the entity's joined tables.
//! - **Strategies**: `BulkIdStrategy` decides where matching ids live (a
//!   global, local or persistent id table, a CTE, or memory) and builds the
//!   handler for each statement.
//! - **Handlers**: every handler implements `MultiTableHandler`; the
//!   returned count is the number of matched entities.
//! - **Entity rows**: `EntityMutationPlanner` reuses the same builders for
//!   single-row persistence across tables.
//!
//! # Example
//!
//! ```ignore
//! let strategy = BulkIdStrategy::Persistent(TableStrategyOptions::default());
//! let handler = strategy.build_update_handler(&target, &dialect, &update, false)?;
//!
//! let session = BulkSession::new(conn);
//! let count = handler.execute(&cx, &session, &params).await;
//! ```

pub mod cte;
pub mod direct;
pub mod entity;
pub mod execute;
pub mod handler;
pub mod inline;
pub mod insert;
pub mod matching;
pub mod plan;
pub mod session;
pub mod strategy;
pub mod table_based;

#[cfg(test)]
mod testing;

pub use cte::CteHandler;
pub use direct::DirectHandler;
pub use entity::{EntityMutationPlanner, execute_group};
pub use execute::{execute_count, execute_query, execute_quietly, execute_update};
pub use handler::{BulkHandler, MultiTableHandler};
pub use inline::InlineHandler;
pub use insert::{InsertLayout, TableBasedInsertHandler, TableInsert};
pub use matching::{MatchingIdRestriction, MatchingIdSelector};
pub use plan::PendingMutation;
pub use session::BulkSession;
pub use strategy::{
    AfterUseAction, BeforeUseAction, BulkIdStrategy, StagingHooks, TableStrategyOptions,
};
pub use table_based::TableBasedHandler;
