//! Id table definitions and DDL lifecycle for multitable.
//!
//! This crate provides:
//! - Id table definitions derived from an entity's physical mapping
//! - Staging table definitions for bulk INSERT
//! - CREATE / DROP / row cleanup statements per dialect
//! - Batch export and cleanup of id tables with per-table results

pub mod ddl;
pub mod export;
pub mod id_table;

pub use ddl::IdTableDdl;
pub use export::{DdlReport, cleanup_table_definitions, export_table_definitions};
pub use id_table::{
    IdTableColumn, IdTableMapping, IdTableOptions, SESSION_COLUMN, SESSION_COLUMN_LENGTH,
    auxiliary_columns, generate_id_table_definition, generate_staging_table_definition, needs_id_table,
};
