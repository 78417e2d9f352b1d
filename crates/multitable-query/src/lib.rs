//! Restriction expressions and table mutation builders for multitable.
//!
//! `multitable-query` is the **statement construction layer**. It turns the
//! bulk statement trees and entity mapping metadata from `multitable-core`
//! into SQL text with `?` markers plus an ordered list of parameter specs.
//!
//! # Role In The Architecture
//!
//! - **Expression DSL**: `Expr` renders WHERE restrictions and SET values.
//! - **Fragments**: a quote-aware tokenizer decides which `?` are parameters.
//! - **Mutation builders**: `TableMutationBuilder` accumulates key, lock and
//!   value bindings for one table and yields an immutable `TableMutation`.
//! - **Groups**: `MutationGroup` orders the table mutations of one entity.
//!
//! Values are bound only at execution time through `BindingContext`.

pub mod binding;
pub mod builder;
pub mod expr;
pub mod fragment;
pub mod group;
pub mod mutation;
pub mod parameter;
pub mod select;
pub mod statement;
pub mod where_clause;

pub use binding::{ColumnReference, ColumnValueBinding, Restriction, WriteFragment};
pub use builder::TableMutationBuilder;
pub use expr::{BinaryOp, ColumnQualifier, Expr, RenderContext, UnaryOp};
pub use fragment::{FragmentRun, count_parameter_markers, render_placeholders, split_fragment};
pub use group::{MutationGroup, MutationGroupBuilder};
pub use mutation::{Expectation, MergeMutation, MutationKind, MutationStatement, TableMutation};
pub use parameter::{
    BindingContext, ParameterSpec, ParameterUsage, QueryParameterBindings, RenderedSql, RowValues,
};
pub use select::{JoinType, LockMode, QuerySpec, SelectItem, TableGroup, TableJoin};
pub use statement::{Assignment, BulkDelete, BulkInsert, BulkUpdate, InsertSource};
pub use where_clause::ProcessedWhereClause;
