//! Per-table statements of a bulk UPDATE or DELETE, before they are
//! restricted to the matched rows.
//!
//! Every handler restricts the same plan differently (id table subquery,
//! CTE reference, inline id list, or the user restriction itself), so the
//! plan keeps unfinished builders and renders one statement per table on
//! demand.

use multitable_core::{
    CollectionKind, Dialect, Error, MutationTarget, Result, SqlType, TableMapping,
};
use multitable_query::{
    BulkUpdate, Expectation, MutationKind, ParameterSpec, RenderContext, RenderedSql,
    TableMutationBuilder,
};
use std::sync::Arc;

/// One table's statement, waiting for the restriction to the matched rows.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    builder: TableMutationBuilder,
    key_columns: Vec<String>,
    referenced_columns: Vec<String>,
}

impl PendingMutation {
    fn new(
        mut builder: TableMutationBuilder,
        key_columns: Vec<String>,
        referenced_columns: Vec<String>,
        comment: Option<&str>,
    ) -> Self {
        builder.set_expectation(Expectation::None);
        builder.set_generated_only();
        if let Some(comment) = comment {
            builder.set_sql_comment(comment);
        }
        Self {
            builder,
            key_columns,
            referenced_columns,
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.builder.kind()
    }

    pub fn table_name(&self) -> &str {
        self.builder.table().name()
    }

    /// Columns of this table that identify the owning entity row.
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Owner columns the keys hold values of, aligned with the keys.
    pub fn referenced_columns(&self) -> &[String] {
        &self.referenced_columns
    }

    pub fn referenced_column_names(&self) -> Vec<&str> {
        self.referenced_columns.iter().map(String::as_str).collect()
    }

    /// Render the statement restricted by `predicate`. A blank predicate
    /// leaves the statement unrestricted. `None` when there is nothing to
    /// write to this table.
    pub fn restrict(
        &self,
        predicate: &str,
        parameters: Vec<ParameterSpec>,
        dialect: &dyn Dialect,
    ) -> Option<RenderedSql> {
        let mut builder = self.builder.clone();
        if !predicate.trim().is_empty() {
            builder.add_where_fragment(predicate, parameters);
        }
        let mutation = builder.build_mutation(dialect);
        mutation
            .statement()
            .map(|s| RenderedSql::new(s.sql(), s.parameters().to_vec()))
    }
}

/// `bulk update <entity>`, the comment attached to generated statements.
pub fn statement_comment(kind: MutationKind, target: &MutationTarget, enabled: bool) -> Option<String> {
    enabled.then(|| format!("bulk {kind} {}", target.entity_name()))
}

fn identifier_names(target: &MutationTarget) -> Vec<String> {
    target
        .identifier_columns()
        .iter()
        .map(|c| c.name.clone())
        .collect()
}

/// One UPDATE per table that has assigned columns, in constraint order.
pub fn update_plan(
    target: &MutationTarget,
    statement: &BulkUpdate,
    comment: Option<&str>,
) -> Result<Vec<PendingMutation>> {
    let entity = target.entity_name();
    if statement.assignments.is_empty() {
        return Err(Error::mapping(entity, "bulk update without assignments"));
    }

    let mut builders: Vec<Option<TableMutationBuilder>> = vec![None; target.tables().len()];
    for assignment in &statement.assignments {
        let name = assignment.column.as_str();
        let (table, column) = assignment_target(target, name)?;
        if column.formula || !column.updatable {
            return Err(Error::mapping(
                entity,
                format!("column '{name}' is not updatable"),
            ));
        }
        for referenced in assignment.value.referenced_columns() {
            if !table.contains_column(referenced) && !is_version(target, referenced) {
                return Err(Error::mapping(
                    entity,
                    format!(
                        "assignment to '{name}' references '{referenced}' outside table '{}'",
                        table.name()
                    ),
                ));
            }
        }
        let mut ctx = RenderContext::new();
        let fragment = assignment.value.render(&mut ctx);
        let builder = builders[table.position()]
            .get_or_insert_with(|| TableMutationBuilder::update(Arc::clone(table)));
        builder.add_value_fragment(name, column.sql_type.clone(), &fragment, ctx.into_parameters())?;
    }

    Ok(target
        .tables()
        .iter()
        .zip(builders)
        .filter_map(|(table, builder)| {
            builder.map(|b| {
                PendingMutation::new(
                    b,
                    table.key_columns().to_vec(),
                    identifier_names(target),
                    comment,
                )
            })
        })
        .collect())
}

fn is_version(target: &MutationTarget, column: &str) -> bool {
    target.version().is_some_and(|v| v.name == column)
}

/// Table and mapping of an assigned column. The version column lives on
/// the root table; identifier columns cannot be assigned.
fn assignment_target<'t>(
    target: &'t MutationTarget,
    column: &str,
) -> Result<(&'t Arc<TableMapping>, &'t multitable_core::ColumnMapping)> {
    let entity = target.entity_name();
    if target.identifier_columns().iter().any(|c| c.name == column) {
        return Err(Error::mapping(
            entity,
            format!("identifier column '{column}' cannot be assigned"),
        ));
    }
    if let Some(version) = target.version().filter(|v| v.name == column) {
        return Ok((target.root_table(), version));
    }
    target
        .table_for_column(column)
        .and_then(|table| table.value_column(column).map(|mapping| (table, mapping)))
        .ok_or_else(|| Error::mapping(entity, format!("unknown column '{column}'")))
}

/// Collection rows first, then the entity tables from the most derived to
/// the root. Tables whose rows the database removes by cascade are skipped.
pub fn delete_plan(target: &MutationTarget, comment: Option<&str>) -> Result<Vec<PendingMutation>> {
    let mut plan = Vec::new();
    for collection in target.collections() {
        let table = Arc::new(TableMapping::new(
            &collection.table,
            collection.key_columns.clone(),
        ));
        let referenced = if collection.references_identifier() {
            identifier_names(target)
        } else {
            collection.target_columns.clone()
        };
        let builder = match collection.kind {
            CollectionKind::JoinTable | CollectionKind::ElementCollection => {
                TableMutationBuilder::delete(table)
            }
            CollectionKind::OneToManyForeignKey => {
                let mut builder = TableMutationBuilder::update(table);
                for (key, owner) in collection.key_columns.iter().zip(&referenced) {
                    let sql_type = target
                        .column(owner)
                        .map(|c| c.sql_type.clone())
                        .unwrap_or(SqlType::BigInt);
                    builder.add_value_fragment(key, sql_type, "null", Vec::new())?;
                }
                builder
            }
        };
        plan.push(PendingMutation::new(
            builder,
            collection.key_columns.clone(),
            referenced,
            comment,
        ));
    }
    for table in target.tables().iter().rev() {
        if table.is_cascade_delete() {
            tracing::trace!(table = table.name(), "rows removed by cascade, skipping");
            continue;
        }
        plan.push(PendingMutation::new(
            TableMutationBuilder::delete(Arc::clone(table)),
            table.key_columns().to_vec(),
            identifier_names(target),
            comment,
        ));
    }
    Ok(plan)
}
