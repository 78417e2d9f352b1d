//! Row-level persistence of one entity across its tables.
//!
//! The planner drives the same table mutation builders the bulk handlers
//! use, but binds values from the entity row instead of compiled
//! assignments, and restricts each table by its key columns.

use crate::execute::execute_update;
use multitable_core::{
    ColumnMapping, Connection, Cx, Dialect, Error, MutationTarget, Outcome, Result, TableMapping,
};
use multitable_query::{
    BindingContext, Expectation, MutationGroup, MutationGroupBuilder, MutationKind,
    MutationStatement, ParameterSpec, RenderedSql, RowValues, TableMutation, TableMutationBuilder,
};
use std::sync::Arc;

/// Builds the mutation groups used to insert, update and delete a single
/// entity row.
#[derive(Debug, Clone)]
pub struct EntityMutationPlanner {
    target: Arc<MutationTarget>,
    dialect: Arc<dyn Dialect>,
    use_sql_comments: bool,
}

impl EntityMutationPlanner {
    pub fn new(target: Arc<MutationTarget>, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            target,
            dialect,
            use_sql_comments: false,
        }
    }

    pub fn with_sql_comments(mut self, enabled: bool) -> Self {
        self.use_sql_comments = enabled;
        self
    }

    pub fn mutation_target(&self) -> &MutationTarget {
        &self.target
    }

    fn builder(&self, kind: MutationKind, table: &Arc<TableMapping>) -> TableMutationBuilder {
        let mut builder = match kind {
            MutationKind::Insert => TableMutationBuilder::insert(Arc::clone(table)),
            MutationKind::Update => TableMutationBuilder::update(Arc::clone(table)),
            MutationKind::Delete => TableMutationBuilder::delete(Arc::clone(table)),
            MutationKind::Merge => TableMutationBuilder::merge(Arc::clone(table)),
        };
        if self.use_sql_comments {
            builder.set_sql_comment(format!("{kind} {}", self.target.entity_name()));
        }
        builder
    }

    /// Key columns of `table` paired with the identifier column each one
    /// holds.
    fn keys<'a>(&'a self, table: &'a TableMapping) -> impl Iterator<Item = (&'a str, &'a ColumnMapping)> {
        table
            .key_columns()
            .iter()
            .map(String::as_str)
            .zip(self.target.identifier_columns())
    }

    fn restrict_by_keys(&self, builder: &mut TableMutationBuilder, table: &TableMapping) {
        for (key, id) in self.keys(table) {
            builder.add_key_restriction_bound(key, id.sql_type.clone(), ParameterSpec::restrict(&id.name));
        }
    }

    /// Insert every table in constraint order. Secondary tables receive the
    /// identifier in their own key columns; formula columns are skipped.
    pub fn insert_group(&self) -> Result<MutationGroup> {
        let mut group = MutationGroupBuilder::new(MutationKind::Insert, self.target.role());
        for table in self.target.tables() {
            let mut builder = self.builder(MutationKind::Insert, table);
            for (key, id) in self.keys(table) {
                builder.add_value_column_bound(key, id.sql_type.clone(), ParameterSpec::set(&id.name));
            }
            for column in table.value_columns() {
                builder.add_value_column_leniently(column);
            }
            if table.is_identifier_table() {
                if let Some(version) = self.target.version() {
                    builder.add_value_column(version);
                }
            }
            group.add_table_builder(builder);
        }
        group.build_mutation_group(self.dialect.as_ref())
    }

    /// Update the tables holding `dirty_columns`. Tables without a dirty
    /// column resolve to no-set and drop out of the group. A versioned
    /// entity increments and checks its version on the identifier table.
    pub fn update_group(&self, dirty_columns: &[&str]) -> Result<MutationGroup> {
        for name in dirty_columns {
            let known = self
                .target
                .tables()
                .iter()
                .any(|t| t.value_column(name).is_some());
            if !known {
                return Err(Error::mapping(
                    self.target.entity_name(),
                    format!("'{name}' is not an updatable column"),
                ));
            }
        }
        let mut group = MutationGroupBuilder::new(MutationKind::Update, self.target.role());
        for table in self.target.tables() {
            let mut builder = self.builder(MutationKind::Update, table);
            for column in table.value_columns() {
                if dirty_columns.contains(&column.name.as_str()) {
                    builder.add_value_column_leniently(column);
                }
            }
            if table.is_identifier_table() && !dirty_columns.is_empty() {
                if let Some(version) = self.target.version() {
                    builder.add_value_column(version);
                }
            }
            self.restrict_by_keys(&mut builder, table);
            if table.is_identifier_table() {
                if let Some(version) = self.target.version() {
                    builder.add_optimistic_lock_restriction(version);
                }
            }
            group.add_table_builder(builder);
        }
        group.build_mutation_group(self.dialect.as_ref())
    }

    /// Delete in reverse constraint order. Tables cleaned by an
    /// `on delete cascade` key are left to the database, and rows of
    /// optional tables may be missing.
    pub fn delete_group(&self) -> Result<MutationGroup> {
        let mut group = MutationGroupBuilder::new(MutationKind::Delete, self.target.role());
        for table in self.target.tables().iter().rev() {
            if table.is_cascade_delete() && !table.is_identifier_table() {
                continue;
            }
            let mut builder = self.builder(MutationKind::Delete, table);
            self.restrict_by_keys(&mut builder, table);
            if table.is_identifier_table() {
                if let Some(version) = self.target.version() {
                    builder.add_optimistic_lock_restriction(version);
                }
            }
            if table.is_optional() {
                builder.set_expectation(Expectation::None);
            }
            group.add_table_builder(builder);
        }
        group.build_mutation_group(self.dialect.as_ref())
    }

    /// `update root set version = ? where id = ? and version = ?`.
    pub fn version_increment(&self) -> Result<TableMutation> {
        let Some(version) = self.target.version() else {
            return Err(Error::mapping(
                self.target.entity_name(),
                "forced version increment of an unversioned entity",
            ));
        };
        let root = self.target.root_table();
        let mut builder = TableMutationBuilder::update(Arc::clone(root));
        builder.add_value_column(version);
        self.restrict_by_keys(&mut builder, root);
        builder.add_optimistic_lock_restriction(version);
        builder.set_generated_only();
        builder.set_expectation(Expectation::RowCount(1));
        if self.use_sql_comments {
            builder.set_sql_comment(format!("forced version increment for {}", self.target.role()));
        }
        Ok(builder.build_mutation(self.dialect.as_ref()))
    }
}

fn rendered(statement: &MutationStatement) -> RenderedSql {
    RenderedSql::new(statement.sql(), statement.parameters().to_vec())
}

/// True when every value the statement writes, other than key columns, is null.
fn writes_only_nulls(statement: &MutationStatement, row: &RowValues) -> Result<bool> {
    let bindings = BindingContext::for_row(row);
    let keys = statement.table().key_columns();
    for value in statement.values() {
        if keys.iter().any(|k| k == value.column_name()) {
            continue;
        }
        for spec in value.parameters() {
            if !bindings.resolve(spec)?.is_null() {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

async fn run_statement<C: Connection>(
    cx: &Cx,
    conn: &C,
    dialect: &dyn Dialect,
    statement: &MutationStatement,
    row: &RowValues,
) -> Outcome<u64, Error> {
    let rendered = rendered(statement);
    let affected = match execute_update(
        cx,
        conn,
        dialect,
        &rendered,
        BindingContext::for_row(row),
        "entity mutation",
    )
    .await
    {
        Outcome::Ok(n) => n,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };
    match statement
        .expectation()
        .verify(statement.table_name(), affected, statement.sql())
    {
        Ok(()) => Outcome::Ok(affected),
        Err(e) => Outcome::Err(e),
    }
}

/// Run the table mutations of `group` for one entity row, in order, and
/// return the total number of rows affected.
///
/// No-set mutations are skipped, as are inserts into optional tables when
/// the row has no value for them. A merge whose values are all null
/// deletes the optional row; otherwise it updates and falls back to an
/// insert when no row was there.
#[tracing::instrument(level = "debug", skip(cx, conn, dialect, group, row), fields(role = %group.role(), kind = %group.kind()))]
pub async fn execute_group<C: Connection>(
    cx: &Cx,
    conn: &C,
    dialect: &dyn Dialect,
    group: &MutationGroup,
    row: &RowValues,
) -> Outcome<u64, Error> {
    let mut total = 0;
    for mutation in group.mutations() {
        let result = match mutation {
            TableMutation::NoSet { table, .. } => {
                tracing::trace!(table = table.name(), "nothing to write");
                continue;
            }
            TableMutation::Insert(statement) if statement.table().is_optional() => {
                match writes_only_nulls(statement, row) {
                    Ok(true) => {
                        tracing::trace!(table = statement.table_name(), "optional row absent");
                        continue;
                    }
                    Ok(false) => run_statement(cx, conn, dialect, statement, row).await,
                    Err(e) => return Outcome::Err(e),
                }
            }
            TableMutation::Insert(statement)
            | TableMutation::Update(statement)
            | TableMutation::Delete(statement)
            | TableMutation::Custom { statement, .. } => {
                run_statement(cx, conn, dialect, statement, row).await
            }
            TableMutation::Merge(merge) => match writes_only_nulls(&merge.update, row) {
                Ok(true) => run_statement(cx, conn, dialect, &merge.delete, row).await,
                Ok(false) => match run_statement(cx, conn, dialect, &merge.update, row).await {
                    Outcome::Ok(0) => run_statement(cx, conn, dialect, &merge.insert, row).await,
                    other => other,
                },
                Err(e) => return Outcome::Err(e),
            },
        };
        match result {
            Outcome::Ok(n) => total += n,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }
    Outcome::Ok(total)
}
