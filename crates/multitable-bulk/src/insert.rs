//! Bulk INSERT into entities spanning several tables.
//!
//! Rows are first written to the entity-shaped staging table, then copied
//! into every table of the entity in constraint order, so each table sees
//! the same rows whatever the source was.

use crate::plan::statement_comment;
use crate::session::BulkSession;
use crate::strategy::{
    AfterUseAction, StagingHooks, before_use_statement, release_statement,
};
use crate::table_based::StagedStatements;
use multitable_core::{
    Connection, Cx, Dialect, Error, MutationTarget, Outcome, Result, TableMapping,
};
use multitable_query::{
    BulkInsert, InsertSource, MutationKind, ParameterSpec, QueryParameterBindings, RenderContext,
    RenderedSql,
};
use multitable_schema::{IdTableDdl, IdTableMapping};
use std::sync::Arc;

/// Columns written to one table: `(table column, inserted column)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInsert {
    pub table: Arc<TableMapping>,
    pub columns: Vec<(String, String)>,
}

impl TableInsert {
    pub fn table_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|(t, _)| t.as_str()).collect()
    }

    pub fn source_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|(_, s)| s.as_str()).collect()
    }
}

/// How the inserted columns spread over the entity's tables.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertLayout {
    tables: Vec<TableInsert>,
}

impl InsertLayout {
    /// Every table gets the identifier under its own key names plus the
    /// inserted columns it owns. Optional tables without inserted columns
    /// get no row.
    pub fn new(target: &MutationTarget, statement: &BulkInsert) -> Result<Self> {
        let entity = target.entity_name();
        let ids = target.identifier_column_names();
        for id in &ids {
            if statement.column_index(id).is_none() {
                return Err(Error::mapping(
                    entity,
                    format!("bulk insert must supply identifier column '{id}'"),
                ));
            }
        }

        let mut owners: Vec<(usize, &str)> = Vec::new();
        for name in &statement.columns {
            if ids.contains(&name.as_str()) {
                continue;
            }
            let mapping = target
                .column(name)
                .ok_or_else(|| Error::mapping(entity, format!("unknown column '{name}'")))?;
            if mapping.formula || !mapping.insertable {
                return Err(Error::mapping(
                    entity,
                    format!("column '{name}' is not insertable"),
                ));
            }
            let position = target.table_for_column(name).map_or(0, |t| t.position());
            owners.push((position, name));
        }

        let tables = target
            .tables()
            .iter()
            .filter_map(|table| {
                let values: Vec<(String, String)> = owners
                    .iter()
                    .filter(|(position, _)| *position == table.position())
                    .map(|(_, name)| (name.to_string(), name.to_string()))
                    .collect();
                if values.is_empty() && table.is_optional() {
                    return None;
                }
                let columns = table
                    .key_columns()
                    .iter()
                    .zip(&ids)
                    .map(|(key, id)| (key.clone(), id.to_string()))
                    .chain(values)
                    .collect();
                Some(TableInsert {
                    table: Arc::clone(table),
                    columns,
                })
            })
            .collect();
        Ok(Self { tables })
    }

    pub fn tables(&self) -> &[TableInsert] {
        &self.tables
    }
}

/// Render the row source of an insert projected onto `columns`, each row
/// or selection followed by `extras` (column values supplied by the
/// strategy, such as the session uid) and their parameters.
pub fn render_source(
    statement: &BulkInsert,
    columns: &[&str],
    extras: &[(String, String)],
    extra_parameters: &[ParameterSpec],
) -> Result<(String, Vec<ParameterSpec>)> {
    let indexes = columns
        .iter()
        .map(|c| {
            statement.column_index(c).ok_or_else(|| {
                Error::mapping(&statement.entity, format!("column '{c}' is not inserted"))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let extra_sql: Vec<&str> = extras.iter().map(|(_, value)| value.as_str()).collect();
    let arity = statement.columns.len();

    match &statement.source {
        InsertSource::Values(rows) => {
            if rows.is_empty() {
                return Err(Error::mapping(&statement.entity, "bulk insert without rows"));
            }
            let mut parameters = Vec::new();
            let mut rendered = Vec::with_capacity(rows.len());
            for row in rows {
                if row.len() != arity {
                    return Err(Error::mapping(
                        &statement.entity,
                        format!("row has {} values for {arity} columns", row.len()),
                    ));
                }
                let mut ctx = RenderContext::new();
                let mut values: Vec<String> = indexes.iter().map(|i| row[*i].render(&mut ctx)).collect();
                values.extend(extra_sql.iter().map(|s| s.to_string()));
                parameters.extend(ctx.into_parameters());
                parameters.extend_from_slice(extra_parameters);
                rendered.push(format!("({})", values.join(", ")));
            }
            Ok((format!("values {}", rendered.join(", ")), parameters))
        }
        InsertSource::Select {
            table,
            alias,
            selections,
            predicate,
        } => {
            if selections.len() != arity {
                return Err(Error::mapping(
                    &statement.entity,
                    format!("select has {} columns for {arity} inserted columns", selections.len()),
                ));
            }
            let mut ctx = RenderContext::new();
            let mut values: Vec<String> =
                indexes.iter().map(|i| selections[*i].render(&mut ctx)).collect();
            values.extend(extra_sql.iter().map(|s| s.to_string()));
            let mut parameters = ctx.into_parameters();
            parameters.extend_from_slice(extra_parameters);
            let mut sql = format!("select {} from {table} {alias}", values.join(", "));
            if let Some(predicate) = predicate {
                let mut ctx = RenderContext::new();
                sql.push_str(" where ");
                sql.push_str(&predicate.render(&mut ctx));
                parameters.extend(ctx.into_parameters());
            }
            Ok((sql, parameters))
        }
    }
}

fn comment_prefix(comment: Option<&str>) -> String {
    comment.map_or_else(String::new, |c| format!("/* {} */ ", c.replace("*/", "")))
}

/// Handler for INSERT into entities spanning several tables, staging full
/// rows in the strategy's staging table.
#[derive(Debug)]
pub struct TableBasedInsertHandler {
    target: Arc<MutationTarget>,
    dialect: Arc<dyn Dialect>,
    staging_table: IdTableMapping,
    layout: InsertLayout,
    before_use: Option<RenderedSql>,
    stage: RenderedSql,
    inserts: Vec<RenderedSql>,
    release: Option<RenderedSql>,
}

impl TableBasedInsertHandler {
    pub fn new(
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        statement: &BulkInsert,
        staging_table: IdTableMapping,
        hooks: StagingHooks,
        use_sql_comments: bool,
    ) -> Result<Self> {
        let layout = InsertLayout::new(&target, statement)?;
        let comment = statement_comment(MutationKind::Insert, &target, use_sql_comments);
        let prefix = comment_prefix(comment.as_deref());

        let inserted: Vec<&str> = statement.columns.iter().map(String::as_str).collect();
        let extras = (hooks.extra_id_select_values)(&staging_table);
        let extra_parameters = (hooks.prepended_id_selection_params)(&staging_table);
        let (source, parameters) = render_source(statement, &inserted, &extras, &extra_parameters)?;
        let staged_columns: Vec<&str> = inserted
            .iter()
            .copied()
            .chain(extras.iter().map(|(c, _)| c.as_str()))
            .collect();
        let stage = RenderedSql::new(
            format!(
                "insert into {} ({}) {source}",
                staging_table.qualified_name(),
                staged_columns.join(", ")
            ),
            parameters,
        );

        let mut from = format!("from {}", staging_table.qualified_name());
        if let Some(predicate) = (hooks.id_table_predicate)(&staging_table) {
            from.push_str(" where ");
            from.push_str(&predicate);
        }
        let inserts = layout
            .tables()
            .iter()
            .map(|t| {
                RenderedSql::new(
                    format!(
                        "{prefix}insert into {} ({}) select {} {from}",
                        t.table.name(),
                        t.table_columns().join(", "),
                        t.source_columns().join(", ")
                    ),
                    (hooks.appended_mutation_params)(&staging_table),
                )
            })
            .collect();

        // Staged rows are never reused, so they go even when id rows stay.
        let release = match hooks.after_use {
            AfterUseAction::Drop => release_statement(&staging_table, AfterUseAction::Drop, dialect.as_ref()),
            AfterUseAction::None | AfterUseAction::Clean => {
                Some(IdTableDdl::delete_rows_sql(&staging_table))
            }
        };
        let before_use = before_use_statement(&staging_table, hooks.before_use, dialect.as_ref());

        tracing::debug!(
            entity = target.entity_name(),
            staging_table = staging_table.qualified_name(),
            tables = layout.tables().len(),
            "built table-based bulk insert handler"
        );
        Ok(Self {
            target,
            dialect,
            staging_table,
            layout,
            before_use,
            stage,
            inserts,
            release,
        })
    }

    pub fn mutation_target(&self) -> &MutationTarget {
        &self.target
    }

    pub fn staging_table(&self) -> &IdTableMapping {
        &self.staging_table
    }

    pub fn layout(&self) -> &InsertLayout {
        &self.layout
    }

    fn staged(&self) -> StagedStatements<'_> {
        StagedStatements {
            before_use: self.before_use.as_ref(),
            stage: &self.stage,
            mutations: &self.inserts,
            release: self.release.as_ref(),
            result_index: Some(0),
        }
    }

    pub fn sql_statements(&self) -> Vec<String> {
        self.staged().sql()
    }

    /// Returns the number of rows inserted into the root table.
    #[tracing::instrument(level = "debug", skip(self, cx, session, query), fields(entity = %self.target.entity_name()))]
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        session: &BulkSession<C>,
        query: &QueryParameterBindings,
    ) -> Outcome<u64, Error> {
        self.staged()
            .execute(cx, session, self.dialect.as_ref(), query)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{BulkIdStrategy, TableStrategyOptions};
    use crate::testing::{ScriptedConnection, invoice, run, session, unwrap_outcome};
    use multitable_core::{
        ColumnMapping, InheritanceType, SqlType, StandardDialect, Value,
    };
    use multitable_query::Expr;

    fn statement() -> BulkInsert {
        BulkInsert::values("Invoice", ["id", "status", "note"])
            .row(vec![Expr::lit(1_i64), Expr::lit("OPEN"), Expr::param(1)])
            .row(vec![Expr::lit(2_i64), Expr::lit("OPEN"), Expr::param(2)])
    }

    #[test]
    fn layout_spreads_columns_over_tables() {
        let layout = InsertLayout::new(&invoice(), &statement()).expect("valid insert");
        let tables: Vec<(&str, Vec<&str>, Vec<&str>)> = layout
            .tables()
            .iter()
            .map(|t| (t.table.name(), t.table_columns(), t.source_columns()))
            .collect();
        assert_eq!(
            tables,
            [
                ("invoice", vec!["id", "status"], vec!["id", "status"]),
                ("invoice_detail", vec!["invoice_id", "note"], vec!["id", "note"]),
            ]
        );
    }

    #[test]
    fn optional_tables_without_values_get_no_row() {
        let target = MutationTarget::builder("Invoice")
            .inheritance(InheritanceType::Joined)
            .identifier(ColumnMapping::new("id", SqlType::BigInt))
            .table(TableMapping::new("invoice", ["id"]).column(ColumnMapping::new("status", SqlType::VarChar(20))))
            .table(
                TableMapping::new("invoice_extra", ["invoice_id"])
                    .column(ColumnMapping::new("memo", SqlType::Text))
                    .optional(),
            )
            .build()
            .expect("valid mapping");
        let insert = BulkInsert::values("Invoice", ["id", "status"]).row(vec![Expr::lit(1_i64), Expr::lit("OPEN")]);
        let layout = InsertLayout::new(&target, &insert).expect("valid insert");
        assert_eq!(layout.tables().len(), 1);
    }

    #[test]
    fn invalid_inserts_are_rejected() {
        let target = invoice();
        let missing_id = BulkInsert::values("Invoice", ["status"]).row(vec![Expr::lit("OPEN")]);
        assert!(matches!(InsertLayout::new(&target, &missing_id), Err(Error::Mapping(_))));
        let unknown = BulkInsert::values("Invoice", ["id", "colour"]).row(vec![Expr::lit(1_i64), Expr::lit("red")]);
        assert!(InsertLayout::new(&target, &unknown).is_err());

        let ragged = BulkInsert::values("Invoice", ["id", "status"]).row(vec![Expr::lit(1_i64)]);
        assert!(render_source(&ragged, &["id", "status"], &[], &[]).is_err());
        let empty = BulkInsert::values("Invoice", ["id"]);
        assert!(render_source(&empty, &["id"], &[], &[]).is_err());
    }

    #[test]
    fn select_source_keeps_textual_parameter_order() {
        let insert = BulkInsert::select(
            "Invoice",
            ["id", "status"],
            "legacy_invoice",
            "l",
            vec![Expr::col("legacy_id"), Expr::param(1)],
        )
        .filter(Expr::col("imported").eq(Expr::param(2)));
        let (sql, parameters) = render_source(
            &insert,
            &["status", "id"],
            &[("session_id".into(), "?".into())],
            &[ParameterSpec::SessionUid],
        )
        .expect("valid source");
        assert_eq!(sql, "select ?, legacy_id, ? from legacy_invoice l where imported = ?");
        assert_eq!(
            parameters,
            vec![ParameterSpec::Ordinal(1), ParameterSpec::SessionUid, ParameterSpec::Ordinal(2)]
        );
    }

    fn handler(strategy: &BulkIdStrategy) -> TableBasedInsertHandler {
        let target = invoice();
        TableBasedInsertHandler::new(
            Arc::clone(&target),
            Arc::new(StandardDialect::Generic),
            &statement(),
            strategy.staging_table(&target).expect("multi-table entity"),
            strategy.hooks(),
            false,
        )
        .expect("valid insert")
    }

    #[test]
    fn persistent_insert_statements() {
        let handler = handler(&BulkIdStrategy::Persistent(TableStrategyOptions::default()));
        assert_eq!(
            handler.sql_statements(),
            [
                "insert into hte_invoice (id, status, note, session_id) values (1, 'OPEN', ?, ?), (2, 'OPEN', ?, ?)",
                "insert into invoice (id, status) select id, status from hte_invoice where session_id = ?",
                "insert into invoice_detail (invoice_id, note) select id, note from hte_invoice where session_id = ?",
                "delete from hte_invoice where session_id = ?",
            ]
        );
    }

    #[test]
    fn insert_reports_root_rows() {
        let handler = handler(&BulkIdStrategy::Persistent(TableStrategyOptions::default()));
        let conn = ScriptedConnection::new()
            .affects("insert into hte_invoice", 2)
            .affects("insert into invoice ", 2)
            .affects("insert into invoice_detail", 2);
        let session = session(&conn);
        let query = QueryParameterBindings::positional(["first", "second"]);
        let count = run(async {
            let cx = Cx::for_testing();
            unwrap_outcome(handler.execute(&cx, &session, &query).await)
        });
        assert_eq!(count, 2);
        let uid = Value::Text(session.session_uid().to_string());
        assert_eq!(
            conn.bound()[0],
            vec![
                Value::Text("first".into()),
                uid.clone(),
                Value::Text("second".into()),
                uid
            ]
        );
    }

    #[test]
    fn global_staging_rows_are_always_cleaned() {
        let handler = handler(&BulkIdStrategy::GlobalTemporary(TableStrategyOptions::default()));
        assert_eq!(
            handler.sql_statements().last().map(String::as_str),
            Some("delete from hte_invoice")
        );
    }
}
