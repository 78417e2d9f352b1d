//! Bulk mutations as a single statement of data-modifying CTEs.
//!
//! The matching ids (or inserted rows) become the first CTE and every
//! table mutation references it, so nothing is staged outside the
//! statement and nothing needs cleaning up.

use crate::execute::execute_count;
use crate::insert::{InsertLayout, render_source};
use crate::matching::{MatchingIdSelector, key_in_subquery};
use crate::plan::{PendingMutation, delete_plan, statement_comment, update_plan};
use crate::session::BulkSession;
use multitable_core::{Connection, Cx, Dialect, Error, MutationTarget, Outcome, Result};
use multitable_query::{
    BindingContext, BulkDelete, BulkInsert, BulkUpdate, Expr, LockMode, MutationKind,
    QueryParameterBindings, RenderedSql,
};
use std::sync::Arc;

const IDS: &str = "ids";
const ROWS: &str = "rows";

/// Handler running a whole bulk operation as one `with ... select count(*)`.
#[derive(Debug)]
pub struct CteHandler {
    kind: MutationKind,
    target: Arc<MutationTarget>,
    dialect: Arc<dyn Dialect>,
    statement: RenderedSql,
}

impl CteHandler {
    pub fn update(
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        statement: &BulkUpdate,
        use_sql_comments: bool,
    ) -> Result<Self> {
        let plan = update_plan(&target, statement, None)?;
        Ok(Self::assemble(
            MutationKind::Update,
            target,
            dialect,
            &statement.alias,
            statement.predicate.as_ref(),
            &plan,
            use_sql_comments,
        ))
    }

    pub fn delete(
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        statement: &BulkDelete,
        use_sql_comments: bool,
    ) -> Result<Self> {
        let plan = delete_plan(&target, None)?;
        Ok(Self::assemble(
            MutationKind::Delete,
            target,
            dialect,
            &statement.alias,
            statement.predicate.as_ref(),
            &plan,
            use_sql_comments,
        ))
    }

    fn assemble(
        kind: MutationKind,
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        alias: &str,
        predicate: Option<&Expr>,
        plan: &[PendingMutation],
        use_sql_comments: bool,
    ) -> Self {
        let (mut ctes, mut parameters) = {
            let selector = MatchingIdSelector::new(&target, dialect.as_ref(), alias);
            let where_clause = selector.compile_restriction(predicate);
            let mut spec = selector.select_spec(&where_clause, kind);
            spec.lock_mode = LockMode::None;
            let columns: Vec<&str> = spec.selections.iter().map(|s| s.column.as_str()).collect();
            let ids = format!(
                "{IDS} ({}) as (select {} {})",
                columns.join(", "),
                spec.select_list(),
                spec.from_and_where()
            );
            (vec![ids], spec.parameters)
        };

        let source = format!("from {IDS}");
        for pending in plan {
            let restriction =
                key_in_subquery(pending.key_columns(), &pending.referenced_column_names(), &source);
            if let Some(rendered) = pending.restrict(&restriction, Vec::new(), dialect.as_ref()) {
                ctes.push(format!(
                    "m{} as ({} returning {})",
                    ctes.len(),
                    rendered.sql,
                    pending.key_columns().join(", ")
                ));
                parameters.extend(rendered.parameters);
            }
        }

        let sql = format!(
            "{}with {} select count(*) from {IDS}",
            comment_prefix(kind, &target, use_sql_comments),
            ctes.join(", ")
        );
        Self {
            kind,
            target,
            dialect,
            statement: RenderedSql::new(sql, parameters),
        }
    }

    pub fn insert(
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        statement: &BulkInsert,
        use_sql_comments: bool,
    ) -> Result<Self> {
        let layout = InsertLayout::new(&target, statement)?;
        let columns: Vec<&str> = statement.columns.iter().map(String::as_str).collect();
        let (source, parameters) = render_source(statement, &columns, &[], &[])?;

        let mut ctes = vec![format!("{ROWS} ({}) as ({source})", columns.join(", "))];
        for table in layout.tables() {
            ctes.push(format!(
                "i{} as (insert into {} ({}) select {} from {ROWS})",
                ctes.len(),
                table.table.name(),
                table.table_columns().join(", "),
                table.source_columns().join(", ")
            ));
        }
        let sql = format!(
            "{}with {} select count(*) from {ROWS}",
            comment_prefix(MutationKind::Insert, &target, use_sql_comments),
            ctes.join(", ")
        );
        Ok(Self {
            kind: MutationKind::Insert,
            target,
            dialect,
            statement: RenderedSql::new(sql, parameters),
        })
    }

    pub fn mutation_target(&self) -> &MutationTarget {
        &self.target
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn statement(&self) -> &RenderedSql {
        &self.statement
    }

    pub fn sql_statements(&self) -> Vec<String> {
        vec![self.statement.sql.clone()]
    }

    #[tracing::instrument(level = "debug", skip(self, cx, session, query), fields(entity = %self.target.entity_name(), kind = %self.kind))]
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        session: &BulkSession<C>,
        query: &QueryParameterBindings,
    ) -> Outcome<u64, Error> {
        let bindings = BindingContext::for_query(query).with_session_uid(session.session_uid());
        execute_count(
            cx,
            session.connection(),
            self.dialect.as_ref(),
            &self.statement,
            bindings,
            "bulk mutation with CTEs",
        )
        .await
    }
}

fn comment_prefix(kind: MutationKind, target: &MutationTarget, enabled: bool) -> String {
    statement_comment(kind, target, enabled).map_or_else(String::new, |c| format!("/* {c} */ "))
}
