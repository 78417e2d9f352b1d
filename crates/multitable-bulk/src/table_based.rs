//! Bulk UPDATE and DELETE through an id table.
//!
//! The matching ids are inserted into the id table with one
//! `insert ... select`, then every affected table is mutated with its keys
//! restricted to the staged ids. The id table is prepared before and
//! released after the operation according to the strategy's hooks.

use crate::execute::{execute_quietly, execute_update};
use crate::matching::{MatchingIdSelector, id_table_restriction};
use crate::plan::{PendingMutation, delete_plan, statement_comment, update_plan};
use crate::session::BulkSession;
use crate::strategy::{StagingHooks, before_use_statement, release_statement};
use multitable_core::{Connection, Cx, Dialect, Error, MutationTarget, Outcome, Result};
use multitable_query::{
    BindingContext, BulkDelete, BulkUpdate, Expr, MutationKind, QueryParameterBindings,
    RenderedSql,
};
use multitable_schema::IdTableMapping;
use std::sync::Arc;

/// The statements of one staged bulk operation, borrowed from its handler.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StagedStatements<'a> {
    pub before_use: Option<&'a RenderedSql>,
    pub stage: &'a RenderedSql,
    pub mutations: &'a [RenderedSql],
    pub release: Option<&'a RenderedSql>,
    /// Report the rows affected by this mutation instead of the staged count.
    pub result_index: Option<usize>,
}

impl StagedStatements<'_> {
    /// Prepare, stage, mutate, release. The release statement runs whatever
    /// the outcome of the rest.
    pub(crate) async fn execute<C: Connection>(
        self,
        cx: &Cx,
        session: &BulkSession<C>,
        dialect: &dyn Dialect,
        query: &QueryParameterBindings,
    ) -> Outcome<u64, Error> {
        let bindings = BindingContext::for_query(query).with_session_uid(session.session_uid());
        let conn = session.connection();
        if let Some(before) = self.before_use {
            execute_quietly(cx, conn, dialect, before, bindings, "prepare id table").await;
        }
        let outcome = self.mutate(cx, conn, dialect, bindings).await;
        if let Some(release) = self.release {
            execute_quietly(cx, conn, dialect, release, bindings, "release id table").await;
        }
        outcome
    }

    async fn mutate<C: Connection>(
        self,
        cx: &Cx,
        conn: &C,
        dialect: &dyn Dialect,
        bindings: BindingContext<'_>,
    ) -> Outcome<u64, Error> {
        let staged =
            match execute_update(cx, conn, dialect, self.stage, bindings, "stage matching rows").await {
                Outcome::Ok(n) => n,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
        tracing::debug!(rows = staged, "staged matching rows");
        if staged == 0 {
            return Outcome::Ok(0);
        }

        let mut reported = staged;
        for (index, statement) in self.mutations.iter().enumerate() {
            let affected =
                match execute_update(cx, conn, dialect, statement, bindings, "bulk table mutation").await {
                    Outcome::Ok(n) => n,
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                };
            tracing::trace!(rows = affected, sql = %statement.sql, "table mutated");
            if self.result_index == Some(index) {
                reported = affected;
            }
        }
        Outcome::Ok(reported)
    }

    pub(crate) fn sql(&self) -> Vec<String> {
        self.before_use
            .into_iter()
            .chain(Some(self.stage))
            .chain(self.mutations)
            .chain(self.release)
            .map(|s| s.sql.clone())
            .collect()
    }
}

/// Handler for UPDATE and DELETE of entities spanning several tables.
#[derive(Debug)]
pub struct TableBasedHandler {
    kind: MutationKind,
    target: Arc<MutationTarget>,
    dialect: Arc<dyn Dialect>,
    id_table: IdTableMapping,
    hooks: StagingHooks,
    before_use: Option<RenderedSql>,
    id_insert: RenderedSql,
    mutations: Vec<RenderedSql>,
    release: Option<RenderedSql>,
}

impl TableBasedHandler {
    pub fn update(
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        statement: &BulkUpdate,
        id_table: IdTableMapping,
        hooks: StagingHooks,
        use_sql_comments: bool,
    ) -> Result<Self> {
        let comment = statement_comment(MutationKind::Update, &target, use_sql_comments);
        let plan = update_plan(&target, statement, comment.as_deref())?;
        Ok(Self::assemble(
            MutationKind::Update,
            target,
            dialect,
            &statement.alias,
            statement.predicate.as_ref(),
            &plan,
            id_table,
            hooks,
        ))
    }

    pub fn delete(
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        statement: &BulkDelete,
        id_table: IdTableMapping,
        hooks: StagingHooks,
        use_sql_comments: bool,
    ) -> Result<Self> {
        let comment = statement_comment(MutationKind::Delete, &target, use_sql_comments);
        let plan = delete_plan(&target, comment.as_deref())?;
        Ok(Self::assemble(
            MutationKind::Delete,
            target,
            dialect,
            &statement.alias,
            statement.predicate.as_ref(),
            &plan,
            id_table,
            hooks,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        kind: MutationKind,
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        alias: &str,
        predicate: Option<&Expr>,
        plan: &[PendingMutation],
        id_table: IdTableMapping,
        hooks: StagingHooks,
    ) -> Self {
        let id_insert = {
            let selector = MatchingIdSelector::new(&target, dialect.as_ref(), alias);
            let where_clause = selector.compile_restriction(predicate);
            selector.id_selection(&where_clause, kind, &id_table, &hooks)
        };
        let mutations = plan
            .iter()
            .filter_map(|pending| {
                let (restriction, parameters) = id_table_restriction(
                    pending.key_columns(),
                    &id_table,
                    &pending.referenced_column_names(),
                    &hooks,
                );
                pending.restrict(&restriction, parameters, dialect.as_ref())
            })
            .collect();
        let before_use = before_use_statement(&id_table, hooks.before_use, dialect.as_ref());
        let release = release_statement(&id_table, hooks.after_use, dialect.as_ref());
        tracing::debug!(
            entity = target.entity_name(),
            kind = %kind,
            id_table = id_table.qualified_name(),
            "built table-based bulk handler"
        );
        Self {
            kind,
            target,
            dialect,
            id_table,
            hooks,
            before_use,
            id_insert,
            mutations,
            release,
        }
    }

    pub fn mutation_target(&self) -> &MutationTarget {
        &self.target
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn id_table(&self) -> &IdTableMapping {
        &self.id_table
    }

    pub fn hooks(&self) -> &StagingHooks {
        &self.hooks
    }

    /// The `insert ... select` that stages the matching ids.
    pub fn id_insert(&self) -> &RenderedSql {
        &self.id_insert
    }

    /// One statement per affected table, in execution order.
    pub fn mutations(&self) -> &[RenderedSql] {
        &self.mutations
    }

    fn staged(&self) -> StagedStatements<'_> {
        StagedStatements {
            before_use: self.before_use.as_ref(),
            stage: &self.id_insert,
            mutations: &self.mutations,
            release: self.release.as_ref(),
            result_index: None,
        }
    }

    pub fn sql_statements(&self) -> Vec<String> {
        self.staged().sql()
    }

    /// Returns the number of matched entities.
    #[tracing::instrument(level = "debug", skip(self, cx, session, query), fields(entity = %self.target.entity_name(), kind = %self.kind))]
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
    use crate::testing::{ScriptedConnection, invoice, run, session, tagged_invoice, unwrap_outcome};
    use multitable_core::{Cx, StandardDialect, Value};
    use multitable_query::ParameterSpec;

    fn persistent() -> BulkIdStrategy {
        BulkIdStrategy::Persistent(TableStrategyOptions::default())
    }

    fn handler_for_update(strategy: &BulkIdStrategy, dialect: Arc<dyn Dialect>) -> TableBasedHandler {
        let target = invoice();
        let statement = BulkUpdate::new("Invoice", "i")
            .set("note", Expr::param(1))
            .filter(Expr::col("status").eq(Expr::param(2)));
        TableBasedHandler::update(
            Arc::clone(&target),
            dialect,
            &statement,
            strategy.id_table(&target).expect("multi-table entity"),
            strategy.hooks(),
            false,
        )
        .expect("valid update")
    }

    #[test]
    fn persistent_update_statements() {
        let handler = handler_for_update(&persistent(), Arc::new(StandardDialect::Generic));
        assert_eq!(
            handler.sql_statements(),
            [
                "insert into ht_invoice (id, session_id) select i.id, ? from invoice i inner join invoice_detail i_1 on i.id = i_1.invoice_id where i.status = ?",
                "update invoice_detail set note = ? where invoice_id in (select id from ht_invoice where session_id = ?)",
                "delete from ht_invoice where session_id = ?",
            ]
        );
        assert_eq!(
            handler.id_insert().parameters,
            vec![ParameterSpec::SessionUid, ParameterSpec::Ordinal(2)]
        );
        assert_eq!(
            handler.mutations()[0].parameters,
            vec![ParameterSpec::Ordinal(1), ParameterSpec::SessionUid]
        );
    }

    #[test]
    fn update_reports_matched_rows_and_binds_session() {
        let handler = handler_for_update(&persistent(), Arc::new(StandardDialect::Generic));
        let conn = ScriptedConnection::new().affects("insert into ht_invoice", 3);
        let session = session(&conn);
        let query = QueryParameterBindings::positional(["checked", "OPEN"]);
        let count = run(async {
            let cx = Cx::for_testing();
            unwrap_outcome(handler.execute(&cx, &session, &query).await)
        });
        assert_eq!(count, 3);
        let uid = Value::Text(session.session_uid().to_string());
        let bound = conn.bound();
        assert_eq!(bound[0], vec![uid.clone(), Value::Text("OPEN".into())]);
        assert_eq!(bound[1], vec![Value::Text("checked".into()), uid.clone()]);
        assert_eq!(bound[2], vec![uid]);
    }

    #[test]
    fn nothing_staged_skips_mutations_but_still_releases() {
        let handler = handler_for_update(&persistent(), Arc::new(StandardDialect::Generic));
        let conn = ScriptedConnection::new().affects("insert into ht_invoice", 0);
        let session = session(&conn);
        let query = QueryParameterBindings::positional(["checked", "OPEN"]);
        let count = run(async {
            let cx = Cx::for_testing();
            unwrap_outcome(handler.execute(&cx, &session, &query).await)
        });
        assert_eq!(count, 0);
        let executed = conn.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[1].starts_with("delete from ht_invoice"));
    }

    #[test]
    fn failure_propagates_after_release() {
        let handler = handler_for_update(&persistent(), Arc::new(StandardDialect::Generic));
        let conn = ScriptedConnection::new().fails_on("update invoice_detail");
        let session = session(&conn);
        let query = QueryParameterBindings::positional(["checked", "OPEN"]);
        let outcome = run(async {
            let cx = Cx::for_testing();
            handler.execute(&cx, &session, &query).await
        });
        match outcome {
            Outcome::Err(e) => {
                assert!(e.is_constraint_violation());
                assert!(e.sql().is_some_and(|sql| sql.starts_with("update invoice_detail")));
            }
            other => std::panic::panic_any(format!("expected failure, got {other:?}")),
        }
        assert_eq!(
            conn.executed().last().map(String::as_str),
            Some("delete from ht_invoice where session_id = ?")
        );
    }

    #[test]
    fn local_temporary_creates_and_cleans_per_use() {
        let strategy = BulkIdStrategy::LocalTemporary(TableStrategyOptions::default());
        let handler = handler_for_update(&strategy, Arc::new(StandardDialect::Mysql));
        let sql = handler.sql_statements();
        assert_eq!(sql[0], "create temporary table if not exists ht_invoice (id bigint not null)");
        assert_eq!(sql.last().map(String::as_str), Some("delete from ht_invoice"));

        let conn = ScriptedConnection::new().fails_on("create temporary table");
        let session = session(&conn);
        let query = QueryParameterBindings::positional(["checked", "OPEN"]);
        let count = run(async {
            let cx = Cx::for_testing();
            unwrap_outcome(handler.execute(&cx, &session, &query).await)
        });
        assert_eq!(count, 1);
        assert_eq!(conn.executed().len(), 4);
    }

    #[test]
    fn global_temporary_delete_with_collection() {
        let strategy = BulkIdStrategy::GlobalTemporary(TableStrategyOptions::default());
        let target = tagged_invoice();
        let statement = BulkDelete::new("Invoice", "i").filter(Expr::col("status").eq("VOID"));
        let handler = TableBasedHandler::delete(
            Arc::clone(&target),
            Arc::new(StandardDialect::Oracle),
            &statement,
            strategy.id_table(&target).expect("multi-table entity"),
            strategy.hooks(),
            true,
        )
        .expect("valid delete");
        assert_eq!(
            handler.sql_statements(),
            [
                "insert into ht_invoice (id, number) select i.id, i.number from invoice i inner join invoice_detail i_1 on i.id = i_1.invoice_id where i.status = 'VOID'",
                "/* bulk delete Invoice */ delete from invoice_tag where invoice_number in (select number from ht_invoice)",
                "/* bulk delete Invoice */ delete from invoice_detail where invoice_id in (select id from ht_invoice)",
                "/* bulk delete Invoice */ delete from invoice where id in (select id from ht_invoice)",
            ]
        );
    }
}
