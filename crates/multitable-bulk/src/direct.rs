//! Bulk mutations that need no staging: the user restriction is applied to
//! each statement directly.
//!
//! Used for entities mapped to a single table, and for INSERT under the
//! inline strategy, where every table receives the statement's source.

use crate::execute::execute_update;
use crate::insert::{InsertLayout, render_source};
use crate::matching::{MatchingIdSelector, key_in_subquery};
use crate::plan::{delete_plan, statement_comment, update_plan};
use crate::session::BulkSession;
use multitable_core::{Connection, Cx, Dialect, Error, MutationTarget, Outcome, Result};
use multitable_query::{
    BindingContext, BulkDelete, BulkInsert, BulkUpdate, MutationKind, QueryParameterBindings,
    RenderedSql,
};
use std::sync::Arc;

/// Handler issuing one statement per table without matching ids first.
#[derive(Debug)]
pub struct DirectHandler {
    kind: MutationKind,
    target: Arc<MutationTarget>,
    dialect: Arc<dyn Dialect>,
    statements: Vec<RenderedSql>,
    /// The statement whose row count is the result.
    result_index: usize,
}

impl DirectHandler {
    pub fn update(
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        statement: &BulkUpdate,
        use_sql_comments: bool,
    ) -> Result<Self> {
        let comment = statement_comment(MutationKind::Update, &target, use_sql_comments);
        let plan = update_plan(&target, statement, comment.as_deref())?;
        let restriction = {
            let selector = MatchingIdSelector::new(&target, dialect.as_ref(), target.root_table().name());
            let where_clause = selector.compile_restriction(statement.predicate.as_ref());
            selector.restriction_fragment(&where_clause)
        };
        let statements = plan
            .iter()
            .filter_map(|p| {
                p.restrict(
                    &restriction.where_fragment,
                    restriction.parameters.clone(),
                    dialect.as_ref(),
                )
            })
            .collect();
        Ok(Self {
            kind: MutationKind::Update,
            target,
            dialect,
            statements,
            result_index: 0,
        })
    }

    /// Collection rows go first, restricted by a subquery on the entity
    /// table; the entity rows last.
    pub fn delete(
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        statement: &BulkDelete,
        use_sql_comments: bool,
    ) -> Result<Self> {
        let comment = statement_comment(MutationKind::Delete, &target, use_sql_comments);
        let plan = delete_plan(&target, comment.as_deref())?;
        let restriction = {
            let selector = MatchingIdSelector::new(&target, dialect.as_ref(), target.root_table().name());
            let where_clause = selector.compile_restriction(statement.predicate.as_ref());
            selector.restriction_fragment(&where_clause)
        };
        let mut source = format!("from {}", restriction.from_fragment);
        if !restriction.where_fragment.is_empty() {
            source.push_str(" where ");
            source.push_str(&restriction.where_fragment);
        }
        let root = target.root_table().name();
        let statements: Vec<RenderedSql> = plan
            .iter()
            .filter_map(|p| {
                if p.table_name() == root {
                    p.restrict(
                        &restriction.where_fragment,
                        restriction.parameters.clone(),
                        dialect.as_ref(),
                    )
                } else {
                    let subquery =
                        key_in_subquery(p.key_columns(), &p.referenced_column_names(), &source);
                    p.restrict(&subquery, restriction.parameters.clone(), dialect.as_ref())
                }
            })
            .collect();
        let result_index = statements.len().saturating_sub(1);
        Ok(Self {
            kind: MutationKind::Delete,
            target,
            dialect,
            statements,
            result_index,
        })
    }

    /// One `insert ... <source>` per table. A SELECT source is evaluated
    /// once per table, so it must be deterministic.
    pub fn insert(
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        statement: &BulkInsert,
        use_sql_comments: bool,
    ) -> Result<Self> {
        let layout = InsertLayout::new(&target, statement)?;
        let prefix = statement_comment(MutationKind::Insert, &target, use_sql_comments)
            .map_or_else(String::new, |c| format!("/* {c} */ "));
        let statements = layout
            .tables()
            .iter()
            .map(|t| {
                let (source, parameters) = render_source(statement, &t.source_columns(), &[], &[])?;
                Ok(RenderedSql::new(
                    format!(
                        "{prefix}insert into {} ({}) {source}",
                        t.table.name(),
                        t.table_columns().join(", ")
                    ),
                    parameters,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            kind: MutationKind::Insert,
            target,
            dialect,
            statements,
            result_index: 0,
        })
    }

    pub fn mutation_target(&self) -> &MutationTarget {
        &self.target
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn statements(&self) -> &[RenderedSql] {
        &self.statements
    }

    pub fn sql_statements(&self) -> Vec<String> {
        self.statements.iter().map(|s| s.sql.clone()).collect()
    }

    #[tracing::instrument(level = "debug", skip(self, cx, session, query), fields(entity = %self.target.entity_name(), kind = %self.kind))]
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        session: &BulkSession<C>,
        query: &QueryParameterBindings,
    ) -> Outcome<u64, Error> {
        let bindings = BindingContext::for_query(query).with_session_uid(session.session_uid());
        let mut result = 0;
        for (index, statement) in self.statements.iter().enumerate() {
            let affected = match execute_update(
                cx,
                session.connection(),
                self.dialect.as_ref(),
                statement,
                bindings,
                "bulk mutation",
            )
            .await
            {
                Outcome::Ok(n) => n,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            if index == self.result_index {
                result = affected;
            }
        }
        Outcome::Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedConnection, customer, invoice, run, session, unwrap_outcome};
    use multitable_core::{StandardDialect, Value};
    use multitable_query::{Expr, ParameterSpec};

    #[test]
    fn single_table_update_is_one_statement() {
        let statement = BulkUpdate::new("Customer", "c")
            .set("active", false)
            .filter(Expr::col("name").eq(Expr::param(1)));
        let handler = DirectHandler::update(customer(), Arc::new(StandardDialect::Generic), &statement, false)
            .expect("valid update");
        assert_eq!(
            handler.sql_statements(),
            ["update customer set active = false where customer.name = ?"]
        );
        assert_eq!(handler.statements()[0].parameters, vec![ParameterSpec::Ordinal(1)]);
    }

    #[test]
    fn single_table_delete_clears_collection_first() {
        let statement = BulkDelete::new("Customer", "c").filter(Expr::col("active").eq(false));
        let handler = DirectHandler::delete(customer(), Arc::new(StandardDialect::Generic), &statement, false)
            .expect("valid delete");
        assert_eq!(
            handler.sql_statements(),
            [
                "delete from customer_tag where customer_id in (select id from customer customer where customer.active = false)",
                "delete from customer where customer.active = false",
            ]
        );

        let conn = ScriptedConnection::new()
            .affects("delete from customer_tag", 9)
            .affects("delete from customer where", 3);
        let session = session(&conn);
        let count = run(async {
            let cx = Cx::for_testing();
            unwrap_outcome(handler.execute(&cx, &session, &QueryParameterBindings::new()).await)
        });
        assert_eq!(count, 3);
    }

    #[test]
    fn inline_insert_targets_each_table() {
        let statement = BulkInsert::values("Invoice", ["id", "note", "status"])
            .row(vec![Expr::lit(3_i64), Expr::param(1), Expr::lit("OPEN")]);
        let handler = DirectHandler::insert(invoice(), Arc::new(StandardDialect::Generic), &statement, false)
            .expect("valid insert");
        assert_eq!(
            handler.sql_statements(),
            [
                "insert into invoice (id, status) values (3, 'OPEN')",
                "insert into invoice_detail (invoice_id, note) values (3, ?)",
            ]
        );

        let conn = ScriptedConnection::new();
        let session = session(&conn);
        let query = QueryParameterBindings::positional(["hello"]);
        let count = run(async {
            let cx = Cx::for_testing();
            unwrap_outcome(handler.execute(&cx, &session, &query).await)
        });
        assert_eq!(count, 1);
        assert_eq!(conn.bound()[1], vec![Value::Text("hello".into())]);
    }
}
