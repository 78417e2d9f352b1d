//! Bulk UPDATE and DELETE with the matching ids held in memory.
//!
//! The ids are read with the matching-id query and inlined into
//! `in (...)` restrictions, split into chunks when the dialect limits the
//! size of an in-list. No auxiliary table is used.

use crate::execute::{execute_query, execute_update};
use crate::matching::MatchingIdSelector;
use crate::plan::{PendingMutation, delete_plan, statement_comment, update_plan};
use crate::session::BulkSession;
use multitable_core::value::hash_values;
use multitable_core::{Connection, Cx, Dialect, Error, MutationTarget, Outcome, Result, Row, Value};
use multitable_query::{
    BindingContext, BulkDelete, BulkUpdate, Expr, MutationKind, ParameterSpec,
    QueryParameterBindings, RenderedSql,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Handler that reads matching ids and restricts each table by id list.
#[derive(Debug)]
pub struct InlineHandler {
    kind: MutationKind,
    target: Arc<MutationTarget>,
    dialect: Arc<dyn Dialect>,
    id_query: RenderedSql,
    row_columns: Vec<String>,
    plan: Vec<PendingMutation>,
}

impl InlineHandler {
    pub fn update(
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        statement: &BulkUpdate,
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
            plan,
        ))
    }

    pub fn delete(
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        statement: &BulkDelete,
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
            plan,
        ))
    }

    fn assemble(
        kind: MutationKind,
        target: Arc<MutationTarget>,
        dialect: Arc<dyn Dialect>,
        alias: &str,
        predicate: Option<&Expr>,
        plan: Vec<PendingMutation>,
    ) -> Self {
        let (id_query, row_columns) = {
            let selector = MatchingIdSelector::new(&target, dialect.as_ref(), alias);
            let where_clause = selector.compile_restriction(predicate);
            let spec = selector.select_spec(&where_clause, kind);
            let columns = spec.selections.iter().map(|s| s.column.clone()).collect();
            (spec.render(dialect.as_ref()), columns)
        };
        Self {
            kind,
            target,
            dialect,
            id_query,
            row_columns,
            plan,
        }
    }

    pub fn mutation_target(&self) -> &MutationTarget {
        &self.target
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    /// The query reading the matching ids.
    pub fn id_query(&self) -> &RenderedSql {
        &self.id_query
    }

    /// Positions of a table's referenced columns in the id rows.
    fn row_indexes(&self, pending: &PendingMutation) -> Result<Vec<usize>> {
        pending
            .referenced_columns()
            .iter()
            .map(|c| {
                self.row_columns.iter().position(|r| r == c).ok_or_else(|| {
                    Error::mapping(
                        self.target.entity_name(),
                        format!("column '{c}' is not selected with the matching ids"),
                    )
                })
            })
            .collect()
    }

    /// The id query and each table statement restricted to one id.
    pub fn sql_statements(&self) -> Vec<String> {
        let template: Vec<Value> = self.row_columns.iter().map(|_| Value::Null).collect();
        let mut sql = vec![self.id_query.sql.clone()];
        for pending in &self.plan {
            let Ok(indexes) = self.row_indexes(pending) else {
                continue;
            };
            let (restriction, parameters) =
                in_list_restriction(pending.key_columns(), std::slice::from_ref(&template), &indexes);
            if let Some(rendered) = pending.restrict(&restriction, parameters, self.dialect.as_ref()) {
                sql.push(rendered.sql);
            }
        }
        sql
    }

    /// Returns the number of distinct matched ids.
    #[tracing::instrument(level = "debug", skip(self, cx, session, query), fields(entity = %self.target.entity_name(), kind = %self.kind))]
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        session: &BulkSession<C>,
        query: &QueryParameterBindings,
    ) -> Outcome<u64, Error> {
        let bindings = BindingContext::for_query(query).with_session_uid(session.session_uid());
        let conn = session.connection();
        let dialect = self.dialect.as_ref();

        let rows = match execute_query(cx, conn, dialect, &self.id_query, bindings, "select matching ids").await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let ids = distinct_rows(rows);
        tracing::debug!(ids = ids.len(), "read matching ids");
        if ids.is_empty() {
            return Outcome::Ok(0);
        }

        let chunk_size = match dialect.in_expression_limit() {
            0 => ids.len(),
            limit => limit,
        };
        for pending in &self.plan {
            let indexes = match self.row_indexes(pending) {
                Ok(indexes) => indexes,
                Err(e) => return Outcome::Err(e),
            };
            for chunk in ids.chunks(chunk_size) {
                let (restriction, parameters) = in_list_restriction(pending.key_columns(), chunk, &indexes);
                let Some(statement) = pending.restrict(&restriction, parameters, dialect) else {
                    continue;
                };
                match execute_update(cx, conn, dialect, &statement, bindings, "bulk table mutation").await {
                    Outcome::Ok(n) => {
                        tracing::trace!(rows = n, table = pending.table_name(), "table mutated");
                    }
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
        }
        Outcome::Ok(ids.len() as u64)
    }
}

/// `key in (?, ?)` or `(a, b) in ((?, ?), (?, ?))` binding the given rows.
fn in_list_restriction(
    key_columns: &[String],
    rows: &[Vec<Value>],
    indexes: &[usize],
) -> (String, Vec<ParameterSpec>) {
    let mut parameters = Vec::with_capacity(rows.len() * indexes.len());
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let markers: Vec<&str> = indexes
                .iter()
                .map(|i| {
                    parameters.push(ParameterSpec::Literal(row.get(*i).cloned().unwrap_or(Value::Null)));
                    "?"
                })
                .collect();
            if markers.len() == 1 {
                markers[0].to_string()
            } else {
                format!("({})", markers.join(", "))
            }
        })
        .collect();
    let keys = if key_columns.len() == 1 {
        key_columns[0].clone()
    } else {
        format!("({})", key_columns.join(", "))
    };
    (format!("{keys} in ({})", tuples.join(", ")), parameters)
}

/// Row values with duplicates removed, first occurrence kept. Joins over
/// secondary tables can return one root id several times.
fn distinct_rows(rows: Vec<Row>) -> Vec<Vec<Value>> {
    let mut ids: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
    let mut seen: HashMap<u64, Vec<usize>> = HashMap::with_capacity(rows.len());
    for row in rows {
        let values = row.into_values();
        let bucket = seen.entry(hash_values(&values)).or_default();
        if bucket.iter().any(|&i| ids[i] == values) {
            continue;
        }
        bucket.push(ids.len());
        ids.push(values);
    }
    ids
}
