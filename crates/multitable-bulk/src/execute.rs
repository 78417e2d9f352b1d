//! Execution of compiled statements.
//!
//! Parameters are resolved, `?` markers are replaced with the dialect's
//! placeholders and the statement is prepared, run and released through
//! [`Connection::execute`] / [`Connection::query`]. Failures are converted
//! with [`Error::from_sql`] so they carry the statement text.

use multitable_core::{Connection, Cx, Dialect, Error, Outcome, Row};
use multitable_query::{BindingContext, RenderedSql, render_placeholders};

/// Run an INSERT/UPDATE/DELETE/DDL statement and return the affected rows.
pub async fn execute_update<C: Connection>(
    cx: &Cx,
    conn: &C,
    dialect: &dyn Dialect,
    statement: &RenderedSql,
    bindings: BindingContext<'_>,
    context: &str,
) -> Outcome<u64, Error> {
    let values = match bindings.resolve_all(&statement.parameters) {
        Ok(values) => values,
        Err(e) => return Outcome::Err(Error::from_sql(e, context, &statement.sql)),
    };
    let sql = render_placeholders(&statement.sql, dialect, 0);
    tracing::trace!(sql = %sql, params = values.len(), "{context}");
    match conn.execute(cx, &sql, &values).await {
        Outcome::Ok(count) => Outcome::Ok(count),
        Outcome::Err(e) => Outcome::Err(Error::from_sql(e, context, &sql)),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Run a query and return all rows.
pub async fn execute_query<C: Connection>(
    cx: &Cx,
    conn: &C,
    dialect: &dyn Dialect,
    statement: &RenderedSql,
    bindings: BindingContext<'_>,
    context: &str,
) -> Outcome<Vec<Row>, Error> {
    let values = match bindings.resolve_all(&statement.parameters) {
        Ok(values) => values,
        Err(e) => return Outcome::Err(Error::from_sql(e, context, &statement.sql)),
    };
    let sql = render_placeholders(&statement.sql, dialect, 0);
    tracing::trace!(sql = %sql, params = values.len(), "{context}");
    match conn.query(cx, &sql, &values).await {
        Outcome::Ok(rows) => Outcome::Ok(rows),
        Outcome::Err(e) => Outcome::Err(Error::from_sql(e, context, &sql)),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Run a `select count(*) ...` style query and read the first column of
/// the first row.
pub async fn execute_count<C: Connection>(
    cx: &Cx,
    conn: &C,
    dialect: &dyn Dialect,
    statement: &RenderedSql,
    bindings: BindingContext<'_>,
    context: &str,
) -> Outcome<u64, Error> {
    let rows = match execute_query(cx, conn, dialect, statement, bindings, context).await {
        Outcome::Ok(rows) => rows,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };
    match rows.first().map(|row| row.get_count(0)) {
        Some(Ok(count)) => Outcome::Ok(count),
        Some(Err(e)) => Outcome::Err(Error::from_sql(e, context, &statement.sql)),
        None => Outcome::Ok(0),
    }
}

/// Run a statement whose failure must not mask the outcome of the
/// operation it cleans up after. Cancellation is logged like a failure.
pub async fn execute_quietly<C: Connection>(
    cx: &Cx,
    conn: &C,
    dialect: &dyn Dialect,
    statement: &RenderedSql,
    bindings: BindingContext<'_>,
    context: &str,
) {
    match execute_update(cx, conn, dialect, statement, bindings, context).await {
        Outcome::Ok(_) => {}
        Outcome::Err(e) => {
            tracing::debug!(sql = %statement.sql, error = %e, "ignoring failure: {context}");
        }
        Outcome::Cancelled(_) | Outcome::Panicked(_) => {
            tracing::debug!(sql = %statement.sql, "interrupted: {context}");
        }
    }
}
