//! Batch creation and removal of id tables at boot and shutdown.
//!
//! Each table's statement succeeds or fails on its own; the outcome of every
//! statement is recorded in a [`DdlReport`] instead of aborting the batch,
//! since tables commonly pre-exist or are managed outside the application.

use crate::ddl::IdTableDdl;
use crate::id_table::IdTableMapping;
use multitable_core::error::{SchemaError, SchemaErrorKind};
use multitable_core::{ConnectionProvider, Cx, Dialect, Error, Outcome};

/// Per-table outcome of a DDL batch.
#[derive(Debug, Default)]
pub struct DdlReport {
    pub results: Vec<(String, Result<(), Error>)>,
    skipped: bool,
}

impl DdlReport {
    /// No statement was issued because no connection could be obtained.
    pub fn skipped() -> Self {
        Self {
            results: Vec::new(),
            skipped: true,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.results
            .iter()
            .filter_map(|(table, r)| r.as_ref().err().map(|e| (table.as_str(), e)))
    }

    pub fn is_complete(&self) -> bool {
        !self.skipped && self.results.iter().all(|(_, r)| r.is_ok())
    }
}

/// Create every id table over a single connection.
#[tracing::instrument(level = "debug", skip(cx, provider, tables, dialect))]
pub async fn export_table_definitions<P: ConnectionProvider>(
    cx: &Cx,
    provider: &P,
    tables: &[IdTableMapping],
    dialect: &dyn Dialect,
) -> Outcome<DdlReport, Error> {
    let statements = tables
        .iter()
        .map(|t| (t.qualified_name().to_string(), IdTableDdl::create_sql(t, dialect)))
        .collect();
    run_batch(cx, provider, statements, SchemaErrorKind::Create).await
}

/// Drop every id table over a single connection. Failures are recorded only.
#[tracing::instrument(level = "debug", skip(cx, provider, tables, dialect))]
pub async fn cleanup_table_definitions<P: ConnectionProvider>(
    cx: &Cx,
    provider: &P,
    tables: &[IdTableMapping],
    dialect: &dyn Dialect,
) -> Outcome<DdlReport, Error> {
    let statements = tables
        .iter()
        .map(|t| (t.qualified_name().to_string(), IdTableDdl::drop_sql(t, dialect)))
        .collect();
    run_batch(cx, provider, statements, SchemaErrorKind::Drop).await
}

/// Runs each statement through [`Connection::execute`], which prepares,
/// executes and releases it before the next one starts. DDL texts differ per
/// table, so there is no statement to reuse, and the batch still shares one
/// connection and its session.
///
/// [`Connection::execute`]: multitable_core::Connection::execute
async fn run_batch<P: ConnectionProvider>(
    cx: &Cx,
    provider: &P,
    statements: Vec<(String, String)>,
    kind: SchemaErrorKind,
) -> Outcome<DdlReport, Error> {
    use multitable_core::Connection;

    if statements.is_empty() {
        return Outcome::Ok(DdlReport::default());
    }

    let conn = match provider.acquire(cx).await {
        Outcome::Ok(conn) => conn,
        Outcome::Err(e) if e.is_unsupported_connection() => {
            tracing::info!(
                "connection provider does not support direct access, assuming id tables already exist"
            );
            return Outcome::Ok(DdlReport::skipped());
        }
        Outcome::Err(e) => {
            tracing::warn!(error = %e, "unable to obtain a connection for id table DDL, assuming id tables already exist");
            return Outcome::Ok(DdlReport::skipped());
        }
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let mut report = DdlReport::default();
    let mut interrupted = None;
    for (table, sql) in statements {
        tracing::trace!(sql = %sql, "executing id table DDL");
        match conn.execute(cx, &sql, &[]).await {
            Outcome::Ok(_) => report.results.push((table, Ok(()))),
            Outcome::Err(e) => {
                tracing::warn!(table = %table, sql = %sql, error = %e, "id table DDL failed");
                let err = Error::Schema(SchemaError {
                    kind,
                    table: Some(table.clone()),
                    message: format!("unable to execute '{sql}'"),
                    source: Some(Box::new(e)),
                });
                report.results.push((table, Err(err)));
            }
            other => {
                interrupted = Some(other);
                break;
            }
        }
    }

    match provider.release(cx, conn).await {
        Outcome::Ok(()) => {}
        Outcome::Err(e) => {
            tracing::debug!(error = %e, "ignoring failure to release DDL connection");
        }
        Outcome::Cancelled(_) | Outcome::Panicked(_) => {
            tracing::debug!("release of DDL connection interrupted");
        }
    }

    match interrupted {
        Some(Outcome::Cancelled(r)) => Outcome::Cancelled(r),
        Some(Outcome::Panicked(p)) => Outcome::Panicked(p),
        _ => {
            tracing::info!(
                executed = report.succeeded(),
                failed = report.results.len() - report.succeeded(),
                "id table DDL batch complete"
            );
            Outcome::Ok(report)
        }
    }
}
