//! Database connection traits.
//!
//! - [`Connection`] - prepare/execute/release of statements
//! - [`PreparedStatement`] - a statement handle scoped to one use
//! - [`ConnectionProvider`] - hands out connections for id table DDL
//!
//! All operations integrate with asupersync's structured concurrency via `Cx` context
//! for proper cancellation and timeout handling.

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// A prepared statement.
///
/// Every statement issued by a bulk operation is prepared immediately
/// before use and released before the next one is prepared.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Unique identifier for this prepared statement (driver-specific)
    id: u64,
    /// The SQL text
    sql: String,
    /// Number of expected parameters
    param_count: usize,
}

impl PreparedStatement {
    /// Create a new prepared statement.
    ///
    /// This is typically called by the driver, not by users directly.
    #[must_use]
    pub fn new(id: u64, sql: String, param_count: usize) -> Self {
        Self {
            id,
            sql,
            param_count,
        }
    }

    /// Get the statement ID.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Get the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Get the expected number of parameters.
    #[must_use]
    pub const fn param_count(&self) -> usize {
        self.param_count
    }

    /// Check if the provided parameters match the expected count.
    #[must_use]
    pub fn validate_params(&self, params: &[Value]) -> bool {
        params.len() == self.param_count
    }
}

/// A database connection capable of executing statements.
///
/// All operations are async and take a `Cx` context for cancellation/timeout support.
/// Implementations must be `Send + Sync` for use across async boundaries.
pub trait Connection: Send + Sync {
    /// Prepare a statement.
    fn prepare(
        &self,
        cx: &Cx,
        sql: &str,
    ) -> impl Future<Output = Outcome<PreparedStatement, Error>> + Send;

    /// Execute a prepared statement (INSERT, UPDATE, DELETE, DDL) and return rows affected.
    fn execute_prepared(
        &self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Execute a prepared statement and return all rows.
    fn query_prepared(
        &self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Release (close) a prepared statement.
    fn release(
        &self,
        cx: &Cx,
        stmt: PreparedStatement,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Prepare, execute and release a statement, returning rows affected.
    ///
    /// A failure to release is logged and discarded so it never masks the
    /// outcome of the statement itself.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let stmt = match self.prepare(cx, sql).await {
                Outcome::Ok(stmt) => stmt,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let result = self.execute_prepared(cx, &stmt, params).await;
            release_quietly(self, cx, stmt).await;
            result
        }
    }

    /// Prepare, run and release a query, returning all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async move {
            let stmt = match self.prepare(cx, sql).await {
                Outcome::Ok(stmt) => stmt,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let result = self.query_prepared(cx, &stmt, params).await;
            release_quietly(self, cx, stmt).await;
            result
        }
    }
}

async fn release_quietly<C: Connection + ?Sized>(conn: &C, cx: &Cx, stmt: PreparedStatement) {
    let id = stmt.id();
    match conn.release(cx, stmt).await {
        Outcome::Ok(()) => {}
        Outcome::Err(e) => {
            tracing::debug!(statement = id, error = %e, "ignoring statement release failure");
        }
        Outcome::Cancelled(_) | Outcome::Panicked(_) => {
            tracing::debug!(statement = id, "statement release interrupted");
        }
    }
}

/// Source of connections used for id table DDL at boot and shutdown.
///
/// A provider that cannot hand out connections (for example when the
/// application supplies its own) answers `acquire` with a
/// [`ConnectionErrorKind::Unsupported`](crate::error::ConnectionErrorKind::Unsupported)
/// error, which DDL export treats as "tables already exist".
pub trait ConnectionProvider: Send + Sync {
    /// The connection type handed out by this provider.
    type Connection: Connection;

    /// Acquire a connection.
    fn acquire(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send;

    /// Give a connection back.
    fn release(
        &self,
        cx: &Cx,
        conn: Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        prepared: Vec<String>,
        released: Vec<u64>,
        fail_release: bool,
    }

    struct LoggingConnection {
        log: Arc<Mutex<Log>>,
    }

    impl Connection for LoggingConnection {
        fn prepare(
            &self,
            _cx: &Cx,
            sql: &str,
        ) -> impl Future<Output = Outcome<PreparedStatement, Error>> + Send {
            let log = Arc::clone(&self.log);
            let sql = sql.to_string();
            async move {
                let mut guard = log.lock().expect("lock poisoned");
                guard.prepared.push(sql.clone());
                let id = guard.prepared.len() as u64;
                Outcome::Ok(PreparedStatement::new(id, sql, 0))
            }
        }

        fn execute_prepared(
            &self,
            _cx: &Cx,
            _stmt: &PreparedStatement,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            async { Outcome::Ok(3) }
        }

        fn query_prepared(
            &self,
            _cx: &Cx,
            _stmt: &PreparedStatement,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            async { Outcome::Err(Error::Custom("no rows".into())) }
        }

        fn release(
            &self,
            _cx: &Cx,
            stmt: PreparedStatement,
        ) -> impl Future<Output = Outcome<(), Error>> + Send {
            let log = Arc::clone(&self.log);
            async move {
                let mut guard = log.lock().expect("lock poisoned");
                guard.released.push(stmt.id());
                if guard.fail_release {
                    Outcome::Err(Error::Custom("close failed".into()))
                } else {
                    Outcome::Ok(())
                }
            }
        }
    }

    #[test]
    fn execute_releases_statement() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let log = Arc::new(Mutex::new(Log {
            fail_release: true,
            ..Log::default()
        }));
        let conn = LoggingConnection {
            log: Arc::clone(&log),
        };

        rt.block_on(async {
            let affected = conn.execute(&cx, "delete from t", &[]).await;
            assert!(matches!(affected, Outcome::Ok(3)));
            let rows = conn.query(&cx, "select 1", &[]).await;
            assert!(matches!(rows, Outcome::Err(_)));
        });

        let guard = log.lock().expect("lock poisoned");
        assert_eq!(guard.prepared, vec!["delete from t", "select 1"]);
        assert_eq!(guard.released, vec![1, 2]);
    }

    #[test]
    fn prepared_statement_param_validation() {
        let stmt = PreparedStatement::new(1, "update t set a = ? where id = ?".into(), 2);
        assert!(stmt.validate_params(&[Value::Int(1), Value::Int(2)]));
        assert!(!stmt.validate_params(&[Value::Int(1)]));
        assert_eq!(stmt.sql(), "update t set a = ? where id = ?");
    }
}
