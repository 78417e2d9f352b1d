//! Scripted connection and fixtures shared by the handler tests.

use crate::session::BulkSession;
use asupersync::runtime::RuntimeBuilder;
use multitable_core::error::{QueryError, QueryErrorKind};
use multitable_core::{
    CollectionKind, CollectionTable, ColumnMapping, Connection, Cx, Error, InheritanceType,
    MutationTarget, Outcome, PreparedStatement, Row, SqlType, TableMapping, Value,
};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Script {
    executed: Vec<(String, Vec<Value>)>,
    affected: Vec<(String, u64)>,
    rows: Vec<(String, Vec<Row>)>,
    failures: Vec<String>,
}

/// Records every statement and answers from rules matched by substring.
/// Unmatched updates affect one row; unmatched queries return no rows.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnection {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn affects(self, fragment: &str, rows: u64) -> Self {
        self.script
            .lock()
            .expect("lock poisoned")
            .affected
            .push((fragment.to_string(), rows));
        self
    }

    pub fn returns(self, fragment: &str, rows: Vec<Row>) -> Self {
        self.script
            .lock()
            .expect("lock poisoned")
            .rows
            .push((fragment.to_string(), rows));
        self
    }

    /// Statements containing `fragment` fail with a foreign key violation.
    pub fn fails_on(self, fragment: &str) -> Self {
        self.script
            .lock()
            .expect("lock poisoned")
            .failures
            .push(fragment.to_string());
        self
    }

    pub fn executed(&self) -> Vec<String> {
        let guard = self.script.lock().expect("lock poisoned");
        guard.executed.iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn bound(&self) -> Vec<Vec<Value>> {
        let guard = self.script.lock().expect("lock poisoned");
        guard.executed.iter().map(|(_, values)| values.clone()).collect()
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<(), Error> {
        let mut guard = self.script.lock().expect("lock poisoned");
        guard.executed.push((sql.to_string(), params.to_vec()));
        if guard.failures.iter().any(|f| sql.contains(f.as_str())) {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Constraint,
                sql: None,
                sqlstate: Some("23503".into()),
                message: "foreign key violation".into(),
                detail: None,
                source: None,
            }));
        }
        Ok(())
    }
}

impl Connection for ScriptedConnection {
    fn prepare(
        &self,
        _cx: &Cx,
        sql: &str,
    ) -> impl Future<Output = Outcome<PreparedStatement, Error>> + Send {
        let sql = sql.to_string();
        async move { Outcome::Ok(PreparedStatement::new(1, sql, 0)) }
    }

    fn execute_prepared(
        &self,
        _cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.record(stmt.sql(), params).map(|()| {
            let guard = self.script.lock().expect("lock poisoned");
            guard
                .affected
                .iter()
                .find(|(f, _)| stmt.sql().contains(f.as_str()))
                .map_or(1, |(_, n)| *n)
        });
        async move {
            match result {
                Ok(n) => Outcome::Ok(n),
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn query_prepared(
        &self,
        _cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.record(stmt.sql(), params).map(|()| {
            let guard = self.script.lock().expect("lock poisoned");
            guard
                .rows
                .iter()
                .find(|(f, _)| stmt.sql().contains(f.as_str()))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default()
        });
        async move {
            match result {
                Ok(rows) => Outcome::Ok(rows),
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn release(
        &self,
        _cx: &Cx,
        _stmt: PreparedStatement,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }
}

pub fn session(conn: &ScriptedConnection) -> BulkSession<ScriptedConnection> {
    BulkSession::with_session_uid(conn.clone(), "4f1c2b9e-0000-4000-8000-000000000001")
}

pub fn run<F: Future>(future: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(future)
}

pub fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

pub fn id_rows(ids: &[i64]) -> Vec<Row> {
    ids.iter()
        .map(|id| Row::new(vec!["id".into()], vec![Value::BigInt(*id)]))
        .collect()
}

pub fn count_row(count: i64) -> Vec<Row> {
    vec![Row::new(vec!["count".into()], vec![Value::BigInt(count)])]
}

/// Joined entity: `invoice` root and `invoice_detail` subclass table.
pub fn invoice() -> Arc<MutationTarget> {
    Arc::new(
        MutationTarget::builder("Invoice")
            .inheritance(InheritanceType::Joined)
            .identifier(ColumnMapping::new("id", SqlType::BigInt))
            .table(
                TableMapping::new("invoice", ["id"])
                    .column(ColumnMapping::new("status", SqlType::VarChar(20)))
                    .column(ColumnMapping::new("number", SqlType::VarChar(30))),
            )
            .table(
                TableMapping::new("invoice_detail", ["invoice_id"])
                    .column(ColumnMapping::new("note", SqlType::VarChar(200))),
            )
            .build()
            .expect("valid mapping"),
    )
}

/// [`invoice`] with an element collection keyed by the invoice number.
pub fn tagged_invoice() -> Arc<MutationTarget> {
    Arc::new(
        MutationTarget::builder("Invoice")
            .inheritance(InheritanceType::Joined)
            .identifier(ColumnMapping::new("id", SqlType::BigInt))
            .table(
                TableMapping::new("invoice", ["id"])
                    .column(ColumnMapping::new("status", SqlType::VarChar(20)))
                    .column(ColumnMapping::new("number", SqlType::VarChar(30))),
            )
            .table(
                TableMapping::new("invoice_detail", ["invoice_id"])
                    .column(ColumnMapping::new("note", SqlType::VarChar(200))),
            )
            .collection(
                CollectionTable::new(
                    "Invoice.tags",
                    "invoice_tag",
                    CollectionKind::ElementCollection,
                    ["invoice_number"],
                )
                .referencing(["number"]),
            )
            .build()
            .expect("valid mapping"),
    )
}

/// Single-table entity.
pub fn customer() -> Arc<MutationTarget> {
    Arc::new(
        MutationTarget::builder("Customer")
            .identifier(ColumnMapping::new("id", SqlType::BigInt))
            .table(
                TableMapping::new("customer", ["id"])
                    .column(ColumnMapping::new("name", SqlType::VarChar(100)))
                    .column(ColumnMapping::new("active", SqlType::Boolean)),
            )
            .collection(CollectionTable::new(
                "Customer.tags",
                "customer_tag",
                CollectionKind::ElementCollection,
                ["customer_id"],
            ))
            .build()
            .expect("valid mapping"),
    )
}
