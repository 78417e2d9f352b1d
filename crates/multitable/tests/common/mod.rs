//! In-memory stand-in for a database holding one joined entity.
//!
//! Understands exactly the statement shapes the table-based strategies
//! produce for the fixtures below: staging into `ht_invoice`, per-table
//! UPDATE/DELETE restricted by the staged ids, release, and id table DDL
//! (persistent or temporary).
//! Child tables reference their parent's id, and deleting a parent row
//! while a child row remains is a foreign key violation.

#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use multitable::Row;
use multitable::prelude::*;
use multitable_core::PreparedStatement;
use multitable_core::error::{ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const ID_TABLE: &str = "ht_invoice";

type TableRows = BTreeMap<i64, BTreeMap<String, Value>>;

#[derive(Debug, Default)]
pub struct MockState {
    pub tables: BTreeMap<String, TableRows>,
    /// `(child, parent)` foreign keys on the id column.
    pub foreign_keys: Vec<(String, String)>,
    /// Rows of the shared id table: `(id, session uid)`.
    pub staged: Vec<(i64, Option<String>)>,
    pub existing_ddl: Vec<String>,
    pub executed: Vec<(String, Vec<Value>)>,
    /// Statements that returned an error.
    pub failed: Vec<String>,
    pub unsupported_provider: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    /// `open` invoices with status OPEN followed by `paid` PAID ones, each
    /// with a detail row.
    pub fn with_invoices(open: i64, paid: i64) -> Self {
        let conn = Self::default();
        {
            let mut state = conn.state.lock().expect("lock poisoned");
            state.foreign_keys.push(("invoice_detail".into(), "invoice".into()));
            for id in 1..=open + paid {
                let status = if id <= open { "OPEN" } else { "PAID" };
                let mut root = BTreeMap::new();
                root.insert("status".to_string(), Value::Text(status.into()));
                state.tables.entry("invoice".into()).or_default().insert(id, root);
                let mut detail = BTreeMap::new();
                detail.insert("note".to_string(), Value::Null);
                state.tables.entry("invoice_detail".into()).or_default().insert(id, detail);
            }
        }
        conn
    }

    pub fn executed(&self) -> Vec<String> {
        let state = self.state.lock().expect("lock poisoned");
        state.executed.iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn bound(&self) -> Vec<Vec<Value>> {
        let state = self.state.lock().expect("lock poisoned");
        state.executed.iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn row_count(&self, table: &str) -> usize {
        let state = self.state.lock().expect("lock poisoned");
        state.tables.get(table).map_or(0, BTreeMap::len)
    }

    pub fn value(&self, table: &str, id: i64, column: &str) -> Option<Value> {
        let state = self.state.lock().expect("lock poisoned");
        state.tables.get(table)?.get(&id)?.get(column).cloned()
    }

    pub fn statuses(&self) -> Vec<String> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .tables
            .get("invoice")
            .map(|rows| {
                rows.values()
                    .filter_map(|r| r.get("status").and_then(|v| v.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rows another session left in the shared id table.
    pub fn stage_for(&self, session: &str, ids: &[i64]) {
        let mut state = self.state.lock().expect("lock poisoned");
        for id in ids {
            state.staged.push((*id, Some(session.to_string())));
        }
    }

    pub fn staged_for(&self, session: &str) -> Vec<i64> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .staged
            .iter()
            .filter(|(_, s)| s.as_deref() == Some(session))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn failed(&self) -> Vec<String> {
        self.state.lock().expect("lock poisoned").failed.clone()
    }

    fn apply(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let result = self.interpret(sql, params);
        if result.is_err() {
            let mut state = self.state.lock().expect("lock poisoned");
            state.failed.push(sql.to_string());
        }
        result
    }

    fn interpret(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.executed.push((sql.to_string(), params.to_vec()));
        let sql = strip_comment(sql);

        let create = sql
            .strip_prefix("create table ")
            .or_else(|| sql.strip_prefix("create temporary table "));
        if let Some(rest) = create {
            let (rest, if_not_exists) = match rest.strip_prefix("if not exists ") {
                Some(rest) => (rest, true),
                None => (rest, false),
            };
            let table = first_word(rest);
            if state.existing_ddl.iter().any(|t| t == table) {
                if if_not_exists {
                    return Ok(0);
                }
                return Err(database_error(&format!("table {table} already exists"), "42P07"));
            }
            state.existing_ddl.push(table.to_string());
            return Ok(0);
        }
        let drop = sql
            .strip_prefix("drop table ")
            .or_else(|| sql.strip_prefix("drop temporary table "));
        if let Some(rest) = drop {
            let table = first_word(rest);
            state.existing_ddl.retain(|t| t != table);
            return Ok(0);
        }
        if let Some(rest) = sql.strip_prefix(&format!("insert into {ID_TABLE} ")) {
            let session = rest.contains("session_id").then(|| text(params.first()));
            let ids = matching_ids(&state, rest, params);
            let staged = ids.len() as u64;
            state.staged.extend(ids.into_iter().map(|id| (id, session.clone())));
            return Ok(staged);
        }
        if let Some(rest) = sql.strip_prefix(&format!("delete from {ID_TABLE}")) {
            let before = state.staged.len();
            if rest.contains("session_id") {
                let session = text(params.last());
                state.staged.retain(|(_, s)| s.as_deref() != Some(session.as_str()));
            } else {
                state.staged.clear();
            }
            return Ok((before - state.staged.len()) as u64);
        }
        if let Some(rest) = sql.strip_prefix("update ") {
            let table = first_word(rest).to_string();
            let ids = restricted_ids(&state, sql, params);
            let assignments = assignments(sql, params);
            let rows = state.tables.entry(table).or_default();
            let mut affected = 0;
            for id in ids {
                if let Some(row) = rows.get_mut(&id) {
                    for (column, value) in &assignments {
                        row.insert(column.clone(), value.clone());
                    }
                    affected += 1;
                }
            }
            return Ok(affected);
        }
        if let Some(rest) = sql.strip_prefix("delete from ") {
            let table = first_word(rest).to_string();
            let ids = restricted_ids(&state, sql, params);
            for (child, parent) in &state.foreign_keys {
                if parent != &table {
                    continue;
                }
                let children = state.tables.get(child);
                if ids.iter().any(|id| children.is_some_and(|c| c.contains_key(id))) {
                    return Err(Error::Query(QueryError {
                        kind: QueryErrorKind::Constraint,
                        sql: None,
                        sqlstate: Some("23503".into()),
                        message: format!("{child} still references {table}"),
                        detail: None,
                        source: None,
                    }));
                }
            }
            let rows = state.tables.entry(table).or_default();
            let before = rows.len();
            rows.retain(|id, _| !ids.contains(id));
            return Ok((before - rows.len()) as u64);
        }
        Err(database_error(&format!("unsupported statement: {sql}"), "42601"))
    }
}

fn strip_comment(sql: &str) -> &str {
    match sql.strip_prefix("/* ") {
        Some(rest) => rest.split_once(" */ ").map_or(sql, |(_, s)| s),
        None => sql,
    }
}

fn first_word(s: &str) -> &str {
    s.split_whitespace().next().unwrap_or_default()
}

fn text(value: Option<&Value>) -> String {
    value.and_then(Value::as_str).unwrap_or_default().to_string()
}

fn database_error(message: &str, sqlstate: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Database,
        sql: None,
        sqlstate: Some(sqlstate.into()),
        message: message.into(),
        detail: None,
        source: None,
    })
}

/// Root rows satisfying the staging statement's `status = ...` restriction,
/// or every root row when it has none.
fn matching_ids(state: &MockState, staging: &str, params: &[Value]) -> Vec<i64> {
    let expected = staging.split_once(" where ").and_then(|(_, predicate)| {
        let (_, value) = predicate.split_once("status = ")?;
        Some(literal_or_param(value, params.last()))
    });
    state
        .tables
        .get("invoice")
        .map(|rows| {
            rows.iter()
                .filter(|(_, row)| expected.as_ref().is_none_or(|e| row.get("status") == Some(e)))
                .map(|(id, _)| *id)
                .collect()
        })
        .unwrap_or_default()
}

/// Ids staged by the session bound last, when the statement filters the
/// id table by session, otherwise all staged ids.
fn restricted_ids(state: &MockState, sql: &str, params: &[Value]) -> Vec<i64> {
    let session = sql
        .contains(&format!("from {ID_TABLE} where session_id = ?"))
        .then(|| text(params.last()));
    state
        .staged
        .iter()
        .filter(|(_, s)| session.is_none() || s.as_deref() == session.as_deref())
        .map(|(id, _)| *id)
        .collect()
}

fn assignments(sql: &str, params: &[Value]) -> Vec<(String, Value)> {
    let Some((_, rest)) = sql.split_once(" set ") else {
        return Vec::new();
    };
    let set_list = rest.split_once(" where ").map_or(rest, |(set, _)| set);
    let mut params = params.iter();
    set_list
        .split(", ")
        .filter_map(|assignment| {
            let (column, value) = assignment.split_once(" = ")?;
            let value = if value == "?" {
                params.next().cloned().unwrap_or(Value::Null)
            } else {
                literal_or_param(value, None)
            };
            Some((column.to_string(), value))
        })
        .collect()
}

fn literal_or_param(value: &str, param: Option<&Value>) -> Value {
    let value = value.trim();
    if value.starts_with('?') {
        return param.cloned().unwrap_or(Value::Null);
    }
    if let Some(quoted) = value.strip_prefix('\'') {
        return Value::Text(quoted.split('\'').next().unwrap_or_default().to_string());
    }
    match first_word(value).parse::<i64>() {
        Ok(n) => Value::BigInt(n),
        Err(_) => Value::Null,
    }
}

impl Connection for MockConnection {
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
        let result = self.apply(stmt.sql(), params);
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
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let sql = stmt.sql().to_string();
        async move { Outcome::Err(database_error(&format!("queries are not modelled: {sql}"), "0A000")) }
    }

    fn release(
        &self,
        _cx: &Cx,
        _stmt: PreparedStatement,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }
}

/// Hands out connections sharing the mock's state.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    pub conn: MockConnection,
}

impl ConnectionProvider for MockProvider {
    type Connection = MockConnection;

    fn acquire(&self, _cx: &Cx) -> impl Future<Output = Outcome<MockConnection, Error>> + Send {
        let unsupported = self.conn.state.lock().expect("lock poisoned").unsupported_provider;
        let conn = self.conn.clone();
        async move {
            if unsupported {
                Outcome::Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Unsupported,
                    message: "application supplies connections".into(),
                    source: None,
                }))
            } else {
                Outcome::Ok(conn)
            }
        }
    }

    fn release(&self, _cx: &Cx, _conn: MockConnection) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }
}

pub fn invoice() -> MutationTarget {
    MutationTarget::builder("Invoice")
        .inheritance(InheritanceType::Joined)
        .identifier(ColumnMapping::new("id", SqlType::BigInt))
        .table(TableMapping::new("invoice", ["id"]).column(ColumnMapping::new("status", SqlType::VarChar(20))))
        .table(
            TableMapping::new("invoice_detail", ["invoice_id"])
                .column(ColumnMapping::new("note", SqlType::VarChar(200))),
        )
        .build()
        .expect("valid mapping")
}

/// Factory on the generic dialect, which stages into a persistent id table.
pub fn factory() -> BulkMutationFactory {
    BulkMutationFactory::builder(Arc::new(StandardDialect::Generic))
        .entity(invoice())
        .build()
        .expect("factory")
}

pub fn run<F: Future>(future: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(future)
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}
