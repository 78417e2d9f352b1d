mod common;

use asupersync::Cx;
use common::{MockConnection, factory, run, unwrap_outcome};
use multitable::prelude::*;

fn delete_open_invoices() -> BulkDelete {
    BulkDelete::new("Invoice", "i").filter(Expr::col("status").eq(Expr::param(1)))
}

#[test]
fn deleting_open_invoices_removes_details_first() {
    let factory = factory();
    let handler = factory.delete_handler(&delete_open_invoices()).expect("handler");
    let conn = MockConnection::with_invoices(5, 2);
    let session = BulkSession::with_session_uid(conn.clone(), "s-1");

    let deleted = run(async {
        let cx = Cx::for_testing();
        let query = QueryParameterBindings::positional(["OPEN"]);
        unwrap_outcome(handler.execute(&cx, &session, &query).await)
    });

    assert_eq!(deleted, 5);
    assert_eq!(
        conn.executed(),
        [
            "insert into ht_invoice (id, session_id) select i.id, ? from invoice i inner join invoice_detail i_1 on i.id = i_1.invoice_id where i.status = ?",
            "delete from invoice_detail where invoice_id in (select id from ht_invoice where session_id = ?)",
            "delete from invoice where id in (select id from ht_invoice where session_id = ?)",
            "delete from ht_invoice where session_id = ?",
        ]
    );
    assert_eq!(conn.row_count("invoice"), 2);
    assert_eq!(conn.row_count("invoice_detail"), 2);
    assert_eq!(conn.statuses(), ["PAID", "PAID"]);
}

#[test]
fn parent_first_order_is_rejected_by_the_foreign_key() {
    let factory = factory();
    let handler = factory.delete_handler(&delete_open_invoices()).expect("handler");
    let statements = handler.sql_statements();
    let conn = MockConnection::with_invoices(2, 0);
    let uid = Value::Text("s-1".into());

    let outcome = run(async {
        let cx = Cx::for_testing();
        unwrap_outcome(
            conn.execute(&cx, &statements[0], &[uid.clone(), Value::Text("OPEN".into())])
                .await,
        );
        // Root before detail, the reverse of the handler's order.
        conn.execute(&cx, &statements[2], &[uid.clone()]).await
    });

    match outcome {
        Outcome::Err(e) => assert!(e.is_constraint_violation()),
        other => panic!("expected a foreign key violation, got {other:?}"),
    }
    assert_eq!(conn.row_count("invoice"), 2);
}

#[test]
fn failed_delete_still_releases_staged_rows() {
    let factory = factory();
    let handler = factory.delete_handler(&delete_open_invoices()).expect("handler");
    let conn = MockConnection::with_invoices(3, 0);
    {
        // A child table the mapping does not know about keeps the rows alive.
        let mut state = conn.state.lock().expect("lock poisoned");
        state.foreign_keys.push(("payment".into(), "invoice".into()));
        state.tables.entry("payment".into()).or_default().insert(2, Default::default());
    }
    let session = BulkSession::with_session_uid(conn.clone(), "s-1");

    let outcome = run(async {
        let cx = Cx::for_testing();
        let query = QueryParameterBindings::positional(["OPEN"]);
        handler.execute(&cx, &session, &query).await
    });

    match outcome {
        Outcome::Err(e) => {
            assert!(e.is_constraint_violation());
        }
        other => panic!("expected a foreign key violation, got {other:?}"),
    }
    assert!(conn.staged_for("s-1").is_empty());
    assert_eq!(
        conn.executed().last().map(String::as_str),
        Some("delete from ht_invoice where session_id = ?")
    );
}

#[test]
fn sessions_deleting_concurrently_keep_their_own_ids() {
    let factory = factory();
    let handler = factory.delete_handler(&delete_open_invoices()).expect("handler");
    let conn = MockConnection::with_invoices(2, 2);
    conn.stage_for("other", &[1, 2, 3, 4]);

    let session = BulkSession::with_session_uid(conn.clone(), "mine");
    let deleted = run(async {
        let cx = Cx::for_testing();
        let query = QueryParameterBindings::positional(["PAID"]);
        unwrap_outcome(handler.execute(&cx, &session, &query).await)
    });

    assert_eq!(deleted, 2);
    assert_eq!(conn.statuses(), ["OPEN", "OPEN"]);
    assert_eq!(conn.staged_for("other"), [1, 2, 3, 4]);
}

#[test]
fn interleaved_sessions_release_only_their_own_rows() {
    let factory = factory();
    let by_status = BulkDelete::new("Invoice", "i").filter(Expr::col("status").eq(Expr::param(1)));
    let handler = factory.delete_handler(&by_status).expect("handler");
    let [stage, delete_detail, delete_root, release] = <[String; 4]>::try_from(handler.sql_statements())
        .expect("stage, two deletes, release");
    let conn = MockConnection::with_invoices(3, 2);
    let a = Value::Text("session-a".into());
    let b = Value::Text("session-b".into());

    run(async {
        let cx = Cx::for_testing();
        let (cx, conn) = (&cx, &conn);
        let exec = move |sql: &str, params: Vec<Value>| {
            let sql = sql.to_string();
            async move { unwrap_outcome(conn.execute(cx, &sql, &params).await) }
        };

        assert_eq!(exec(&stage, vec![a.clone(), "OPEN".into()]).await, 3);
        assert_eq!(exec(&stage, vec![b.clone(), "PAID".into()]).await, 2);

        assert_eq!(exec(&delete_detail, vec![a.clone()]).await, 3);
        assert_eq!(exec(&delete_root, vec![a.clone()]).await, 3);
        assert_eq!(exec(&release, vec![a.clone()]).await, 3);
        assert!(conn.staged_for("session-a").is_empty());
        assert_eq!(conn.staged_for("session-b"), [4, 5]);
        assert_eq!(conn.statuses(), ["PAID", "PAID"]);

        assert_eq!(exec(&delete_detail, vec![b.clone()]).await, 2);
        assert_eq!(conn.staged_for("session-b"), [4, 5]);
        assert_eq!(exec(&delete_root, vec![b.clone()]).await, 2);
        assert_eq!(exec(&release, vec![b.clone()]).await, 2);
    });

    assert_eq!(conn.row_count("invoice"), 0);
    assert_eq!(conn.row_count("invoice_detail"), 0);
    assert!(conn.state.lock().expect("lock poisoned").staged.is_empty());
}
