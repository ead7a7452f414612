//! Integration tests against a real libsql database
//!
//! These tests drive connections, ad hoc execution and transactions through the
//! libsql driver on in-memory and temporary file databases.

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use super::test_utils::{connect_memory, memory_params, setup_test_db_with_prefix, TestDbGuard};
use crate::conn_string::ConnectParams;
use crate::connection::{clean_api, Connection, LIBSQL_DRIVER};
use crate::driver::libsql_driver::LibsqlConnection;
use crate::driver::{NativeConnection, WarningCallback};
use crate::error::Error;
use crate::models::{ExecOutcome, HostValue, NativeError, Row};

fn rows(outcome: ExecOutcome) -> Vec<Row> {
    match outcome {
        ExecOutcome::Rows(rows) => rows,
        other => panic!("expected rows, got {other:?}"),
    }
}

fn count(conn: &Connection, table: &str) -> HostValue {
    let result = rows(conn.exec(&format!("SELECT COUNT(*) AS n FROM {table}"), vec![]).unwrap());
    result[0].get("n").cloned().unwrap()
}

#[test]
fn test_select_one_returns_single_row() {
    let conn = connect_memory();
    let result = rows(conn.exec("SELECT 1 AS one", vec![]).unwrap());

    assert_eq!(result.len(), 1);
    assert_eq!(result[0].get("one"), Some(&HostValue::Int(1)));
}

#[test]
fn test_insert_reports_rows_affected() {
    let conn = connect_memory();
    assert_eq!(
        conn.exec("CREATE TABLE users (id INTEGER, name TEXT)", vec![]).unwrap(),
        ExecOutcome::NoResult
    );

    let outcome = conn
        .exec(
            "INSERT INTO users VALUES (?, ?)",
            vec![HostValue::Int(1), HostValue::Str("Alice".to_string())],
        )
        .unwrap();
    assert_eq!(outcome, ExecOutcome::RowsAffected(1));

    let outcome = conn
        .exec("UPDATE users SET name = 'Bob' WHERE id = 99", vec![])
        .unwrap();
    assert_eq!(outcome, ExecOutcome::RowsAffected(0));
}

#[test]
fn test_round_trip_of_host_values() {
    let conn = connect_memory();
    conn.exec(
        "CREATE TABLE t (i INTEGER, d DOUBLE, s NVARCHAR(40), b VARBINARY(16), n INTEGER)",
        vec![],
    )
    .unwrap();
    conn.exec(
        "INSERT INTO t VALUES (?, ?, ?, ?, ?)",
        vec![
            HostValue::Int(-42),
            HostValue::Float(2.5),
            HostValue::Str("héllo".to_string()),
            HostValue::Bytes(vec![0, 1, 2, 255]),
            HostValue::Null,
        ],
    )
    .unwrap();

    let result = rows(conn.exec("SELECT i, d, s, b, n FROM t", vec![]).unwrap());
    let row = &result[0];
    assert_eq!(row.get("i"), Some(&HostValue::Int(-42)));
    assert_eq!(row.get("d"), Some(&HostValue::Float(2.5)));
    assert_eq!(row.get("s"), Some(&HostValue::Str("héllo".to_string())));
    assert_eq!(row.get("b"), Some(&HostValue::Bytes(vec![0, 1, 2, 255])));
    assert_eq!(row.get("n"), Some(&HostValue::Null));
}

#[test]
fn test_large_integer_parameter_binds_as_double() {
    let conn = connect_memory();
    let result = rows(
        conn.exec("SELECT ? AS v", vec![HostValue::Int(10_000_000_000)])
            .unwrap(),
    );
    assert_eq!(result[0].get("v"), Some(&HostValue::Float(1e10)));
}

#[test]
fn test_rows_span_several_row_sets() {
    let conn = connect_memory();
    conn.exec("CREATE TABLE nums (n INTEGER)", vec![]).unwrap();
    for i in 0..25 {
        conn.exec("INSERT INTO nums VALUES (?)", vec![HostValue::Int(i)])
            .unwrap();
    }

    let result = rows(conn.exec("SELECT n FROM nums ORDER BY n", vec![]).unwrap());
    assert_eq!(result.len(), 25);
    assert_eq!(result[24].get("n"), Some(&HostValue::Int(24)));
}

#[test]
fn test_parameter_count_mismatch() {
    let conn = connect_memory();
    assert_eq!(
        conn.exec("SELECT ?", vec![]).unwrap_err(),
        Error::NotEnoughParameters
    );
    assert_eq!(
        conn.exec("SELECT ?", vec![HostValue::Int(1), HostValue::Int(2)])
            .unwrap_err(),
        Error::TooManyParameters
    );
}

#[test]
fn test_adhoc_exec_rejects_lob_placeholder() {
    let conn = connect_memory();
    let err = conn
        .exec("SELECT ?", vec![HostValue::LobPlaceholder { length: 3 }])
        .unwrap_err();
    assert_eq!(err, Error::Binding { index: Some(0) });
}

#[test]
fn test_native_errors_surface_verbatim() {
    let conn = connect_memory();
    let err = conn.exec("SELEC 1", vec![]).unwrap_err();
    assert!(matches!(err, Error::Native(_)), "got {err:?}");
    assert_eq!(err.sql_state().len(), 5);
}

#[test]
fn test_unique_violation_is_native_error() {
    let conn = connect_memory();
    conn.exec("CREATE TABLE u (id INTEGER PRIMARY KEY)", vec![]).unwrap();
    conn.exec("INSERT INTO u VALUES (1)", vec![]).unwrap();

    let err = conn.exec("INSERT INTO u VALUES (1)", vec![]).unwrap_err();
    assert!(matches!(err, Error::Native(_)), "got {err:?}");
}

#[test]
fn test_operations_require_connection() {
    let conn = Connection::new(ConnectParams::None);
    assert!(!conn.is_connected());
    assert_eq!(conn.exec("SELECT 1", vec![]).unwrap_err(), Error::NotConnected);
    assert_eq!(conn.prepare("SELECT 1").err(), Some(Error::NotConnected));
    assert_eq!(conn.commit().unwrap_err(), Error::NotConnected);
    assert_eq!(conn.disconnect().unwrap_err(), Error::NotConnected);
}

#[test]
fn test_disconnect_then_reconnect() {
    let conn = connect_memory();
    assert!(conn.is_connected());

    conn.disconnect().unwrap();
    assert!(!conn.is_connected());
    assert_eq!(conn.disconnect().unwrap_err(), Error::NotConnected);

    conn.connect(&memory_params()).unwrap();
    assert!(conn.is_connected());
    assert_eq!(conn.exec("SELECT 1", vec![]).map(|o| rows(o).len()), Ok(1));
}

#[test]
fn test_failed_connect_leaves_connection_unconnected() {
    let conn = Connection::new(ConnectParams::None);
    let err = conn
        .connect(&ConnectParams::Text("uid=system".to_string()))
        .unwrap_err();
    assert!(matches!(err, Error::Native(_)));
    assert!(!conn.is_connected());
}

#[test]
fn test_constructor_defaults_are_used() {
    let conn = Connection::new(ConnectParams::Pairs(vec![(
        "ServerNode".to_string(),
        ":memory:".to_string(),
    )]));
    conn.connect(&ConnectParams::None).unwrap();
    assert!(conn.is_connected());
}

#[test]
fn test_data_persists_in_file_database() {
    let db_path = setup_test_db_with_prefix("persist");
    let _guard = TestDbGuard::new(db_path.clone());
    let params = ConnectParams::Pairs(vec![(
        "ServerNode".to_string(),
        db_path.to_str().unwrap().to_string(),
    )]);

    let conn = Connection::new(params.clone());
    conn.connect(&ConnectParams::None).unwrap();
    conn.exec("CREATE TABLE kv (k TEXT, v INTEGER)", vec![]).unwrap();
    conn.exec(
        "INSERT INTO kv VALUES (?, ?)",
        vec![HostValue::Str("a".to_string()), HostValue::Int(1)],
    )
    .unwrap();
    conn.disconnect().unwrap();

    let reopened = Connection::new(params);
    reopened.connect(&ConnectParams::None).unwrap();
    assert_eq!(count(&reopened, "kv"), HostValue::Int(1));
}

#[test]
fn test_auto_commit_off_with_rollback_and_commit() {
    let conn = connect_memory();
    conn.exec("CREATE TABLE t (id INTEGER)", vec![]).unwrap();
    conn.set_auto_commit(false).unwrap();

    conn.exec("INSERT INTO t VALUES (1)", vec![]).unwrap();
    conn.rollback().unwrap();
    assert_eq!(count(&conn, "t"), HostValue::Int(0));

    conn.exec("INSERT INTO t VALUES (2)", vec![]).unwrap();
    conn.commit().unwrap();
    conn.set_auto_commit(true).unwrap();
    assert_eq!(count(&conn, "t"), HostValue::Int(1));
}

#[test]
fn test_commit_without_transaction_is_ok() {
    let conn = connect_memory();
    conn.commit().unwrap();
    conn.rollback().unwrap();
}

#[test]
fn test_client_info_before_connect() {
    let conn = Connection::new(ConnectParams::None);
    conn.set_client_info("APPLICATION", Some("tests")).unwrap();
    assert_eq!(
        conn.get_client_info("APPLICATION").unwrap(),
        Some("tests".to_string())
    );

    conn.set_client_info("APPLICATION", None).unwrap();
    assert_eq!(conn.get_client_info("APPLICATION").unwrap(), None);
    assert_eq!(conn.get_client_info("MISSING").unwrap(), None);
}

#[test]
fn test_text_longer_than_declared_size_reads_back_whole() {
    let conn = connect_memory();
    conn.exec("CREATE TABLE w (t TEXT, v VARCHAR(1))", vec![]).unwrap();
    let long = "é".repeat(3500);
    conn.exec(
        "INSERT INTO w VALUES (?, ?)",
        vec![HostValue::Str(long.clone()), HostValue::Str("abcdefgh".to_string())],
    )
    .unwrap();
    conn.exec("INSERT INTO w VALUES ('short', 'x')", vec![]).unwrap();

    let result = rows(conn.exec("SELECT t, v FROM w", vec![]).unwrap());
    assert_eq!(result[0].get("t"), Some(&HostValue::Str(long)));
    assert_eq!(result[0].get("v"), Some(&HostValue::Str("abcdefgh".to_string())));
    assert_eq!(result[1].get("t"), Some(&HostValue::Str("short".to_string())));
}

#[test]
fn test_date_column_keeps_stored_text() {
    let conn = connect_memory();
    conn.exec("CREATE TABLE d (day DATE, at TIME)", vec![]).unwrap();
    conn.exec(
        "INSERT INTO d VALUES ('2024-01-02 03:04:05', '03:04:05.123456')",
        vec![],
    )
    .unwrap();

    let result = rows(conn.exec("SELECT day, at FROM d", vec![]).unwrap());
    assert_eq!(
        result[0].get("day"),
        Some(&HostValue::Str("2024-01-02 03:04:05".to_string()))
    );
    assert_eq!(
        result[0].get("at"),
        Some(&HostValue::Str("03:04:05.123456".to_string()))
    );
}

#[test]
fn test_large_integer_round_trip() {
    let conn = connect_memory();
    conn.exec("CREATE TABLE n (i INTEGER)", vec![]).unwrap();
    for value in [5, 1_700_000_000_000, 7] {
        conn.exec("INSERT INTO n VALUES (?)", vec![HostValue::Int(value)])
            .unwrap();
    }

    let result = rows(conn.exec("SELECT i FROM n", vec![]).unwrap());
    let values: Vec<_> = result.iter().map(|r| r.get("i").cloned().unwrap()).collect();
    assert_eq!(
        values,
        vec![
            HostValue::Int(5),
            HostValue::Float(1_700_000_000_000.0),
            HostValue::Int(7)
        ]
    );
}

#[test]
fn test_undeclared_column_typed_per_value() {
    let conn = connect_memory();
    let result = rows(
        conn.exec(
            "SELECT v FROM (SELECT 1 AS v UNION ALL SELECT 'abc' UNION ALL SELECT 5000000000)",
            vec![],
        )
        .unwrap(),
    );
    let values: Vec<_> = result.iter().map(|r| r.get("v").cloned().unwrap()).collect();
    assert_eq!(
        values,
        vec![
            HostValue::Int(1),
            HostValue::Str("abc".to_string()),
            HostValue::Float(5_000_000_000.0)
        ]
    );
}

#[test]
fn test_storage_class_changes_across_row_sets() {
    let conn = connect_memory();
    conn.exec("CREATE TABLE m (i INTEGER)", vec![]).unwrap();
    for n in 0..25 {
        let value = match n {
            3 => HostValue::Str("three".to_string()),
            12 => HostValue::Float(12.5),
            20 => HostValue::Null,
            n => HostValue::Int(n),
        };
        conn.exec("INSERT INTO m VALUES (?)", vec![value]).unwrap();
    }

    let result = rows(conn.exec("SELECT i FROM m", vec![]).unwrap());
    assert_eq!(result.len(), 25);
    assert_eq!(result[2].get("i"), Some(&HostValue::Int(2)));
    assert_eq!(result[3].get("i"), Some(&HostValue::Str("three".to_string())));
    assert_eq!(result[4].get("i"), Some(&HostValue::Int(4)));
    assert_eq!(result[12].get("i"), Some(&HostValue::Float(12.5)));
    assert_eq!(result[20].get("i"), Some(&HostValue::Null));
    assert_eq!(result[24].get("i"), Some(&HostValue::Int(24)));
}

#[test]
fn test_value_outside_declared_type_raises_warning() {
    let conn = connect_memory();
    let seen: Arc<Mutex<Vec<NativeError>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: WarningCallback = Arc::new(move |w| sink.lock().unwrap().push(w.clone()));
    conn.set_warning_callback(Some(callback)).unwrap();

    conn.exec("CREATE TABLE w (i INTEGER)", vec![]).unwrap();
    conn.exec("INSERT INTO w VALUES (1), ('one'), ('two')", vec![]).unwrap();
    let result = rows(conn.exec("SELECT i FROM w", vec![]).unwrap());
    assert_eq!(result[1].get("i"), Some(&HostValue::Str("one".to_string())));

    let warnings = seen.lock().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].sql_state, "01000");
    assert!(warnings[0].message.contains("VAL32"), "{}", warnings[0].message);
}

#[test]
fn test_external_connection() {
    let mut native = LibsqlConnection::new();
    native.connect("ServerNode=:memory:").unwrap();

    let conn = Connection::new(ConnectParams::None);
    conn.connect_external(Box::new(native)).unwrap();
    assert!(conn.is_connected());
    assert_eq!(conn.exec("SELECT 2 AS two", vec![]).map(|o| rows(o).len()), Ok(1));

    conn.disconnect().unwrap();
    assert!(!conn.is_connected());
}

#[test]
fn test_clean_api_refuses_while_connections_are_open() {
    let conn = connect_memory();
    assert!(!clean_api(LIBSQL_DRIVER.as_ref()));
    drop(conn);
}

#[test]
fn test_client_version_names_the_crate() {
    let conn = Connection::new(ConnectParams::None);
    assert!(conn.client_version().contains(env!("CARGO_PKG_VERSION")));
}
