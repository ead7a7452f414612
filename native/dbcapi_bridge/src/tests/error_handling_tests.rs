//! Error handling tests for the bridge
//!
//! These tests verify that every failure comes back as an error value with a
//! code, a message and a SQL state, instead of a panic.
//!
//! Focus areas:
//! 1. The bridge's own error codes and messages
//! 2. Native errors (constraint violations, syntax errors, missing objects)
//! 3. Statement and result set misuse

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::unwrap_used)]

use super::test_utils::connect_memory;
use crate::error::{self, Error, IndexKind};
use crate::models::{HostValue, NativeError};

// ============================================================================
// ERROR TAXONOMY
// ============================================================================

#[test]
fn test_codes_are_distinct_per_category() {
    let errors = [
        Error::General("x".to_string()),
        Error::InvalidObject,
        Error::InvalidArguments,
        Error::NotConnected,
        Error::Binding { index: None },
        Error::TooManyParameters,
        Error::NotEnoughParameters,
        Error::ResultSet,
        Error::InvalidIndex(IndexKind::Column),
        Error::ParamDataPending,
        Error::Conversion("x".to_string()),
    ];
    let mut codes: Vec<i32> = errors.iter().map(Error::code).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), errors.len());
    assert!(codes.iter().all(|c| *c <= error::GENERAL_ERROR));
}

#[test]
fn test_messages() {
    assert_eq!(Error::NotConnected.to_string(), "No Connection Available");
    assert_eq!(Error::InvalidObject.to_string(), "Invalid Object");
    assert_eq!(
        Error::Binding { index: Some(2) }.to_string(),
        "Can not bind parameter(2)."
    );
    assert_eq!(
        Error::Binding { index: None }.to_string(),
        "Can not bind parameter(s)"
    );
    assert_eq!(
        Error::InvalidIndex(IndexKind::Parameter).to_string(),
        "Invalid parameter index."
    );
    assert_eq!(
        Error::TooManyParameters.to_string(),
        "Too many parameters for the SQL statement"
    );
}

#[test]
fn test_invalid_parameter_message_names_the_function() {
    let err = Error::InvalidParameter {
        index: 1,
        function: "Connection::exec(sql, params)",
        expected: "array",
        received: "integer",
    };
    assert_eq!(err.code(), error::INVALID_ARGUMENTS);
    assert_eq!(
        err.to_string(),
        "Invalid parameter 1 for function 'Connection::exec(sql, params)': expected array, received integer."
    );
}

#[test]
fn test_native_error_keeps_its_triple() {
    let err = Error::from(NativeError::new(301, "unique constraint violated", "23000"));
    assert_eq!(
        err.to_triple(),
        (301, "unique constraint violated".to_string(), "23000".to_string())
    );
}

#[test]
fn test_bridge_errors_use_general_sql_state() {
    let (code, message, state) = Error::ParamDataPending.to_triple();
    assert_eq!(code, error::PARAM_DATA_PENDING);
    assert_eq!(message, "Statement is waiting for parameter data");
    assert_eq!(state, "HY000");
}

// ============================================================================
// NATIVE ERRORS
// ============================================================================

fn native(err: Error) -> NativeError {
    match err {
        Error::Native(e) => e,
        other => panic!("expected native error, got {other:?}"),
    }
}

#[test]
fn test_not_null_constraint_violation() {
    let conn = connect_memory();
    conn.exec("CREATE TABLE users (id INTEGER, name TEXT NOT NULL)", vec![])
        .unwrap();

    let err = conn
        .exec("INSERT INTO users VALUES (?, ?)", vec![HostValue::Int(1), HostValue::Null])
        .unwrap_err();
    let err = native(err);
    assert!(err.message.contains("NOT NULL"), "{}", err.message);
    assert_eq!(err.sql_state.len(), 5);
}

#[test]
fn test_check_constraint_violation() {
    let conn = connect_memory();
    conn.exec("CREATE TABLE p (price DOUBLE CHECK (price > 0))", vec![])
        .unwrap();

    let err = conn
        .exec("INSERT INTO p VALUES (?)", vec![HostValue::Float(-1.0)])
        .unwrap_err();
    assert!(native(err).message.contains("CHECK"));
}

#[test]
fn test_syntax_error() {
    let conn = connect_memory();
    let err = native(conn.exec("SELEKT * FROM nowhere", vec![]).unwrap_err());
    assert_ne!(err.code, 0);
}

#[test]
fn test_missing_table_on_prepare() {
    let conn = connect_memory();
    let err = native(conn.prepare("SELECT * FROM missing").err().unwrap());
    assert!(err.message.contains("missing"), "{}", err.message);
}

#[test]
fn test_connection_usable_after_error() {
    let conn = connect_memory();
    assert!(conn.exec("SELECT * FROM missing", vec![]).is_err());
    assert!(conn.exec("SELECT 1", vec![]).is_ok());
}

// ============================================================================
// MISUSE
// ============================================================================

#[test]
fn test_wrong_parameter_count_on_prepared_statement() {
    let conn = connect_memory();
    let stmt = conn.prepare("SELECT ?, ?").unwrap();
    assert_eq!(
        stmt.exec(vec![HostValue::Int(1)]).unwrap_err(),
        Error::NotEnoughParameters
    );
    // A failed execution leaves the statement usable
    assert!(stmt.exec(vec![HostValue::Int(1), HostValue::Int(2)]).is_ok());
}

#[test]
fn test_non_numeric_string_for_integer_parameter() {
    let conn = connect_memory();
    conn.exec("CREATE TABLE t (n INTEGER)", vec![]).unwrap();
    let stmt = conn.prepare("INSERT INTO t VALUES (?)").unwrap();

    // Declared types are not reported by this driver, so the string is bound as is
    assert!(stmt.exec(vec![HostValue::Str("12".to_string())]).is_ok());
}

#[test]
fn test_parameter_data_without_pending_execution() {
    let conn = connect_memory();
    let stmt = conn.prepare("SELECT ?").unwrap();
    assert!(matches!(
        stmt.send_parameter_data(0, b"abc"),
        Err(Error::General(_))
    ));
}

#[test]
fn test_bad_batch_does_not_touch_table() {
    let conn = connect_memory();
    conn.exec("CREATE TABLE t (a INTEGER, b TEXT)", vec![]).unwrap();
    let stmt = conn.prepare("INSERT INTO t VALUES (?, ?)").unwrap();

    let err = stmt
        .exec_batch(&[
            vec![HostValue::Int(1), HostValue::Str("a".to_string())],
            vec![HostValue::Int(2), HostValue::Bytes(vec![1])],
        ])
        .unwrap_err();
    assert_eq!(err, Error::Binding { index: Some(1) });

    match conn.exec("SELECT COUNT(*) AS n FROM t", vec![]).unwrap() {
        crate::models::ExecOutcome::Rows(rows) => {
            assert_eq!(rows[0].get("n"), Some(&HostValue::Int(0)));
        }
        other => panic!("expected rows, got {other:?}"),
    }
}
