//! Concurrency tests - Shared connections, independent connections and offloaded work
//!
//! Operations on one connection serialize through its lock; separate connections
//! run in parallel. Offloaded work delivers exactly one outcome.

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::unwrap_used)]

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::test_utils::connect_memory;
use crate::connection::Connection;
use crate::dispatch::{self, Continuation, Task};
use crate::engine::{ExecPhase, Execution};
use crate::error::{Error, Result};
use crate::models::{ExecOutcome, HostValue};

const THREADS: i64 = 8;
const PER_THREAD: i64 = 20;

fn count_rows(conn: &Connection) -> HostValue {
    match conn.exec("SELECT COUNT(*) AS n FROM t", vec![]).unwrap() {
        ExecOutcome::Rows(rows) => rows[0].get("n").cloned().unwrap(),
        other => panic!("expected rows, got {other:?}"),
    }
}

#[test]
fn test_concurrent_callers_on_one_connection() {
    let conn = Arc::new(connect_memory());
    conn.exec("CREATE TABLE t (worker INTEGER, n INTEGER)", vec![])
        .unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                let stmt = conn.prepare("INSERT INTO t VALUES (?, ?)").unwrap();
                for n in 0..PER_THREAD {
                    let outcome = stmt
                        .exec(vec![HostValue::Int(worker), HostValue::Int(n)])
                        .unwrap();
                    assert_eq!(outcome, ExecOutcome::RowsAffected(1));
                    conn.exec("SELECT COUNT(*) FROM t", vec![]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(count_rows(&conn), HostValue::Int(THREADS * PER_THREAD));
}

#[test]
fn test_cursors_and_statements_interleave_safely() {
    let conn = Arc::new(connect_memory());
    conn.exec("CREATE TABLE t (n INTEGER)", vec![]).unwrap();
    let insert = conn.prepare("INSERT INTO t VALUES (?)").unwrap();
    let batch: Vec<Vec<HostValue>> = (0..50).map(|n| vec![HostValue::Int(n)]).collect();
    assert_eq!(insert.exec_batch(&batch).unwrap(), 50);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                let rs = conn.exec_query("SELECT n FROM t", vec![]).unwrap();
                let mut seen = 0;
                while rs.next().unwrap() {
                    rs.get_value(0).unwrap();
                    seen += 1;
                }
                rs.close();
                seen
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 50);
    }
}

#[test]
fn test_independent_connections_run_in_parallel() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                let conn = connect_memory();
                conn.exec("CREATE TABLE t (n INTEGER)", vec![]).unwrap();
                for n in 0..=i {
                    conn.exec("INSERT INTO t VALUES (?)", vec![HostValue::Int(n)])
                        .unwrap();
                }
                count_rows(&conn)
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), HostValue::Int(i as i64 + 1));
    }
}

#[test]
fn test_task_get_returns_outcome() {
    let task = Task::spawn(|| Ok(21 * 2));
    assert_eq!(task.get().unwrap(), 42);

    let failing: Task<i32> = Task::spawn(|| Err(Error::NotConnected));
    assert_eq!(failing.get().unwrap_err(), Error::NotConnected);
}

#[test]
fn test_task_then_delivers_exactly_one_outcome() {
    let (tx, rx) = mpsc::channel();
    Task::spawn(|| Ok("done".to_string())).then(move |outcome: Result<String>| {
        tx.send(outcome).unwrap();
    });

    let outcome = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(outcome.unwrap(), "done");
    // The sender was consumed by the only call
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_run_inline_without_continuation() {
    let caller = thread::current().id();
    let outcome = dispatch::run(move || Ok(thread::current().id() == caller), None);
    assert_eq!(outcome, Some(Ok(true)));
}

#[test]
fn test_run_offloads_with_continuation() {
    let caller = thread::current().id();
    let (tx, rx) = mpsc::channel();
    let continuation: Continuation<bool> = Box::new(move |outcome| {
        tx.send(outcome).unwrap();
    });

    let inline = dispatch::run(move || Ok(thread::current().id() == caller), Some(continuation));
    assert!(inline.is_none());

    let offloaded = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(offloaded, Ok(false));
}

#[test]
fn test_offloaded_connection_work() {
    let conn = Arc::new(connect_memory());
    let worker_conn = Arc::clone(&conn);
    let task = Task::spawn(move || worker_conn.exec("SELECT 1 AS one", vec![]));

    match task.get().unwrap() {
        ExecOutcome::Rows(rows) => assert_eq!(rows[0].get("one"), Some(&HostValue::Int(1))),
        other => panic!("expected rows, got {other:?}"),
    }
    assert!(conn.is_connected());
}

#[test]
fn test_offloaded_errors_arrive_through_continuation() {
    let conn = Arc::new(Connection::new(crate::conn_string::ConnectParams::None));
    let (tx, rx) = mpsc::channel();
    let continuation: Continuation<ExecOutcome> = Box::new(move |outcome| {
        tx.send(outcome).unwrap();
    });

    let worker_conn = Arc::clone(&conn);
    let inline = dispatch::run(move || worker_conn.exec("SELECT 1", vec![]), Some(continuation));
    assert!(inline.is_none());

    let outcome = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(outcome, Err(Error::NotConnected));
}

#[test]
fn test_execution_starts_idle() {
    let exec = Execution::new("test");
    assert_eq!(exec.phase(), ExecPhase::Idle);
    assert_eq!(ExecPhase::ParameterCountCheck.to_string(), "ParameterCountCheck");
}
