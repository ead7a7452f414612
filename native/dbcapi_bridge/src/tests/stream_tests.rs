//! Tests for stream.rs - Row, array and LOB readers over a result set

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::unwrap_used)]

use std::io::Read;

use super::test_utils::connect_memory;
use crate::connection::Connection;
use crate::constants::LOB_MAX_READ_SIZE;
use crate::error::Error;
use crate::models::HostValue;
use crate::stream::{ArrayStream, LobReader, RowStream};

fn docs() -> Connection {
    let conn = connect_memory();
    conn.exec("CREATE TABLE docs (id INTEGER, body BLOB, note TEXT)", vec![])
        .unwrap();
    let body: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    conn.exec(
        "INSERT INTO docs VALUES (?, ?, ?)",
        vec![HostValue::Int(1), HostValue::Bytes(body), HostValue::Str("a".to_string())],
    )
    .unwrap();
    conn.exec("INSERT INTO docs VALUES (2, NULL, 'b')", vec![]).unwrap();
    conn
}

#[test]
fn test_row_stream_yields_every_row() {
    let conn = docs();
    let rs = conn
        .exec_query("SELECT id, note FROM docs ORDER BY id", vec![])
        .unwrap();

    let mut stream = RowStream::new(&rs);
    let rows: Vec<_> = stream.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get("note"), Some(&HostValue::Str("b".to_string())));
    assert!(stream.next().is_none());
}

#[test]
fn test_array_stream_keeps_column_order() {
    let conn = docs();
    let rs = conn
        .exec_query("SELECT note, id FROM docs ORDER BY id", vec![])
        .unwrap();

    let rows: Vec<_> = ArrayStream::new(&rs).unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(
        rows,
        vec![
            vec![HostValue::Str("a".to_string()), HostValue::Int(1)],
            vec![HostValue::Str("b".to_string()), HostValue::Int(2)],
        ]
    );
}

#[test]
fn test_lob_reader_reads_value_in_chunks() {
    let conn = docs();
    let rs = conn
        .exec_query("SELECT body FROM docs WHERE id = 1", vec![])
        .unwrap();
    assert!(rs.next().unwrap());

    let mut reader = LobReader::new(&rs, 0, Some(300)).unwrap();
    let mut chunk = [0u8; 512];
    assert_eq!(reader.read(&mut chunk).unwrap(), 300);

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert_eq!(rest.len(), 700);
    assert_eq!(reader.position(), 1000);
    assert_eq!(rest[0], (300 % 256) as u8);
}

#[test]
fn test_lob_reader_caps_read_size() {
    let conn = docs();
    let rs = conn
        .exec_query("SELECT body FROM docs WHERE id = 1", vec![])
        .unwrap();
    assert!(rs.next().unwrap());

    let mut reader = LobReader::new(&rs, 0, Some(usize::MAX)).unwrap();
    let mut all = Vec::new();
    reader.read_to_end(&mut all).unwrap();
    assert_eq!(all.len(), 1000);
    assert!(all.len() < LOB_MAX_READ_SIZE);
}

#[test]
fn test_lob_reader_rejects_bad_columns() {
    let conn = docs();
    let rs = conn
        .exec_query("SELECT body, note FROM docs WHERE id = 1", vec![])
        .unwrap();
    assert!(rs.next().unwrap());

    assert!(matches!(
        LobReader::new(&rs, 2, None),
        Err(Error::InvalidParameter { .. })
    ));
    assert!(matches!(LobReader::new(&rs, 1, None), Err(Error::General(_))));
}

#[test]
fn test_lob_reader_before_first_row_fails() {
    let conn = docs();
    let rs = conn
        .exec_query("SELECT body FROM docs WHERE id = 1", vec![])
        .unwrap();

    let mut reader = LobReader::new(&rs, 0, None).unwrap();
    let mut buf = [0u8; 8];
    assert!(reader.read(&mut buf).is_err());
}
