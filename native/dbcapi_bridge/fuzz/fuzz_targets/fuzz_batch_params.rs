#![no_main]
//! Fuzz test for batch parameter building
//!
//! Arbitrary row shapes and value mixes must either build one widened record per
//! column or fail with an error, never panic.

use arbitrary::Arbitrary;
use dbcapi_bridge::params::build_batch_params;
use dbcapi_bridge::HostValue;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Lob(u16),
}

impl From<Cell> for HostValue {
    fn from(cell: Cell) -> Self {
        match cell {
            Cell::Null => HostValue::Null,
            Cell::Bool(b) => HostValue::Bool(b),
            Cell::Int(i) => HostValue::Int(i),
            Cell::Float(f) => HostValue::Float(f),
            Cell::Str(s) => HostValue::Str(s),
            Cell::Bytes(b) => HostValue::Bytes(b),
            Cell::Lob(n) => HostValue::LobPlaceholder { length: n.into() },
        }
    }
}

fuzz_target!(|rows: Vec<Vec<Cell>>| {
    let rows: Vec<Vec<HostValue>> = rows
        .into_iter()
        .map(|row| row.into_iter().map(HostValue::from).collect())
        .collect();

    if let Ok(params) = build_batch_params(&rows) {
        assert_eq!(params.len(), rows[0].len());
        for param in &params {
            assert_eq!(param.value.rows(), rows.len());
        }
    }
});
