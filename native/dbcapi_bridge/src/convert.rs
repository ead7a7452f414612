/// Result conversion
///
/// Reads native column buffers back into host values. Statements without result
/// columns report an affected-row count. Result columns are bulk-bound and fetched
/// `ROWSET_SIZE` rows at a time, unless one of them is a LOB, in which case every
/// value is read individually.
use crate::constants::ROWSET_SIZE;
use crate::driver::{function_code, NativeConnection};
use crate::error::{Error, Result};
use crate::models::{
    BindParam, ColumnInfo, DataCell, DataType, DataValue, Direction, ExecOutcome, HostValue, NativeType, Row,
    StmtHandle,
};

fn short_buffer(data_type: DataType, len: usize) -> Error {
    Error::Conversion(format!("{} value with {len} bytes", data_type.name()))
}

fn le<const N: usize>(cell: &DataCell<'_>) -> Result<[u8; N]> {
    cell.bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| short_buffer(cell.data_type, cell.bytes.len()))
}

/// Decode one native value.
///
/// Integers up to 32 bits decode to `Int` (or `Bool` for boolean columns); 32-bit
/// unsigned and 64-bit integers decode to `Float`.
pub fn decode_cell(cell: DataCell<'_>, native_type: NativeType) -> Result<HostValue> {
    if cell.is_null {
        return Ok(HostValue::Null);
    }

    let small_int = |v: i64| {
        if native_type == NativeType::Boolean {
            HostValue::Bool(v != 0)
        } else {
            HostValue::Int(v)
        }
    };

    Ok(match cell.data_type {
        DataType::Val8 => small_int(i8::from_le_bytes(le(&cell)?).into()),
        DataType::UVal8 => small_int(u8::from_le_bytes(le(&cell)?).into()),
        DataType::Val16 => small_int(i16::from_le_bytes(le(&cell)?).into()),
        DataType::UVal16 => small_int(u16::from_le_bytes(le(&cell)?).into()),
        DataType::Val32 => small_int(i32::from_le_bytes(le(&cell)?).into()),
        DataType::UVal32 => HostValue::Float(u32::from_le_bytes(le(&cell)?).into()),
        DataType::Val64 => HostValue::Float(i64::from_le_bytes(le(&cell)?) as f64),
        DataType::UVal64 => HostValue::Float(u64::from_le_bytes(le(&cell)?) as f64),
        DataType::Float => HostValue::Float(f32::from_le_bytes(le(&cell)?).into()),
        DataType::Double => HostValue::Float(f64::from_le_bytes(le(&cell)?)),
        DataType::Binary => HostValue::Bytes(cell.bytes.to_vec()),
        DataType::String => HostValue::Str(String::from_utf8_lossy(cell.bytes).into_owned()),
        DataType::InvalidType => {
            return Err(Error::Conversion(format!(
                "unrecognized native type tag {}",
                cell.data_type.code()
            )))
        }
    })
}

/// Host view of a retained parameter value. Output-only and unassigned records read as null.
pub fn decode_parameter(param: &BindParam) -> Result<HostValue> {
    if param.direction == Direction::Output || param.value.data_type == DataType::InvalidType {
        return Ok(HostValue::Null);
    }
    match param.value.row(0) {
        Some(cell) => decode_cell(cell, NativeType::Null),
        None => Ok(HostValue::Null),
    }
}

pub fn column_infos(native: &dyn NativeConnection, stmt: StmtHandle) -> Result<Vec<ColumnInfo>> {
    (0..native.num_cols(stmt))
        .map(|col| native.get_column_info(stmt, col).map_err(Error::from))
        .collect()
}

/// Turn an executed statement into its outcome.
pub fn fetch_result_set(native: &mut dyn NativeConnection, stmt: StmtHandle) -> Result<ExecOutcome> {
    let affected = native.affected_rows(stmt);
    let cols = native.num_cols(stmt);

    if cols == 0 {
        if native.function_code(stmt) == function_code::DDL {
            return Ok(ExecOutcome::NoResult);
        }
        return Ok(ExecOutcome::RowsAffected(affected.max(0)));
    }

    let columns = column_infos(native, stmt)?;
    let rows = if columns.iter().any(|c| c.native_type.is_lob()) {
        fetch_per_value(native, stmt, &columns)?
    } else {
        fetch_bulk(native, stmt, &columns)?
    };
    Ok(ExecOutcome::Rows(rows))
}

/// Decode the current row through per-value reads.
pub fn read_current_row(
    native: &mut dyn NativeConnection,
    stmt: StmtHandle,
    columns: &[ColumnInfo],
) -> Result<Row> {
    let mut row = Vec::with_capacity(columns.len());
    for (col, info) in columns.iter().enumerate() {
        let value = native.get_column(stmt, col)?;
        let decoded = match value.row(0) {
            Some(cell) => decode_cell(cell, info.native_type)?,
            None => HostValue::Null,
        };
        row.push((info.name.clone(), decoded));
    }
    Ok(Row(row))
}

fn fetch_per_value(
    native: &mut dyn NativeConnection,
    stmt: StmtHandle,
    columns: &[ColumnInfo],
) -> Result<Vec<Row>> {
    log::trace!("fetching {} columns per value", columns.len());
    let mut rows = Vec::new();
    while native.fetch_next(stmt)? {
        rows.push(read_current_row(native, stmt, columns)?);
    }
    Ok(rows)
}

fn fetch_bulk(
    native: &mut dyn NativeConnection,
    stmt: StmtHandle,
    columns: &[ColumnInfo],
) -> Result<Vec<Row>> {
    native.set_rowset_size(stmt, ROWSET_SIZE)?;
    for (col, info) in columns.iter().enumerate() {
        let slot = info.data_type.fixed_size().unwrap_or(info.max_size);
        native.bind_column(stmt, col, DataValue::with_rows(info.data_type, slot, ROWSET_SIZE))?;
    }

    let mut rows = Vec::new();
    while native.fetch_next(stmt)? {
        let fetched = native.fetched_rows(stmt);
        log::trace!("row-set of {fetched} rows");
        for r in 0..fetched {
            let mut row = Vec::with_capacity(columns.len());
            for (col, info) in columns.iter().enumerate() {
                let bound = native.bound_column(stmt, col)?;
                let decoded = match bound.row(r) {
                    Some(cell) => decode_cell(cell, info.native_type)?,
                    None => HostValue::Null,
                };
                row.push((info.name.clone(), decoded));
            }
            rows.push(Row(row));
        }
    }
    Ok(rows)
}
