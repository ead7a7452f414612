/// Parameter marshalling
///
/// Turns host values into bind parameter records, reconciles them with the
/// parameters a prepared statement declares, and hands them to the native
/// statement. Records are moved, never copied, from the provided list into the
/// bound list.
use crate::driver::NativeConnection;
use crate::error::{Error, Result};
use crate::models::{BindParam, DataType, DataValue, HostValue, StmtHandle};

/// Build the bind record for one host value.
///
/// - `Null` becomes a null-flagged 4-byte integer
/// - `Bool` and `Int` within `i32` become 4-byte integers, other integers 8-byte floats
/// - `Str` and `Bytes` keep their bytes with an explicit length
/// - `LobPlaceholder` declares its length and carries no bytes
pub fn to_bind_param(value: HostValue) -> BindParam {
    let data_value = match value {
        HostValue::Null => DataValue::null(DataType::Val32),
        HostValue::Bool(b) => DataValue::from_bytes(DataType::Val32, i32::from(b).to_le_bytes().to_vec()),
        HostValue::Int(i) => match i32::try_from(i) {
            Ok(v) => DataValue::from_bytes(DataType::Val32, v.to_le_bytes().to_vec()),
            Err(_) => DataValue::from_bytes(DataType::Double, (i as f64).to_le_bytes().to_vec()),
        },
        HostValue::Float(f) => DataValue::from_bytes(DataType::Double, f.to_le_bytes().to_vec()),
        HostValue::Str(s) => DataValue::from_bytes(DataType::String, s.into_bytes()),
        HostValue::Bytes(b) => DataValue::from_bytes(DataType::Binary, b),
        HostValue::LobPlaceholder { length } => DataValue {
            data_type: DataType::InvalidType,
            buffer: Vec::new(),
            buffer_size: 0,
            length: vec![length],
            is_null: vec![false],
        },
    };
    BindParam::input(data_value)
}

pub fn to_bind_params(values: Vec<HostValue>) -> Vec<BindParam> {
    values.into_iter().map(to_bind_param).collect()
}

/// Fail when `provided` differs from the number of input slots in `declared`.
pub fn check_parameter_count(provided: usize, declared: &[BindParam]) -> Result<()> {
    let inputs = declared.iter().filter(|p| p.direction.is_input()).count();
    if provided > inputs {
        Err(Error::TooManyParameters)
    } else if provided < inputs {
        Err(Error::NotEnoughParameters)
    } else {
        Ok(())
    }
}

/// Describe every declared parameter of `stmt`.
pub fn describe_params(native: &dyn NativeConnection, stmt: StmtHandle) -> Result<Vec<BindParam>> {
    let count = native.num_params(stmt)?;
    (0..count)
        .map(|i| native.describe_bind_param(stmt, i).map_err(Error::from))
        .collect()
}

/// Merge provided inputs into the declared parameter records.
///
/// Input slots take the next provided record's value, which keeps its own type,
/// under the declared name and direction. Output slots keep the declared record with room for `max_size`
/// bytes. An input slot left without a value keeps its declared default.
pub fn merge_with_declared(
    native: &dyn NativeConnection,
    stmt: StmtHandle,
    declared: Vec<BindParam>,
    provided: Vec<BindParam>,
) -> Result<Vec<BindParam>> {
    let mut provided = provided.into_iter();
    let mut bound = Vec::with_capacity(declared.len());

    for (index, slot) in declared.into_iter().enumerate() {
        let mut param = if slot.direction.is_input() {
            match provided.next() {
                Some(input) => BindParam {
                    value: input.value,
                    ..slot
                },
                None => slot,
            }
        } else {
            slot
        };

        if param.direction.is_output() {
            let info = native.get_bind_param_info(stmt, index)?;
            let wanted = info.max_size + 1;
            if param.value.buffer.len() < wanted {
                param.value.buffer.resize(wanted, 0);
            }
            param.value.buffer_size = param.value.buffer_size.max(wanted);
        }
        bound.push(param);
    }
    Ok(bound)
}

/// Bind every record to its slot. Returns `true` when a LOB placeholder was bound,
/// meaning the statement will wait for streamed parameter data.
pub fn bind_parameters(
    native: &mut dyn NativeConnection,
    stmt: StmtHandle,
    params: &[BindParam],
) -> Result<bool> {
    let mut send_param_data = false;
    for (index, param) in params.iter().enumerate() {
        native.bind_param(stmt, index, param)?;
        send_param_data |= param.is_lob_placeholder();
    }
    Ok(send_param_data)
}

/// Indices of LOB placeholders and their declared lengths.
pub fn lob_placeholders(params: &[BindParam]) -> Vec<(usize, usize)> {
    params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_lob_placeholder())
        .map(|(i, p)| (i, p.value.length.first().copied().unwrap_or(0)))
        .collect()
}

fn invalid_batch() -> Error {
    Error::InvalidParameter {
        index: 0,
        function: "Statement::exec_batch(rows)",
        expected: "an array of arrays with same length",
        received: "array",
    }
}

/// Same-variant test used to check batch columns.
fn same_kind(a: &HostValue, b: &HostValue) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Encode one batch cell as `data_type`. `None` is a null.
fn encode_cell(value: &HostValue, data_type: DataType) -> Option<Vec<u8>> {
    match (value, data_type) {
        (HostValue::Null, _) => None,
        (HostValue::Bool(b), _) => Some(i32::from(*b).to_le_bytes().to_vec()),
        (HostValue::Int(i), DataType::Val32) => {
            Some(i32::try_from(*i).unwrap_or_default().to_le_bytes().to_vec())
        }
        (HostValue::Int(i), _) => Some((*i as f64).to_le_bytes().to_vec()),
        (HostValue::Float(f), _) => Some(f.to_le_bytes().to_vec()),
        (HostValue::Str(s), _) => Some(s.as_bytes().to_vec()),
        (HostValue::Bytes(b), _) => Some(b.clone()),
        (HostValue::LobPlaceholder { .. }, _) => None,
    }
}

/// Build one widened record per column for a batch of `rows`.
///
/// Every row must have the same number of values, and at least one. A column may
/// mix nulls with a single host variant; any other mix is a binding error for that
/// column. Column slots are as wide as the widest value in the column.
pub fn build_batch_params(rows: &[Vec<HostValue>]) -> Result<Vec<BindParam>> {
    let width = rows.first().map_or(0, Vec::len);
    if width == 0 || rows.iter().any(|row| row.len() != width) {
        return Err(invalid_batch());
    }

    let mut params = Vec::with_capacity(width);
    for col in 0..width {
        let mut kind: Option<&HostValue> = None;
        for row in rows {
            let value = &row[col];
            match value {
                HostValue::Null => continue,
                HostValue::LobPlaceholder { .. } => return Err(Error::Binding { index: Some(col) }),
                _ => {}
            }
            match kind {
                Some(seen) if !same_kind(seen, value) => {
                    return Err(Error::Binding { index: Some(col) })
                }
                Some(_) => {}
                None => kind = Some(value),
            }
        }

        let data_type = match kind {
            None | Some(HostValue::Bool(_)) => DataType::Val32,
            Some(HostValue::Int(_)) => {
                let widened = rows.iter().any(|row| {
                    matches!(row[col], HostValue::Int(i) if i32::try_from(i).is_err())
                });
                if widened {
                    DataType::Double
                } else {
                    DataType::Val32
                }
            }
            Some(HostValue::Float(_)) => DataType::Double,
            Some(HostValue::Str(_)) => DataType::String,
            Some(_) => DataType::Binary,
        };

        let cells: Vec<Option<Vec<u8>>> = rows
            .iter()
            .map(|row| encode_cell(&row[col], data_type))
            .collect();
        let buffer_size = data_type.fixed_size().unwrap_or_else(|| {
            cells
                .iter()
                .map(|cell| cell.as_ref().map_or(0, Vec::len))
                .max()
                .unwrap_or(0)
        });

        let mut value = DataValue::with_rows(data_type, buffer_size, rows.len());
        for (row, cell) in cells.iter().enumerate() {
            value.set_row(row, cell.as_deref());
        }
        params.push(BindParam::input(value));
    }
    log::trace!("batch of {} rows bound as {} widened columns", rows.len(), width);
    Ok(params)
}

