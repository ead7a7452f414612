/// Data structures shared by every layer of the bridge
///
/// This module defines the type catalog of the native client (data types, native
/// column types, parameter directions), the host-side value model, and the records
/// that cross the marshalling boundary in both directions: bind parameter records,
/// column buffers, parameter and column metadata, and execution outcomes.
use std::fmt;

/// Value tag of a native data buffer.
///
/// The numeric codes match the native client's `data_type` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Unassigned type; for parameters it marks data supplied later by streaming
    InvalidType,
    Binary,
    String,
    Double,
    Val64,
    UVal64,
    Val32,
    UVal32,
    Val16,
    UVal16,
    Val8,
    UVal8,
    Float,
}

impl DataType {
    pub fn code(self) -> i32 {
        match self {
            DataType::InvalidType => 0,
            DataType::Binary => 1,
            DataType::String => 2,
            DataType::Double => 3,
            DataType::Val64 => 4,
            DataType::UVal64 => 5,
            DataType::Val32 => 6,
            DataType::UVal32 => 7,
            DataType::Val16 => 8,
            DataType::UVal16 => 9,
            DataType::Val8 => 10,
            DataType::UVal8 => 11,
            DataType::Float => 12,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => DataType::InvalidType,
            1 => DataType::Binary,
            2 => DataType::String,
            3 => DataType::Double,
            4 => DataType::Val64,
            5 => DataType::UVal64,
            6 => DataType::Val32,
            7 => DataType::UVal32,
            8 => DataType::Val16,
            9 => DataType::UVal16,
            10 => DataType::Val8,
            11 => DataType::UVal8,
            12 => DataType::Float,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::InvalidType => "INVALID_TYPE",
            DataType::Binary => "BINARY",
            DataType::String => "STRING",
            DataType::Double => "DOUBLE",
            DataType::Val64 => "VAL64",
            DataType::UVal64 => "UVAL64",
            DataType::Val32 => "VAL32",
            DataType::UVal32 => "UVAL32",
            DataType::Val16 => "VAL16",
            DataType::UVal16 => "UVAL16",
            DataType::Val8 => "VAL8",
            DataType::UVal8 => "UVAL8",
            DataType::Float => "FLOAT",
        }
    }

    /// Width in bytes of a fixed-size value, `None` for variable-length tags.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            DataType::Double | DataType::Val64 | DataType::UVal64 => Some(8),
            DataType::Val32 | DataType::UVal32 | DataType::Float => Some(4),
            DataType::Val16 | DataType::UVal16 => Some(2),
            DataType::Val8 | DataType::UVal8 => Some(1),
            DataType::InvalidType | DataType::Binary | DataType::String => None,
        }
    }
}

/// Declared SQL type of a column or parameter, as reported by the native client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Null,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Decimal,
    Real,
    Double,
    Char,
    Varchar,
    NChar,
    NVarchar,
    Binary,
    Varbinary,
    Date,
    Time,
    Timestamp,
    Clob,
    Nclob,
    Blob,
    Boolean,
    String,
    NString,
    Text,
    ShortText,
    Alphanum,
    LongDate,
    SecondDate,
    DayDate,
    SecondTime,
}

impl NativeType {
    pub fn code(self) -> i32 {
        match self {
            NativeType::Null => 0,
            NativeType::TinyInt => 1,
            NativeType::SmallInt => 2,
            NativeType::Int => 3,
            NativeType::BigInt => 4,
            NativeType::Decimal => 5,
            NativeType::Real => 6,
            NativeType::Double => 7,
            NativeType::Char => 8,
            NativeType::Varchar => 9,
            NativeType::NChar => 10,
            NativeType::NVarchar => 11,
            NativeType::Binary => 12,
            NativeType::Varbinary => 13,
            NativeType::Date => 14,
            NativeType::Time => 15,
            NativeType::Timestamp => 16,
            NativeType::Clob => 25,
            NativeType::Nclob => 26,
            NativeType::Blob => 27,
            NativeType::Boolean => 28,
            NativeType::String => 29,
            NativeType::NString => 30,
            NativeType::Text => 51,
            NativeType::ShortText => 52,
            NativeType::Alphanum => 55,
            NativeType::LongDate => 61,
            NativeType::SecondDate => 62,
            NativeType::DayDate => 63,
            NativeType::SecondTime => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NativeType::Null => "NULL",
            NativeType::TinyInt => "TINYINT",
            NativeType::SmallInt => "SMALLINT",
            NativeType::Int => "INT",
            NativeType::BigInt => "BIGINT",
            NativeType::Decimal => "DECIMAL",
            NativeType::Real => "REAL",
            NativeType::Double => "DOUBLE",
            NativeType::Char => "CHAR",
            NativeType::Varchar => "VARCHAR",
            NativeType::NChar => "NCHAR",
            NativeType::NVarchar => "NVARCHAR",
            NativeType::Binary => "BINARY",
            NativeType::Varbinary => "VARBINARY",
            NativeType::Date => "DATE",
            NativeType::Time => "TIME",
            NativeType::Timestamp => "TIMESTAMP",
            NativeType::Clob => "CLOB",
            NativeType::Nclob => "NCLOB",
            NativeType::Blob => "BLOB",
            NativeType::Boolean => "BOOLEAN",
            NativeType::String => "STRING",
            NativeType::NString => "NSTRING",
            NativeType::Text => "TEXT",
            NativeType::ShortText => "SHORTTEXT",
            NativeType::Alphanum => "ALPHANUM",
            NativeType::LongDate => "LONGDATE",
            NativeType::SecondDate => "SECONDDATE",
            NativeType::DayDate => "DAYDATE",
            NativeType::SecondTime => "SECONDTIME",
        }
    }

    /// Large objects cannot be bulk-buffered and are read one value at a time.
    pub fn is_lob(self) -> bool {
        matches!(self, NativeType::Blob | NativeType::Clob | NativeType::Nclob)
    }
}

/// Direction of a statement parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    InputOutput,
}

impl Direction {
    pub fn code(self) -> i32 {
        match self {
            Direction::Input => 1,
            Direction::Output => 2,
            Direction::InputOutput => 3,
        }
    }

    pub fn is_input(self) -> bool {
        matches!(self, Direction::Input | Direction::InputOutput)
    }

    pub fn is_output(self) -> bool {
        matches!(self, Direction::Output | Direction::InputOutput)
    }
}

/// Host-level value, classified once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Declares a LOB whose bytes arrive later through parameter streaming
    LobPlaceholder { length: usize },
}

impl HostValue {
    /// Short type name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Int(_) => "integer",
            HostValue::Float(_) => "number",
            HostValue::Str(_) => "string",
            HostValue::Bytes(_) => "buffer",
            HostValue::LobPlaceholder { .. } => "object",
        }
    }
}

/// A native value buffer: one value, or `rows` values packed at `buffer_size` strides.
///
/// Used for bind parameter records (widened for batch execution) and for bound
/// result columns (widened to the row-set size).
#[derive(Debug, PartialEq)]
pub struct DataValue {
    pub data_type: DataType,
    pub buffer: Vec<u8>,
    pub buffer_size: usize,
    pub length: Vec<usize>,
    pub is_null: Vec<bool>,
}

/// Borrowed view of one row inside a [`DataValue`].
#[derive(Debug, Clone, Copy)]
pub struct DataCell<'a> {
    pub data_type: DataType,
    pub bytes: &'a [u8],
    pub is_null: bool,
}

impl DataValue {
    /// A single-row value of `data_type` with no buffer.
    pub fn empty(data_type: DataType) -> Self {
        DataValue {
            data_type,
            buffer: Vec::new(),
            buffer_size: 0,
            length: vec![0],
            is_null: vec![false],
        }
    }

    pub fn null(data_type: DataType) -> Self {
        DataValue {
            is_null: vec![true],
            ..DataValue::empty(data_type)
        }
    }

    /// A single-row value owning `bytes`.
    pub fn from_bytes(data_type: DataType, bytes: Vec<u8>) -> Self {
        DataValue {
            data_type,
            buffer_size: bytes.len(),
            length: vec![bytes.len()],
            is_null: vec![false],
            buffer: bytes,
        }
    }

    /// Zeroed buffer holding `rows` slots of `buffer_size` bytes each.
    pub fn with_rows(data_type: DataType, buffer_size: usize, rows: usize) -> Self {
        DataValue {
            data_type,
            buffer: vec![0; buffer_size * rows],
            buffer_size,
            length: vec![0; rows],
            is_null: vec![true; rows],
        }
    }

    pub fn rows(&self) -> usize {
        self.length.len()
    }

    pub fn row(&self, row: usize) -> Option<DataCell<'_>> {
        let len = *self.length.get(row)?;
        let is_null = self.is_null.get(row).copied().unwrap_or(false);
        let start = row * self.buffer_size;
        let end = (start + len).min(self.buffer.len());
        let bytes = self.buffer.get(start..end).unwrap_or(&[]);
        Some(DataCell {
            data_type: self.data_type,
            bytes,
            is_null,
        })
    }

    /// Widen every slot to at least `buffer_size` bytes, keeping written values.
    pub fn grow_slots(&mut self, buffer_size: usize) {
        if buffer_size <= self.buffer_size {
            return;
        }
        let mut buffer = vec![0; buffer_size * self.rows()];
        for (row, len) in self.length.iter().enumerate() {
            let old = row * self.buffer_size;
            if let Some(bytes) = self.buffer.get(old..old + len) {
                let start = row * buffer_size;
                buffer[start..start + bytes.len()].copy_from_slice(bytes);
            }
        }
        self.buffer = buffer;
        self.buffer_size = buffer_size;
    }

    /// Write `bytes` into slot `row`, truncating to the slot size.
    ///
    /// Returns `true` when the value had to be truncated.
    pub fn set_row(&mut self, row: usize, bytes: Option<&[u8]>) -> bool {
        if row >= self.rows() {
            return false;
        }
        let Some(bytes) = bytes else {
            self.is_null[row] = true;
            self.length[row] = 0;
            return false;
        };
        let start = row * self.buffer_size;
        let take = bytes.len().min(self.buffer_size);
        self.buffer[start..start + take].copy_from_slice(&bytes[..take]);
        self.length[row] = take;
        self.is_null[row] = false;
        take < bytes.len()
    }
}

/// Bind parameter record.
///
/// Single owner: records are moved between the provided and bound lists. The only
/// deep copy is [`BindParam::snapshot`], taken when a persistent statement retains
/// its bound values.
#[derive(Debug, PartialEq)]
pub struct BindParam {
    pub name: String,
    pub direction: Direction,
    pub value: DataValue,
}

impl BindParam {
    pub fn input(value: DataValue) -> Self {
        BindParam {
            name: String::new(),
            direction: Direction::Input,
            value,
        }
    }

    /// Independent copy of this record, buffers included.
    pub fn snapshot(&self) -> Self {
        BindParam {
            name: self.name.clone(),
            direction: self.direction,
            value: DataValue {
                data_type: self.value.data_type,
                buffer: self.value.buffer.clone(),
                buffer_size: self.value.buffer_size,
                length: self.value.length.clone(),
                is_null: self.value.is_null.clone(),
            },
        }
    }

    pub fn is_lob_placeholder(&self) -> bool {
        self.value.data_type == DataType::InvalidType
    }
}

/// Describes one declared statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct BindParamInfo {
    pub name: String,
    pub direction: Direction,
    pub data_type: DataType,
    pub native_type: NativeType,
    pub precision: u32,
    pub scale: u32,
    pub max_size: usize,
}

/// Describes one result column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub table_name: String,
    pub owner_name: String,
    pub data_type: DataType,
    pub native_type: NativeType,
    pub precision: u32,
    pub scale: u32,
    pub max_size: usize,
    pub nullable: bool,
}

/// One materialized row: column name to decoded value, in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<(String, HostValue)>);

impl Row {
    pub fn get(&self, column: &str) -> Option<&HostValue> {
        self.0
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn values(&self) -> impl Iterator<Item = &HostValue> {
        self.0.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome of executing a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// Statement produced no result columns
    RowsAffected(i64),
    /// Materialized rows of a query
    Rows(Vec<Row>),
    /// Success with no value (DDL, or execution waiting for streamed parameter data)
    NoResult,
}

/// Error reported by the native client: code, message and five-character SQL state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: i32,
    pub message: String,
    pub sql_state: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>, sql_state: &str) -> Self {
        NativeError {
            code,
            message: message.into(),
            sql_state: sql_state.to_string(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (SQLSTATE {})", self.code, self.message, self.sql_state)
    }
}

/// Opaque statement handle issued by a native connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtHandle(pub u64);
