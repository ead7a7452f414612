/// Native client implementation backed by libsql
///
/// Implements the handle-based native interface on top of a libsql database:
/// - connection strings select a local file, `:memory:`, or a remote node
/// - declared column types map onto the native type catalog
/// - bulk-bound columns are filled a row-set at a time; slots grow to fit long
///   values and a row-set ends early where a value changes storage class
/// - values are read as the declared column type when they fit it, otherwise as
///   the type of their own storage class
/// - LOB placeholder parameters are collected by `send_param_data` before the
///   statement actually runs
/// - auto-commit off opens a transaction lazily before the next statement
///
/// libsql is async; every call blocks on the global `TOKIO_RUNTIME`.
use bytes::Bytes;
use libsql::{Builder, Cipher, EncryptionConfig, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::conn_string::ConnectProperties;
use crate::constants::{DEFAULT_COLUMN_MAX_SIZE, DEFAULT_CONNECT_TIMEOUT_SECS, TOKIO_RUNTIME};
use crate::driver::{function_code, Driver, NativeConnection, NativeResult, WarningCallback};
use crate::models::{
    BindParam, BindParamInfo, ColumnInfo, DataCell, DataType, DataValue, Direction, NativeError,
    NativeType, StmtHandle,
};
use crate::utils::detect_function_code;

/// Native error codes raised by this driver itself (libsql errors keep their own).
const ERR_NOT_CONNECTED: i32 = -10807;
const ERR_INVALID_STATEMENT: i32 = -10808;
const ERR_INVALID_INDEX: i32 = -10809;
const ERR_CONVERSION: i32 = -10810;
const ERR_CONNECT: i32 = -10709;
const ERR_SEQUENCE: i32 = -10811;
const WARN_TYPE_MISMATCH: i32 = 1000;

/// Process-level entry point of the libsql-backed client.
#[derive(Debug, Default)]
pub struct LibsqlDriver;

impl Driver for LibsqlDriver {
    fn client_version(&self) -> String {
        format!("dbcapi_bridge {} (libsql)", env!("CARGO_PKG_VERSION"))
    }

    fn new_connection(&self) -> NativeResult<Box<dyn NativeConnection>> {
        Ok(Box::new(LibsqlConnection::new()))
    }

    fn finalize(&self) {
        log::debug!("libsql driver finalized");
    }
}

/// Data-at-execute parameter waiting for streamed bytes.
#[derive(Debug)]
struct StreamedParam {
    expected: usize,
    data: Vec<u8>,
    done: bool,
}

#[derive(Debug)]
enum ParamSlot {
    Unbound,
    /// One value per batch row
    Values(Vec<Value>),
    Streamed(StreamedParam),
}

struct StmtSlot {
    stmt: libsql::Statement,
    function_code: i32,
    params: Vec<ParamSlot>,
    param_names: Vec<String>,
    batch_size: usize,
    rowset_size: usize,
    columns: Vec<ColumnInfo>,
    declared: Vec<bool>,
    /// Columns already reported for holding a value outside their declared type
    mismatched: Vec<bool>,
    bound: Vec<Option<DataValue>>,
    rows: Option<libsql::Rows>,
    lookahead: Option<libsql::Row>,
    current: Option<libsql::Row>,
    fetched: usize,
    affected: i64,
    awaiting_data: bool,
}

impl StmtSlot {
    fn clear_results(&mut self) {
        self.rows = None;
        self.lookahead = None;
        self.current = None;
        self.fetched = 0;
        self.affected = -1;
        self.mismatched.iter_mut().for_each(|m| *m = false);
    }

    fn declared_type(&self, col: usize) -> Option<DataType> {
        match (self.declared.get(col), self.columns.get(col)) {
            (Some(true), Some(info)) => Some(info.data_type),
            _ => None,
        }
    }

    /// Read type of `value` in column `col`, plus a warning the first time the
    /// column holds a value its declared type cannot represent.
    fn read_type(&mut self, col: usize, value: &Value) -> (DataType, Option<NativeError>) {
        let declared = self.declared_type(col);
        let data_type = value_type(value, declared);
        let warning = match (declared, self.mismatched.get_mut(col)) {
            (Some(declared), Some(seen)) if declared != data_type && !*seen => {
                *seen = true;
                Some(type_mismatch(col, declared, data_type))
            }
            _ => None,
        };
        (data_type, warning)
    }

    /// Copy `row` into bound slot `self.fetched`.
    ///
    /// Returns `false`, writing nothing, when a value needs another slot type than
    /// the earlier rows of the row-set. The first row of a row-set rebinds instead.
    fn fill_row(&mut self, row: &libsql::Row, warnings: &mut Vec<NativeError>) -> NativeResult<bool> {
        let index = self.fetched;
        let mut cells = Vec::with_capacity(self.bound.len());
        for col in 0..self.bound.len() {
            let Some(slot_type) = self.bound[col].as_ref().map(|b| b.data_type) else {
                cells.push(None);
                continue;
            };
            let value = row.get_value(col as i32).map_err(from_libsql)?;
            let data_type = match value {
                Value::Null => slot_type,
                _ => value_type(&value, self.declared_type(col)),
            };
            if index > 0 && data_type != slot_type {
                return Ok(false);
            }
            cells.push(Some(value));
        }

        for (col, value) in cells.into_iter().enumerate() {
            let Some(value) = value else { continue };
            let (data_type, warning) = match value {
                Value::Null => (DataType::InvalidType, None),
                _ => self.read_type(col, &value),
            };
            warnings.extend(warning);
            let Some(bound) = self.bound[col].as_mut() else { continue };
            if index >= bound.rows() {
                continue;
            }
            if data_type != DataType::InvalidType && data_type != bound.data_type {
                let size = data_type.fixed_size().unwrap_or(bound.buffer_size);
                *bound = DataValue::with_rows(data_type, size, bound.rows());
            }
            let bytes = encode_value(&value, bound.data_type)?;
            if let Some(bytes) = &bytes {
                bound.grow_slots(bytes.len());
            }
            bound.set_row(index, bytes.as_deref());
        }
        Ok(true)
    }
}

/// One libsql connection and the statements prepared on it.
pub struct LibsqlConnection {
    db: Option<libsql::Database>,
    conn: Option<libsql::Connection>,
    statements: HashMap<StmtHandle, StmtSlot>,
    next_handle: u64,
    auto_commit: bool,
    client_info: HashMap<String, String>,
    warning: Option<WarningCallback>,
    last_error: Option<NativeError>,
}

impl Default for LibsqlConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl LibsqlConnection {
    pub fn new() -> Self {
        LibsqlConnection {
            db: None,
            conn: None,
            statements: HashMap::new(),
            next_handle: 1,
            auto_commit: true,
            client_info: HashMap::new(),
            warning: None,
            last_error: None,
        }
    }

    fn fail<T>(&mut self, err: NativeError) -> NativeResult<T> {
        self.last_error = Some(err.clone());
        Err(err)
    }

    fn warn(&self, err: NativeError) {
        log::debug!("native warning: {err}");
        if let Some(callback) = &self.warning {
            callback(&err);
        }
    }

    fn client(&self) -> NativeResult<&libsql::Connection> {
        self.conn.as_ref().ok_or_else(not_connected)
    }

    fn slot(&self, stmt: StmtHandle) -> NativeResult<&StmtSlot> {
        self.statements.get(&stmt).ok_or_else(|| invalid_statement(stmt))
    }

    fn slot_mut(&mut self, stmt: StmtHandle) -> NativeResult<&mut StmtSlot> {
        self.statements
            .get_mut(&stmt)
            .ok_or_else(|| invalid_statement(stmt))
    }

    /// Open a transaction before a statement runs when auto-commit is off.
    fn ensure_transaction(&mut self, stmt: StmtHandle) -> NativeResult<()> {
        if self.auto_commit {
            return Ok(());
        }
        let code = self.slot(stmt)?.function_code;
        if matches!(
            code,
            function_code::COMMIT | function_code::ROLLBACK | function_code::NIL
        ) {
            return Ok(());
        }
        let conn = self.client()?;
        if conn.is_autocommit() {
            TOKIO_RUNTIME
                .block_on(conn.execute("BEGIN", ()))
                .map_err(from_libsql)?;
        }
        Ok(())
    }

    fn end_transaction(&mut self, sql: &str) -> NativeResult<()> {
        let conn = self.client()?;
        if !conn.is_autocommit() {
            TOKIO_RUNTIME
                .block_on(conn.execute(sql, ()))
                .map_err(from_libsql)?;
        }
        Ok(())
    }

    fn run_statement(&mut self, stmt: StmtHandle) -> NativeResult<()> {
        self.ensure_transaction(stmt)?;
        let slot = self.slot_mut(stmt)?;
        slot.clear_results();
        slot.awaiting_data = false;

        let rows = slot.batch_size.max(1);
        let mut param_rows: Vec<Vec<Value>> = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut values = Vec::with_capacity(slot.params.len());
            for (index, param) in slot.params.iter().enumerate() {
                let value = match param {
                    ParamSlot::Unbound => {
                        return Err(NativeError::new(
                            ERR_SEQUENCE,
                            format!("Parameter {index} is not bound"),
                            "07002",
                        ))
                    }
                    ParamSlot::Values(vals) => vals
                        .get(row)
                        .or_else(|| vals.first())
                        .cloned()
                        .unwrap_or(Value::Null),
                    ParamSlot::Streamed(streamed) => Value::Blob(streamed.data.clone()),
                };
                values.push(value);
            }
            param_rows.push(values);
        }

        if slot.columns.is_empty() {
            let mut total: i64 = 0;
            for values in param_rows {
                slot.stmt.reset();
                let changed = TOKIO_RUNTIME
                    .block_on(slot.stmt.execute(values))
                    .map_err(from_libsql)?;
                total += i64::try_from(changed).unwrap_or(i64::MAX);
            }
            slot.affected = total;
            return Ok(());
        }

        let values = param_rows.into_iter().next().unwrap_or_default();
        slot.stmt.reset();
        let mut rows = TOKIO_RUNTIME
            .block_on(slot.stmt.query(values))
            .map_err(from_libsql)?;
        let first = TOKIO_RUNTIME.block_on(rows.next()).map_err(from_libsql)?;

        // Expression columns carry no declared type. The first row only sets what
        // column info reports; every value is still read by its own storage class.
        if let Some(row) = &first {
            for (col, info) in slot.columns.iter_mut().enumerate() {
                if slot.declared.get(col).copied().unwrap_or(false) {
                    continue;
                }
                if let Ok(value) = row.get_value(col as i32) {
                    let (native_type, data_type, max_size) = classify_value(&value);
                    info.native_type = native_type;
                    info.data_type = data_type;
                    info.max_size = max_size;
                }
            }
        }

        slot.rows = Some(rows);
        slot.lookahead = first;
        Ok(())
    }

    fn current_value(&self, stmt: StmtHandle, col: usize) -> NativeResult<Value> {
        let slot = self.slot(stmt)?;
        if col >= slot.columns.len() {
            return Err(invalid_index("column", col));
        }
        let row = slot.current.as_ref().ok_or_else(no_current_row)?;
        row.get_value(col as i32).map_err(from_libsql)
    }

    fn next_row(slot: &mut StmtSlot) -> NativeResult<Option<libsql::Row>> {
        if let Some(row) = slot.lookahead.take() {
            return Ok(Some(row));
        }
        match slot.rows.as_mut() {
            Some(rows) => TOKIO_RUNTIME.block_on(rows.next()).map_err(from_libsql),
            None => Ok(None),
        }
    }
}

impl NativeConnection for LibsqlConnection {
    fn connect(&mut self, conn_str: &str) -> NativeResult<()> {
        let props = ConnectProperties::parse(conn_str);

        if let Some(charset) = props.get("CHARSET") {
            if !charset.eq_ignore_ascii_case("UTF-8") && !charset.eq_ignore_ascii_case("UTF8") {
                return self.fail(NativeError::new(
                    ERR_CONNECT,
                    format!("Unsupported character set: {charset}"),
                    "08004",
                ));
            }
        }

        let Some(node) = props.get("ServerNode").map(str::to_string) else {
            return self.fail(NativeError::new(
                ERR_CONNECT,
                "Connect failed (no ServerNode)",
                "08001",
            ));
        };
        let token = props.get("pwd").unwrap_or_default().to_string();
        let encryption_key = props.get("EncryptionKey").map(str::to_string);
        let timeout = props
            .get("ConnectTimeout")
            .and_then(|ms| ms.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map_or(
                Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
                Duration::from_millis,
            );
        let remote = ["libsql://", "http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| node.starts_with(scheme));

        let result = TOKIO_RUNTIME.block_on(async {
            tokio::time::timeout(timeout, async {
                let db = if remote {
                    Builder::new_remote(node.clone(), token).build().await
                } else {
                    let mut builder = Builder::new_local(node.clone());
                    if let Some(key) = encryption_key {
                        let config = EncryptionConfig {
                            cipher: Cipher::Aes256Cbc,
                            encryption_key: Bytes::from(key),
                        };
                        builder = builder.encryption_config(config);
                    }
                    builder.build().await
                }
                .map_err(from_libsql)?;

                let conn = db.connect().map_err(from_libsql)?;

                // Ping remote connections to verify they're accessible
                if remote {
                    conn.query("SELECT 1", ()).await.map_err(from_libsql)?;
                }
                Ok::<_, NativeError>((db, conn))
            })
            .await
            .map_err(|_| {
                NativeError::new(
                    ERR_CONNECT,
                    format!("Connection timeout after {} ms", timeout.as_millis()),
                    "HYT00",
                )
            })?
        });

        match result {
            Ok((db, conn)) => {
                self.db = Some(db);
                self.conn = Some(conn);
                log::debug!("libsql connection open on {node}");
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    fn disconnect(&mut self) -> NativeResult<()> {
        let Some(conn) = self.conn.take() else {
            return self.fail(not_connected());
        };
        if !conn.is_autocommit() {
            log::warn!("disconnect with an open transaction; rolling back");
            if let Err(e) = TOKIO_RUNTIME.block_on(conn.execute("ROLLBACK", ())) {
                log::warn!("rollback on disconnect failed: {e}");
            }
        }
        self.statements.clear();
        self.db = None;
        Ok(())
    }

    fn commit(&mut self) -> NativeResult<()> {
        match self.end_transaction("COMMIT") {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    fn rollback(&mut self) -> NativeResult<()> {
        match self.end_transaction("ROLLBACK") {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    fn set_autocommit(&mut self, on: bool) -> NativeResult<()> {
        if on && !self.auto_commit && self.conn.is_some() {
            self.commit()?;
        }
        self.auto_commit = on;
        Ok(())
    }

    fn set_clientinfo(&mut self, key: &str, value: Option<&str>) -> NativeResult<()> {
        match value {
            Some(v) => {
                self.client_info.insert(key.to_string(), v.to_string());
            }
            None => {
                self.client_info.remove(key);
            }
        }
        Ok(())
    }

    fn get_clientinfo(&self, key: &str) -> Option<String> {
        self.client_info.get(key).cloned()
    }

    fn register_warning_callback(&mut self, callback: Option<WarningCallback>) {
        self.warning = callback;
    }

    fn error(&self) -> NativeError {
        self.last_error
            .clone()
            .unwrap_or_else(|| NativeError::new(0, "", "00000"))
    }

    fn prepare(&mut self, sql: &str) -> NativeResult<StmtHandle> {
        let conn = match self.client() {
            Ok(conn) => conn.clone(),
            Err(e) => return self.fail(e),
        };
        let stmt = match TOKIO_RUNTIME.block_on(conn.prepare(sql)) {
            Ok(stmt) => stmt,
            Err(e) => return self.fail(from_libsql(e)),
        };

        let mut columns = Vec::new();
        let mut declared = Vec::new();
        for column in stmt.columns() {
            let (native_type, data_type, max_size, precision, scale) = match column.decl_type() {
                Some(decl) => classify_decl_type(decl),
                None => (NativeType::Null, DataType::String, DEFAULT_COLUMN_MAX_SIZE, 0, 0),
            };
            declared.push(column.decl_type().is_some());
            columns.push(ColumnInfo {
                name: column.name().to_string(),
                table_name: column.table_name().unwrap_or_default().to_string(),
                owner_name: column.database_name().unwrap_or_default().to_string(),
                data_type,
                native_type,
                precision,
                scale,
                max_size,
                nullable: true,
            });
        }

        let count = stmt.parameter_count();
        let param_names = (1..=count)
            .map(|i| {
                stmt.parameter_name(i as i32)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        let handle = StmtHandle(self.next_handle);
        self.next_handle += 1;

        let slot = StmtSlot {
            stmt,
            function_code: detect_function_code(sql),
            params: (0..count).map(|_| ParamSlot::Unbound).collect(),
            param_names,
            batch_size: 1,
            rowset_size: 1,
            bound: columns.iter().map(|_| None).collect(),
            columns,
            mismatched: declared.iter().map(|_| false).collect(),
            declared,
            rows: None,
            lookahead: None,
            current: None,
            fetched: 0,
            affected: -1,
            awaiting_data: false,
        };
        self.statements.insert(handle, slot);
        Ok(handle)
    }

    fn free_stmt(&mut self, stmt: StmtHandle) {
        self.statements.remove(&stmt);
    }

    fn reset(&mut self, stmt: StmtHandle) -> NativeResult<()> {
        let slot = match self.slot_mut(stmt) {
            Ok(slot) => slot,
            Err(e) => return self.fail(e),
        };
        slot.stmt.reset();
        slot.clear_results();
        slot.awaiting_data = false;
        slot.batch_size = 1;
        for param in &mut slot.params {
            *param = ParamSlot::Unbound;
        }
        Ok(())
    }

    fn num_params(&self, stmt: StmtHandle) -> NativeResult<usize> {
        Ok(self.slot(stmt)?.params.len())
    }

    fn describe_bind_param(&self, stmt: StmtHandle, index: usize) -> NativeResult<BindParam> {
        let info = self.get_bind_param_info(stmt, index)?;
        Ok(BindParam {
            name: info.name,
            direction: info.direction,
            value: DataValue::empty(info.data_type),
        })
    }

    fn get_bind_param_info(&self, stmt: StmtHandle, index: usize) -> NativeResult<BindParamInfo> {
        let slot = self.slot(stmt)?;
        let name = slot
            .param_names
            .get(index)
            .ok_or_else(|| invalid_index("parameter", index))?;
        Ok(BindParamInfo {
            name: name.clone(),
            direction: Direction::Input,
            data_type: DataType::String,
            native_type: NativeType::NString,
            precision: 0,
            scale: 0,
            max_size: 0,
        })
    }

    fn bind_param(&mut self, stmt: StmtHandle, index: usize, param: &BindParam) -> NativeResult<()> {
        let converted = if param.is_lob_placeholder() {
            Ok(ParamSlot::Streamed(StreamedParam {
                expected: param.value.length.first().copied().unwrap_or(0),
                data: Vec::new(),
                done: false,
            }))
        } else {
            (0..param.value.rows())
                .map(|row| match param.value.row(row) {
                    Some(cell) => cell_to_value(cell),
                    None => Ok(Value::Null),
                })
                .collect::<NativeResult<Vec<_>>>()
                .map(ParamSlot::Values)
        };

        let result = converted.and_then(|converted| {
            let slot = self.slot_mut(stmt)?;
            let target = slot
                .params
                .get_mut(index)
                .ok_or_else(|| invalid_index("parameter", index))?;
            *target = converted;
            Ok(())
        });
        match result {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    fn send_param_data(&mut self, stmt: StmtHandle, index: usize, data: &[u8]) -> NativeResult<bool> {
        let ready = {
            let slot = match self.slot_mut(stmt) {
                Ok(slot) => slot,
                Err(e) => return self.fail(e),
            };
            if !slot.awaiting_data {
                return self.fail(NativeError::new(
                    ERR_SEQUENCE,
                    "Function sequence error: no parameter data expected",
                    "HY010",
                ));
            }
            let Some(ParamSlot::Streamed(streamed)) = slot.params.get_mut(index) else {
                return self.fail(invalid_index("parameter", index));
            };
            if streamed.done {
                return self.fail(NativeError::new(
                    ERR_SEQUENCE,
                    format!("Parameter {index} already received all of its data"),
                    "HY010",
                ));
            }
            if data.is_empty() {
                streamed.done = true;
            } else {
                streamed.data.extend_from_slice(data);
                if streamed.data.len() >= streamed.expected {
                    streamed.done = true;
                }
            }
            slot.params.iter().all(|p| match p {
                ParamSlot::Streamed(s) => s.done,
                _ => true,
            })
        };

        if !ready {
            return Ok(false);
        }
        match self.run_statement(stmt) {
            Ok(()) => Ok(true),
            Err(e) => self.fail(e),
        }
    }

    fn set_batch_size(&mut self, stmt: StmtHandle, rows: usize) -> NativeResult<()> {
        let slot = match self.slot_mut(stmt) {
            Ok(slot) => slot,
            Err(e) => return self.fail(e),
        };
        slot.batch_size = rows.max(1);
        Ok(())
    }

    fn execute(&mut self, stmt: StmtHandle) -> NativeResult<()> {
        let pending = match self.slot_mut(stmt) {
            Ok(slot) => slot
                .params
                .iter()
                .any(|p| matches!(p, ParamSlot::Streamed(s) if !s.done)),
            Err(e) => return self.fail(e),
        };

        if pending {
            if let Ok(slot) = self.slot_mut(stmt) {
                slot.clear_results();
                slot.awaiting_data = true;
            }
            return Ok(());
        }

        match self.run_statement(stmt) {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    fn affected_rows(&self, stmt: StmtHandle) -> i64 {
        self.slot(stmt).map_or(-1, |slot| slot.affected)
    }

    fn num_cols(&self, stmt: StmtHandle) -> usize {
        self.slot(stmt).map_or(0, |slot| slot.columns.len())
    }

    fn get_column_info(&self, stmt: StmtHandle, col: usize) -> NativeResult<ColumnInfo> {
        self.slot(stmt)?
            .columns
            .get(col)
            .cloned()
            .ok_or_else(|| invalid_index("column", col))
    }

    fn function_code(&self, stmt: StmtHandle) -> i32 {
        self.slot(stmt)
            .map_or(function_code::NIL, |slot| slot.function_code)
    }

    fn set_rowset_size(&mut self, stmt: StmtHandle, rows: usize) -> NativeResult<()> {
        let slot = match self.slot_mut(stmt) {
            Ok(slot) => slot,
            Err(e) => return self.fail(e),
        };
        slot.rowset_size = rows.max(1);
        Ok(())
    }

    fn bind_column(&mut self, stmt: StmtHandle, col: usize, buffer: DataValue) -> NativeResult<()> {
        let result = self.slot_mut(stmt).and_then(|slot| {
            let target = slot
                .bound
                .get_mut(col)
                .ok_or_else(|| invalid_index("column", col))?;
            *target = Some(buffer);
            Ok(())
        });
        match result {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    fn bound_column(&self, stmt: StmtHandle, col: usize) -> NativeResult<&DataValue> {
        self.slot(stmt)?
            .bound
            .get(col)
            .and_then(Option::as_ref)
            .ok_or_else(|| invalid_index("column", col))
    }

    fn fetch_next(&mut self, stmt: StmtHandle) -> NativeResult<bool> {
        let mut warnings = Vec::new();
        let result = (|| {
            let slot = self.slot_mut(stmt)?;
            if slot.awaiting_data {
                return Err(NativeError::new(
                    ERR_SEQUENCE,
                    "Function sequence error: parameter data outstanding",
                    "HY010",
                ));
            }
            let bulk = slot.bound.iter().any(Option::is_some);
            let capacity = if bulk { slot.rowset_size } else { 1 };

            slot.fetched = 0;
            while slot.fetched < capacity {
                let Some(row) = Self::next_row(slot)? else {
                    break;
                };
                if bulk && !slot.fill_row(&row, &mut warnings)? {
                    slot.lookahead = Some(row);
                    break;
                }
                slot.current = Some(row);
                slot.fetched += 1;
            }
            if slot.fetched == 0 {
                slot.current = None;
            }
            Ok(slot.fetched > 0)
        })();

        for warning in warnings {
            self.warn(warning);
        }
        match result {
            Ok(more) => Ok(more),
            Err(e) => self.fail(e),
        }
    }

    fn fetched_rows(&self, stmt: StmtHandle) -> usize {
        self.slot(stmt).map_or(0, |slot| slot.fetched)
    }

    fn get_column(&mut self, stmt: StmtHandle, col: usize) -> NativeResult<DataValue> {
        let result = (|| {
            let slot = self.slot_mut(stmt)?;
            if col >= slot.columns.len() {
                return Err(invalid_index("column", col));
            }
            let row = slot.current.as_ref().ok_or_else(no_current_row)?;
            let value = row.get_value(col as i32).map_err(from_libsql)?;
            if matches!(value, Value::Null) {
                return Ok((DataValue::null(slot.columns[col].data_type), None));
            }
            let (data_type, warning) = slot.read_type(col, &value);
            let bytes = encode_value(&value, data_type)?.unwrap_or_default();
            Ok((DataValue::from_bytes(data_type, bytes), warning))
        })();
        match result {
            Ok((value, warning)) => {
                if let Some(warning) = warning {
                    self.warn(warning);
                }
                Ok(value)
            }
            Err(e) => self.fail(e),
        }
    }

    fn get_data_size(&mut self, stmt: StmtHandle, col: usize) -> NativeResult<usize> {
        let result = (|| {
            let value = self.current_value(stmt, col)?;
            Ok(match &value {
                Value::Blob(b) => b.len(),
                other => encode_value(other, DataType::String)?.map_or(0, |b| b.len()),
            })
        })();
        match result {
            Ok(n) => Ok(n),
            Err(e) => self.fail(e),
        }
    }

    fn get_data(
        &mut self,
        stmt: StmtHandle,
        col: usize,
        offset: usize,
        buf: &mut [u8],
    ) -> NativeResult<usize> {
        let result = (|| {
            let value = self.current_value(stmt, col)?;
            let bytes = match &value {
                Value::Blob(b) => b.clone(),
                other => encode_value(other, DataType::String)?.unwrap_or_default(),
            };
            if offset > bytes.len() {
                return Err(NativeError::new(
                    ERR_INVALID_INDEX,
                    format!("Invalid data offset {offset}"),
                    "22023",
                ));
            }
            let take = buf.len().min(bytes.len() - offset);
            buf[..take].copy_from_slice(&bytes[offset..offset + take]);
            Ok(take)
        })();
        match result {
            Ok(n) => Ok(n),
            Err(e) => self.fail(e),
        }
    }

    fn get_next_result(&mut self, stmt: StmtHandle) -> NativeResult<bool> {
        // A libsql statement yields a single result set.
        let slot = match self.slot_mut(stmt) {
            Ok(slot) => slot,
            Err(e) => return self.fail(e),
        };
        slot.clear_results();
        Ok(false)
    }
}

fn not_connected() -> NativeError {
    NativeError::new(ERR_NOT_CONNECTED, "Connection not open", "08003")
}

fn invalid_statement(stmt: StmtHandle) -> NativeError {
    NativeError::new(
        ERR_INVALID_STATEMENT,
        format!("Invalid statement handle {}", stmt.0),
        "HY000",
    )
}

fn invalid_index(kind: &str, index: usize) -> NativeError {
    NativeError::new(
        ERR_INVALID_INDEX,
        format!("Invalid {kind} index {index}"),
        "07009",
    )
}

fn no_current_row() -> NativeError {
    NativeError::new(ERR_SEQUENCE, "No current row", "24000")
}

fn from_libsql(err: libsql::Error) -> NativeError {
    match &err {
        libsql::Error::SqliteFailure(code, message) => {
            let sql_state = match code & 0xff {
                19 => "23000",
                5 | 6 => "40001",
                9 => "HY008",
                1 if message.contains("syntax error") => "42000",
                1 if message.contains("no such") => "42S02",
                _ => "HY000",
            };
            NativeError::new(*code, message.clone(), sql_state)
        }
        _ => NativeError::new(-1, err.to_string(), "HY000"),
    }
}

fn conversion_error(detail: String) -> NativeError {
    NativeError::new(ERR_CONVERSION, detail, "22018")
}

fn overflow(value: i64, data_type: DataType) -> NativeError {
    NativeError::new(
        ERR_CONVERSION,
        format!("Numeric overflow: {value} does not fit {}", data_type.name()),
        "22003",
    )
}

/// Split a declared type like `NVARCHAR(20)` or `DECIMAL(10, 2)` into name and arguments.
fn split_decl_type(decl: &str) -> (String, Vec<u32>) {
    let upper = decl.trim().to_uppercase();
    match upper.split_once('(') {
        Some((base, rest)) => {
            let args = rest
                .trim_end_matches(')')
                .split(',')
                .filter_map(|a| a.trim().parse::<u32>().ok())
                .collect();
            (base.trim().to_string(), args)
        }
        None => (upper, Vec::new()),
    }
}

/// Map a declared column type to `(native type, data type, max size, precision, scale)`.
pub fn classify_decl_type(decl: &str) -> (NativeType, DataType, usize, u32, u32) {
    let (base, args) = split_decl_type(decl);
    let length = args.first().map(|n| *n as usize);
    let text_size = length.map_or(DEFAULT_COLUMN_MAX_SIZE, |n| n * 4);

    match base.as_str() {
        "TINYINT" => (NativeType::TinyInt, DataType::UVal8, 1, 3, 0),
        "SMALLINT" => (NativeType::SmallInt, DataType::Val16, 2, 5, 0),
        "BIGINT" => (NativeType::BigInt, DataType::Val64, 8, 19, 0),
        "BOOLEAN" | "BOOL" => (NativeType::Boolean, DataType::Val8, 1, 1, 0),
        "DOUBLE" | "DOUBLE PRECISION" | "REAL" => (NativeType::Double, DataType::Double, 8, 15, 0),
        "FLOAT" => (NativeType::Real, DataType::Float, 4, 7, 0),
        "DECIMAL" | "NUMERIC" | "DEC" => (
            NativeType::Decimal,
            DataType::Double,
            8,
            args.first().copied().unwrap_or(34),
            args.get(1).copied().unwrap_or(0),
        ),
        "BLOB" => (NativeType::Blob, DataType::Binary, 0, 0, 0),
        "CLOB" => (NativeType::Clob, DataType::String, 0, 0, 0),
        "NCLOB" => (NativeType::Nclob, DataType::String, 0, 0, 0),
        "BINARY" => (NativeType::Binary, DataType::Binary, length.unwrap_or(DEFAULT_COLUMN_MAX_SIZE), 0, 0),
        "VARBINARY" => (NativeType::Varbinary, DataType::Binary, length.unwrap_or(DEFAULT_COLUMN_MAX_SIZE), 0, 0),
        "CHAR" => (NativeType::Char, DataType::String, text_size, 0, 0),
        "NCHAR" => (NativeType::NChar, DataType::String, text_size, 0, 0),
        "VARCHAR" => (NativeType::Varchar, DataType::String, text_size, 0, 0),
        "NVARCHAR" => (NativeType::NVarchar, DataType::String, text_size, 0, 0),
        "ALPHANUM" => (NativeType::Alphanum, DataType::String, text_size, 0, 0),
        "SHORTTEXT" => (NativeType::ShortText, DataType::String, text_size, 0, 0),
        "TEXT" => (NativeType::Text, DataType::String, text_size, 0, 0),
        "DATE" => (NativeType::Date, DataType::String, 10, 0, 0),
        "DAYDATE" => (NativeType::DayDate, DataType::String, 10, 0, 0),
        "TIME" => (NativeType::Time, DataType::String, 8, 0, 0),
        "SECONDTIME" => (NativeType::SecondTime, DataType::String, 8, 0, 0),
        "TIMESTAMP" | "DATETIME" => (NativeType::Timestamp, DataType::String, 32, 0, 0),
        "SECONDDATE" => (NativeType::SecondDate, DataType::String, 19, 0, 0),
        "LONGDATE" => (NativeType::LongDate, DataType::String, 32, 0, 0),
        other if other.contains("INT") => (NativeType::Int, DataType::Val32, 4, 10, 0),
        other if other.contains("BLOB") => (NativeType::Blob, DataType::Binary, 0, 0, 0),
        other if other.contains("CHAR") || other.contains("CLOB") || other.contains("TEXT") => {
            (NativeType::NVarchar, DataType::String, text_size, 0, 0)
        }
        other if other.contains("REAL") || other.contains("FLOA") || other.contains("DOUB") => {
            (NativeType::Double, DataType::Double, 8, 15, 0)
        }
        _ => (NativeType::NString, DataType::String, DEFAULT_COLUMN_MAX_SIZE, 0, 0),
    }
}

/// Type an undeclared column from a sample value.
fn classify_value(value: &Value) -> (NativeType, DataType, usize) {
    match value {
        Value::Integer(i) if i32::try_from(*i).is_ok() => (NativeType::Int, DataType::Val32, 4),
        Value::Integer(_) => (NativeType::BigInt, DataType::Val64, 8),
        Value::Real(_) => (NativeType::Double, DataType::Double, 8),
        Value::Text(_) => (NativeType::NString, DataType::String, DEFAULT_COLUMN_MAX_SIZE),
        Value::Blob(_) => (NativeType::Blob, DataType::Binary, 0),
        Value::Null => (NativeType::Null, DataType::String, DEFAULT_COLUMN_MAX_SIZE),
    }
}

fn int_fits(i: i64, data_type: DataType) -> bool {
    match data_type {
        DataType::Val8 => i8::try_from(i).is_ok(),
        DataType::UVal8 => u8::try_from(i).is_ok(),
        DataType::Val16 => i16::try_from(i).is_ok(),
        DataType::UVal16 => u16::try_from(i).is_ok(),
        DataType::Val32 => i32::try_from(i).is_ok(),
        DataType::UVal32 => u32::try_from(i).is_ok(),
        DataType::Val64 => true,
        DataType::UVal64 => i >= 0,
        _ => false,
    }
}

/// Type `value` is read as: the declared type when the value fits it, else the
/// type of the value's own storage class.
fn value_type(value: &Value, declared: Option<DataType>) -> DataType {
    let own = classify_value(value).1;
    let Some(declared) = declared else {
        return own;
    };
    let real_or_text = matches!(declared, DataType::Double | DataType::Float | DataType::String);
    let fits = match value {
        Value::Null => true,
        Value::Integer(i) => int_fits(*i, declared) || real_or_text,
        Value::Real(_) => real_or_text,
        Value::Text(_) => matches!(declared, DataType::String | DataType::Binary),
        Value::Blob(_) => declared == DataType::Binary,
    };
    if fits {
        declared
    } else {
        own
    }
}

fn type_mismatch(col: usize, declared: DataType, read_as: DataType) -> NativeError {
    NativeError::new(
        WARN_TYPE_MISMATCH,
        format!(
            "Column {col} holds a value outside {}; read as {}",
            declared.name(),
            read_as.name()
        ),
        "01000",
    )
}

fn fixed<const N: usize>(bytes: &[u8]) -> NativeResult<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| conversion_error(format!("expected {N} bytes, got {}", bytes.len())))
}

/// Read one bound parameter cell into a libsql value.
fn cell_to_value(cell: DataCell<'_>) -> NativeResult<Value> {
    if cell.is_null {
        return Ok(Value::Null);
    }
    let b = cell.bytes;
    Ok(match cell.data_type {
        DataType::Val8 => Value::Integer(i8::from_le_bytes(fixed(b)?).into()),
        DataType::UVal8 => Value::Integer(u8::from_le_bytes(fixed(b)?).into()),
        DataType::Val16 => Value::Integer(i16::from_le_bytes(fixed(b)?).into()),
        DataType::UVal16 => Value::Integer(u16::from_le_bytes(fixed(b)?).into()),
        DataType::Val32 => Value::Integer(i32::from_le_bytes(fixed(b)?).into()),
        DataType::UVal32 => Value::Integer(u32::from_le_bytes(fixed(b)?).into()),
        DataType::Val64 => Value::Integer(i64::from_le_bytes(fixed(b)?)),
        DataType::UVal64 => {
            let v = u64::from_le_bytes(fixed(b)?);
            Value::Integer(i64::try_from(v).map_err(|_| {
                NativeError::new(ERR_CONVERSION, format!("Numeric overflow: {v}"), "22003")
            })?)
        }
        DataType::Float => Value::Real(f32::from_le_bytes(fixed(b)?).into()),
        DataType::Double => Value::Real(f64::from_le_bytes(fixed(b)?)),
        DataType::String => Value::Text(
            String::from_utf8(b.to_vec())
                .map_err(|e| conversion_error(format!("invalid UTF-8 parameter: {e}")))?,
        ),
        DataType::Binary => Value::Blob(b.to_vec()),
        DataType::InvalidType => {
            return Err(conversion_error("parameter has no data type".to_string()))
        }
    })
}

fn integer_of(value: &Value) -> NativeResult<i64> {
    match value {
        Value::Integer(i) => Ok(*i),
        Value::Real(f) => Ok(*f as i64),
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| conversion_error(format!("Invalid character value for cast: {s}"))),
        Value::Blob(_) | Value::Null => Err(conversion_error(
            "Cannot convert binary value to integer".to_string(),
        )),
    }
}

fn real_of(value: &Value) -> NativeResult<f64> {
    match value {
        Value::Integer(i) => Ok(*i as f64),
        Value::Real(f) => Ok(*f),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| conversion_error(format!("Invalid character value for cast: {s}"))),
        Value::Blob(_) | Value::Null => Err(conversion_error(
            "Cannot convert binary value to number".to_string(),
        )),
    }
}

/// Encode a libsql value as the native bytes of `data_type`; `None` for NULL.
fn encode_value(value: &Value, data_type: DataType) -> NativeResult<Option<Vec<u8>>> {
    if matches!(value, Value::Null) {
        return Ok(None);
    }

    macro_rules! int_as {
        ($t:ty) => {{
            let i = integer_of(value)?;
            <$t>::try_from(i)
                .map_err(|_| overflow(i, data_type))?
                .to_le_bytes()
                .to_vec()
        }};
    }

    let bytes = match data_type {
        DataType::Val8 => int_as!(i8),
        DataType::UVal8 => int_as!(u8),
        DataType::Val16 => int_as!(i16),
        DataType::UVal16 => int_as!(u16),
        DataType::Val32 => int_as!(i32),
        DataType::UVal32 => int_as!(u32),
        DataType::Val64 => integer_of(value)?.to_le_bytes().to_vec(),
        DataType::UVal64 => int_as!(u64),
        DataType::Double => real_of(value)?.to_le_bytes().to_vec(),
        DataType::Float => (real_of(value)? as f32).to_le_bytes().to_vec(),
        DataType::String | DataType::Binary => match value {
            Value::Text(s) => s.as_bytes().to_vec(),
            Value::Blob(b) => b.clone(),
            Value::Integer(i) => i.to_string().into_bytes(),
            Value::Real(f) => f.to_string().into_bytes(),
            Value::Null => return Ok(None),
        },
        DataType::InvalidType => {
            return Err(conversion_error("column has no data type".to_string()))
        }
    };
    Ok(Some(bytes))
}
