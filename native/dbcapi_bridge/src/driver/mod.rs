/// Native client interface
///
/// The bridge talks to the native database client only through these two traits.
/// [`Driver`] is the process-level interface (init, finalize, new connection);
/// [`NativeConnection`] is one connection handle together with every statement
/// handle it issued. Statement calls take a [`StmtHandle`] and go through the
/// owning connection, so nothing can reach a statement without holding the
/// connection's lock.
///
/// Calls report failures as [`NativeError`] (code, message, SQL state). The last
/// failure is also kept and can be read back with [`NativeConnection::error`].
use std::sync::Arc;

use crate::models::{BindParam, BindParamInfo, ColumnInfo, DataValue, NativeError, StmtHandle};

pub mod libsql_driver;

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// Receives warnings raised by the native client on a connection.
pub type WarningCallback = Arc<dyn Fn(&NativeError) + Send + Sync>;

/// Statement function codes reported by [`NativeConnection::function_code`].
pub mod function_code {
    pub const NIL: i32 = 0;
    pub const DDL: i32 = 1;
    pub const INSERT: i32 = 2;
    pub const UPDATE: i32 = 3;
    pub const DELETE: i32 = 4;
    pub const SELECT: i32 = 5;
    pub const SELECT_FOR_UPDATE: i32 = 6;
    pub const EXPLAIN: i32 = 7;
    pub const DB_PROCEDURE_CALL: i32 = 8;
    pub const COMMIT: i32 = 11;
    pub const ROLLBACK: i32 = 12;
    pub const SAVEPOINT: i32 = 13;
}

/// Process-level native interface.
pub trait Driver: Send + Sync {
    /// Client library identification.
    fn client_version(&self) -> String;

    /// Allocate an unconnected connection handle.
    fn new_connection(&self) -> NativeResult<Box<dyn NativeConnection>>;

    /// Release interface-wide resources. Called only when no connection is open.
    fn finalize(&self);
}

/// One native connection handle and the statements it owns.
pub trait NativeConnection: Send {
    fn connect(&mut self, conn_str: &str) -> NativeResult<()>;
    fn disconnect(&mut self) -> NativeResult<()>;

    fn commit(&mut self) -> NativeResult<()>;
    fn rollback(&mut self) -> NativeResult<()>;
    fn set_autocommit(&mut self, on: bool) -> NativeResult<()>;

    fn set_clientinfo(&mut self, key: &str, value: Option<&str>) -> NativeResult<()>;
    fn get_clientinfo(&self, key: &str) -> Option<String>;

    /// Install or clear (`None`) the warning subscriber.
    fn register_warning_callback(&mut self, callback: Option<WarningCallback>);

    /// Last error raised on this connection.
    fn error(&self) -> NativeError;

    /// SQL state of the last error raised on this connection.
    fn sqlstate(&self) -> String {
        self.error().sql_state
    }

    fn prepare(&mut self, sql: &str) -> NativeResult<StmtHandle>;
    fn free_stmt(&mut self, stmt: StmtHandle);
    fn reset(&mut self, stmt: StmtHandle) -> NativeResult<()>;

    fn num_params(&self, stmt: StmtHandle) -> NativeResult<usize>;

    /// Default bind record for parameter `index`, with its declared direction and type.
    fn describe_bind_param(&self, stmt: StmtHandle, index: usize) -> NativeResult<BindParam>;
    fn get_bind_param_info(&self, stmt: StmtHandle, index: usize) -> NativeResult<BindParamInfo>;
    fn bind_param(&mut self, stmt: StmtHandle, index: usize, param: &BindParam) -> NativeResult<()>;

    /// Append a chunk to a parameter bound with [`crate::models::DataType::InvalidType`].
    ///
    /// An empty chunk ends the parameter. Returns `true` once the deferred
    /// execution has run.
    fn send_param_data(&mut self, stmt: StmtHandle, index: usize, data: &[u8]) -> NativeResult<bool>;

    /// Number of rows carried by each bound parameter buffer.
    fn set_batch_size(&mut self, stmt: StmtHandle, rows: usize) -> NativeResult<()>;

    fn execute(&mut self, stmt: StmtHandle) -> NativeResult<()>;

    /// Rows affected by the last execution, `-1` when unknown.
    fn affected_rows(&self, stmt: StmtHandle) -> i64;
    fn num_cols(&self, stmt: StmtHandle) -> usize;
    fn get_column_info(&self, stmt: StmtHandle, col: usize) -> NativeResult<ColumnInfo>;
    fn function_code(&self, stmt: StmtHandle) -> i32;

    fn set_rowset_size(&mut self, stmt: StmtHandle, rows: usize) -> NativeResult<()>;

    /// Hand a row-set buffer for column `col` to the statement; fetches fill it.
    fn bind_column(&mut self, stmt: StmtHandle, col: usize, buffer: DataValue) -> NativeResult<()>;
    fn bound_column(&self, stmt: StmtHandle, col: usize) -> NativeResult<&DataValue>;

    /// Advance to the next row-set. `false` once the rows are exhausted.
    fn fetch_next(&mut self, stmt: StmtHandle) -> NativeResult<bool>;
    /// Rows filled by the last fetch.
    fn fetched_rows(&self, stmt: StmtHandle) -> usize;

    /// Value of column `col` in the current row.
    fn get_column(&mut self, stmt: StmtHandle, col: usize) -> NativeResult<DataValue>;

    /// Byte length of column `col` in the current row.
    fn get_data_size(&mut self, stmt: StmtHandle, col: usize) -> NativeResult<usize>;

    /// Copy bytes of column `col` starting at `offset` into `buf`.
    fn get_data(
        &mut self,
        stmt: StmtHandle,
        col: usize,
        offset: usize,
        buf: &mut [u8],
    ) -> NativeResult<usize>;

    /// Advance to the next result set of a multi-result response.
    fn get_next_result(&mut self, stmt: StmtHandle) -> NativeResult<bool>;
}
