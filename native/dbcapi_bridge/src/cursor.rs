/// Result sets
///
/// A [`ResultSet`] is the live output of a query, fetched one row at a time. Like
/// statements it shares the connection's lock.
///
/// States: `Open -> (fetching rows)* -> Closed`. Closing twice is a no-op. Moving
/// past the last result set closes it.
use rustler::{Encoder, Env, NifResult, Term};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connection::HandleGuard;
use crate::constants::RESULT_SET_REGISTRY;
use crate::convert;
use crate::driver::NativeConnection;
use crate::error::{Error, IndexKind, Result};
use crate::models::{ColumnInfo, HostValue, Row, StmtHandle};
use crate::terms;
use crate::utils::safe_lock;

/// Per-cursor bookkeeping kept under the connection lock.
#[derive(Debug)]
pub struct CursorState {
    pub columns: Vec<ColumnInfo>,
    /// Set by the first `next`; values can only be read after it
    pub fetched_first: bool,
}

impl CursorState {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        CursorState {
            columns,
            fetched_first: false,
        }
    }

    fn column(&self, col: usize) -> Result<&ColumnInfo> {
        self.columns
            .get(col)
            .ok_or(Error::InvalidIndex(IndexKind::Column))
    }
}

pub struct ResultSet {
    guard: Arc<HandleGuard>,
    handle: StmtHandle,
    closed: AtomicBool,
}

impl ResultSet {
    pub(crate) fn new(guard: Arc<HandleGuard>, handle: StmtHandle) -> Self {
        ResultSet {
            guard,
            handle,
            closed: AtomicBool::new(false),
        }
    }

    fn with_cursor<T>(
        &self,
        context: &str,
        f: impl FnOnce(&mut dyn NativeConnection, &mut CursorState) -> Result<T>,
    ) -> Result<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidObject);
        }
        let mut state = self.guard.lock(context)?;
        let (native, _, cursors) = state.split()?;
        let cursor = cursors.get_mut(&self.handle).ok_or(Error::InvalidObject)?;
        f(native, cursor)
    }

    /// Advance to the next row. `false` once the rows are exhausted.
    pub fn next(&self) -> Result<bool> {
        self.with_cursor("result set next", |native, cursor| {
            let more = native.fetch_next(self.handle)?;
            cursor.fetched_first = true;
            Ok(more)
        })
    }

    /// Advance to the next result set, closing this one when there is none.
    pub fn next_result(&self) -> Result<bool> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidObject);
        }
        let mut state = self.guard.lock("result set next_result")?;
        let (native, _, cursors) = state.split()?;
        if !cursors.contains_key(&self.handle) {
            return Err(Error::InvalidObject);
        }

        if native.get_next_result(self.handle)? {
            let columns = convert::column_infos(native, self.handle)?;
            cursors.insert(self.handle, CursorState::new(columns));
            return Ok(true);
        }

        self.closed.store(true, Ordering::SeqCst);
        state.free_statement(self.handle);
        log::trace!("result set {} exhausted and closed", self.handle.0);
        Ok(false)
    }

    /// Value of column `col` in the current row.
    pub fn get_value(&self, col: usize) -> Result<HostValue> {
        self.with_cursor("result set get_value", |native, cursor| {
            if !cursor.fetched_first {
                return Err(Error::ResultSet);
            }
            let native_type = cursor.column(col)?.native_type;
            let value = native.get_column(self.handle, col)?;
            match value.row(0) {
                Some(cell) => convert::decode_cell(cell, native_type),
                None => Ok(HostValue::Null),
            }
        })
    }

    /// The current row keyed by column name.
    pub fn get_values(&self) -> Result<Row> {
        self.with_cursor("result set get_values", |native, cursor| {
            if !cursor.fetched_first {
                return Err(Error::ResultSet);
            }
            convert::read_current_row(native, self.handle, &cursor.columns)
        })
    }

    pub fn get_column_count(&self) -> Result<usize> {
        self.with_cursor("result set get_column_count", |_, cursor| Ok(cursor.columns.len()))
    }

    pub fn get_column_name(&self, col: usize) -> Result<String> {
        self.with_cursor("result set get_column_name", |_, cursor| {
            Ok(cursor.column(col)?.name.clone())
        })
    }

    pub fn get_column_info(&self) -> Result<Vec<ColumnInfo>> {
        self.with_cursor("result set get_column_info", |_, cursor| Ok(cursor.columns.clone()))
    }

    /// Read up to `len` bytes of column `col` starting at `offset`.
    ///
    /// Returns fewer bytes at the end of the value and none past it.
    pub fn get_data(&self, col: usize, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.with_cursor("result set get_data", |native, cursor| {
            if !cursor.fetched_first {
                return Err(Error::ResultSet);
            }
            cursor.column(col)?;
            let size = native.get_data_size(self.handle, col)?;
            let mut buf = vec![0u8; len.min(size.saturating_sub(offset))];
            let read = native.get_data(self.handle, col, offset, &mut buf)?;
            buf.truncate(read);
            Ok(buf)
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Open, and its connection still holds the cursor.
    pub fn is_valid(&self) -> bool {
        !self.is_closed()
            && self
                .guard
                .lock("result set is_valid")
                .map(|state| state.is_connected() && state.cursors.contains_key(&self.handle))
                .unwrap_or(false)
    }

    /// Free the native statement. Closing a closed result set does nothing.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.guard.lock_for_release().free_statement(self.handle);
        }
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        self.close();
    }
}

fn get_result_set(id: &str) -> Result<Arc<ResultSet>> {
    safe_lock(&RESULT_SET_REGISTRY, "get_result_set")?
        .get(id)
        .cloned()
        .ok_or(Error::InvalidObject)
}

fn encode_value<'a>(env: Env<'a>, value: HostValue) -> Term<'a> {
    terms::encode_host_value(env, &value)
}

fn encode_row<'a>(env: Env<'a>, row: Row) -> Term<'a> {
    terms::encode_row(env, &row)
}

fn encode_data<'a>(env: Env<'a>, data: Vec<u8>) -> Term<'a> {
    terms::encode_bytes(env, &data)
}

/// Advance to the next row.
#[rustler::nif(schedule = "DirtyIo")]
pub fn rs_next<'a>(env: Env<'a>, rs_id: &str, deferred: bool) -> NifResult<Term<'a>> {
    let rs = get_result_set(rs_id)?;
    terms::dispatch(env, deferred, move || rs.next(), terms::encode_encoder::<bool>)
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn rs_next_result<'a>(env: Env<'a>, rs_id: &str, deferred: bool) -> NifResult<Term<'a>> {
    let rs = get_result_set(rs_id)?;
    terms::dispatch(env, deferred, move || rs.next_result(), terms::encode_encoder::<bool>)
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn rs_get_value<'a>(env: Env<'a>, rs_id: &str, col: usize, deferred: bool) -> NifResult<Term<'a>> {
    let rs = get_result_set(rs_id)?;
    terms::dispatch(env, deferred, move || rs.get_value(col), encode_value)
}

/// The current row as a map of column name to value.
#[rustler::nif(schedule = "DirtyIo")]
pub fn rs_get_values<'a>(env: Env<'a>, rs_id: &str, deferred: bool) -> NifResult<Term<'a>> {
    let rs = get_result_set(rs_id)?;
    terms::dispatch(env, deferred, move || rs.get_values(), encode_row)
}

#[rustler::nif]
pub fn rs_column_count(rs_id: &str) -> NifResult<usize> {
    Ok(get_result_set(rs_id)?.get_column_count()?)
}

#[rustler::nif]
pub fn rs_column_name(rs_id: &str, col: usize) -> NifResult<String> {
    Ok(get_result_set(rs_id)?.get_column_name(col)?)
}

#[rustler::nif]
pub fn rs_column_info<'a>(env: Env<'a>, rs_id: &str) -> NifResult<Term<'a>> {
    let infos = get_result_set(rs_id)?.get_column_info()?;
    Ok(terms::encode_column_infos(env, infos))
}

/// Read a chunk of a (LOB) column value.
#[rustler::nif(schedule = "DirtyIo")]
pub fn rs_get_data<'a>(
    env: Env<'a>,
    rs_id: &str,
    col: usize,
    offset: usize,
    len: usize,
    deferred: bool,
) -> NifResult<Term<'a>> {
    let rs = get_result_set(rs_id)?;
    terms::dispatch(env, deferred, move || rs.get_data(col, offset, len), encode_data)
}

#[rustler::nif]
pub fn rs_is_closed(rs_id: &str) -> NifResult<bool> {
    Ok(get_result_set(rs_id)?.is_closed())
}

#[rustler::nif]
pub fn rs_is_valid(rs_id: &str) -> NifResult<bool> {
    Ok(get_result_set(rs_id)?.is_valid())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn rs_close<'a>(env: Env<'a>, rs_id: &str) -> NifResult<Term<'a>> {
    get_result_set(rs_id)?.close();
    Ok(crate::constants::ok().encode(env))
}
