/// Prepared statements
///
/// A [`Statement`] refers to one native statement handle of its connection. It
/// has no lock of its own: every operation takes the connection's lock.
///
/// States: `Prepared -> (Executing)* -> Dropped`. Once dropped, every operation
/// fails with `InvalidObject` before reaching the native layer. A statement whose
/// connection was closed fails with `NotConnected`.
use rustler::{Binary, Encoder, Env, NifResult, Term};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::connection::{HandleGuard, PreparedState};
use crate::constants::{RESULT_SET_REGISTRY, STMT_REGISTRY};
use crate::convert;
use crate::cursor::{CursorState, ResultSet};
use crate::driver::NativeConnection;
use crate::engine;
use crate::error::{Error, IndexKind, Result};
use crate::models::{BindParam, BindParamInfo, ColumnInfo, ExecOutcome, HostValue, StmtHandle};
use crate::terms;
use crate::utils::safe_lock;

pub struct Statement {
    guard: Arc<HandleGuard>,
    handle: StmtHandle,
    sql: String,
    dropped: AtomicBool,
}

impl Statement {
    pub(crate) fn new(guard: Arc<HandleGuard>, handle: StmtHandle, sql: &str) -> Self {
        Statement {
            guard,
            handle,
            sql: sql.to_string(),
            dropped: AtomicBool::new(false),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Run `f` under the connection lock with the statement's native connection and state.
    fn with_state<T>(
        &self,
        context: &str,
        f: impl FnOnce(
            &mut dyn NativeConnection,
            &mut PreparedState,
            &mut HashMap<StmtHandle, CursorState>,
        ) -> Result<T>,
    ) -> Result<T> {
        if self.dropped.load(Ordering::SeqCst) {
            return Err(Error::InvalidObject);
        }
        let mut state = self.guard.lock(context)?;
        let (native, statements, cursors) = state.split()?;
        let prepared = statements.get_mut(&self.handle).ok_or(Error::InvalidObject)?;
        f(native, prepared, cursors)
    }

    /// Execute with fresh parameter values.
    ///
    /// Binding a LOB placeholder leaves the statement waiting for
    /// [`Statement::send_parameter_data`] and returns `NoResult`.
    pub fn exec(&self, values: Vec<HostValue>) -> Result<ExecOutcome> {
        self.with_state("statement exec", |native, prepared, _| {
            if prepared.pending.is_some() {
                return Err(Error::ParamDataPending);
            }
            let run = engine::execute_prepared(native, self.handle, values)?;
            match run.pending {
                Some(pending) => prepared.pending = Some(pending),
                None => prepared.params = run.bound.iter().map(BindParam::snapshot).collect(),
            }
            Ok(run.outcome)
        })
    }

    /// Execute the statement's SQL on a new native statement and keep its result set open.
    pub fn exec_query(&self, values: Vec<HostValue>) -> Result<ResultSet> {
        self.with_state("statement exec_query", |native, _, cursors| {
            let (handle, columns) = engine::open_cursor(native, &self.sql, values)?;
            cursors.insert(handle, CursorState::new(columns));
            Ok(ResultSet::new(Arc::clone(&self.guard), handle))
        })
    }

    /// Execute once per row. Returns the total rows affected.
    pub fn exec_batch(&self, rows: &[Vec<HostValue>]) -> Result<i64> {
        self.with_state("statement exec_batch", |native, prepared, _| {
            if prepared.pending.is_some() {
                return Err(Error::ParamDataPending);
            }
            engine::execute_batch(native, self.handle, rows)
        })
    }

    /// Stream a chunk of bytes for LOB parameter `index`. An empty chunk ends it.
    ///
    /// Returns the execution outcome once every LOB parameter is complete,
    /// `NoResult` while more data is expected.
    pub fn send_parameter_data(&self, index: usize, data: &[u8]) -> Result<ExecOutcome> {
        self.with_state("statement send_parameter_data", |native, prepared, _| {
            let Some(mut pending) = prepared.pending.take() else {
                return Err(Error::General(
                    "Statement is not waiting for parameter data".to_string(),
                ));
            };
            match engine::send_param_data(native, self.handle, &mut pending, index, data) {
                Ok(Some(outcome)) => {
                    prepared.params = pending.params;
                    Ok(outcome)
                }
                Ok(None) => {
                    prepared.pending = Some(pending);
                    Ok(ExecOutcome::NoResult)
                }
                Err(e @ Error::InvalidIndex(_)) => {
                    prepared.pending = Some(pending);
                    Err(e)
                }
                Err(e) => Err(e),
            }
        })
    }

    /// Free the native statement. Fails if already dropped.
    pub fn drop_statement(&self) -> Result<()> {
        if self.dropped.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidObject);
        }
        self.guard.lock("statement drop")?.free_statement(self.handle);
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        !self.dropped.load(Ordering::SeqCst)
            && self
                .guard
                .lock("statement is_valid")
                .map(|state| state.is_connected() && state.statements.contains_key(&self.handle))
                .unwrap_or(false)
    }

    pub fn get_parameter_info(&self) -> Result<Vec<BindParamInfo>> {
        self.with_state("statement get_parameter_info", |native, _, _| {
            let count = native.num_params(self.handle)?;
            (0..count)
                .map(|i| native.get_bind_param_info(self.handle, i).map_err(Error::from))
                .collect()
        })
    }

    /// Value bound to parameter `index` by the last completed execution.
    pub fn get_parameter_value(&self, index: usize) -> Result<HostValue> {
        self.with_state("statement get_parameter_value", |native, prepared, _| {
            if index >= native.num_params(self.handle)? {
                return Err(Error::InvalidIndex(IndexKind::Parameter));
            }
            prepared
                .params
                .get(index)
                .map_or(Ok(HostValue::Null), convert::decode_parameter)
        })
    }

    pub fn function_code(&self) -> Result<i32> {
        self.with_state("statement function_code", |native, _, _| {
            Ok(native.function_code(self.handle))
        })
    }

    pub fn get_column_info(&self) -> Result<Vec<ColumnInfo>> {
        self.with_state("statement get_column_info", |native, _, _| {
            convert::column_infos(native, self.handle)
        })
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if !self.dropped.swap(true, Ordering::SeqCst) {
            self.guard.lock_for_release().free_statement(self.handle);
        }
    }
}

fn get_statement(id: &str) -> Result<Arc<Statement>> {
    safe_lock(&STMT_REGISTRY, "get_statement")?
        .get(id)
        .cloned()
        .ok_or(Error::InvalidObject)
}

fn encode_param_infos<'a>(env: Env<'a>, infos: Vec<BindParamInfo>) -> Term<'a> {
    infos
        .iter()
        .map(|info| terms::encode_param_info(env, info))
        .collect::<Vec<_>>()
        .encode(env)
}

fn encode_value<'a>(env: Env<'a>, value: HostValue) -> Term<'a> {
    terms::encode_host_value(env, &value)
}

/// Execute a prepared statement.
#[rustler::nif(schedule = "DirtyIo")]
pub fn stmt_exec<'a>(env: Env<'a>, stmt_id: &str, args: Vec<Term<'a>>, deferred: bool) -> NifResult<Term<'a>> {
    let values = terms::decode_host_values(args)?;
    let stmt = get_statement(stmt_id)?;
    terms::dispatch(env, deferred, move || stmt.exec(values), terms::encode_outcome)
}

/// Execute a prepared statement's query and return a result set ID.
#[rustler::nif(schedule = "DirtyIo")]
pub fn stmt_exec_query<'a>(
    env: Env<'a>,
    stmt_id: &str,
    args: Vec<Term<'a>>,
    deferred: bool,
) -> NifResult<Term<'a>> {
    let values = terms::decode_host_values(args)?;
    let stmt = get_statement(stmt_id)?;
    terms::dispatch(
        env,
        deferred,
        move || {
            let rs = stmt.exec_query(values)?;
            let id = Uuid::new_v4().to_string();
            safe_lock(&RESULT_SET_REGISTRY, "stmt_exec_query registry")?.insert(id.clone(), Arc::new(rs));
            Ok(id)
        },
        terms::encode_encoder::<String>,
    )
}

/// Execute a prepared statement once per row of `rows` (a list of lists).
#[rustler::nif(schedule = "DirtyIo")]
pub fn stmt_exec_batch<'a>(
    env: Env<'a>,
    stmt_id: &str,
    rows: Vec<Term<'a>>,
    deferred: bool,
) -> NifResult<Term<'a>> {
    let rows = terms::decode_batch_rows(rows)?;
    let stmt = get_statement(stmt_id)?;
    terms::dispatch(env, deferred, move || stmt.exec_batch(&rows), terms::encode_encoder::<i64>)
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn stmt_drop<'a>(env: Env<'a>, stmt_id: &str, deferred: bool) -> NifResult<Term<'a>> {
    let stmt = get_statement(stmt_id)?;
    terms::dispatch(env, deferred, move || stmt.drop_statement(), terms::encode_ok)
}

#[rustler::nif]
pub fn stmt_is_valid(stmt_id: &str) -> NifResult<bool> {
    Ok(get_statement(stmt_id)?.is_valid())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn stmt_parameter_info<'a>(env: Env<'a>, stmt_id: &str) -> NifResult<Term<'a>> {
    let infos = get_statement(stmt_id)?.get_parameter_info()?;
    Ok(encode_param_infos(env, infos))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn stmt_parameter_value<'a>(env: Env<'a>, stmt_id: &str, index: usize) -> NifResult<Term<'a>> {
    let value = get_statement(stmt_id)?.get_parameter_value(index)?;
    Ok(encode_value(env, value))
}

/// Stream LOB bytes for parameter `index`.
#[rustler::nif(schedule = "DirtyIo")]
pub fn stmt_send_parameter_data<'a>(
    env: Env<'a>,
    stmt_id: &str,
    index: usize,
    data: Binary,
    deferred: bool,
) -> NifResult<Term<'a>> {
    let bytes = data.as_slice().to_vec();
    let stmt = get_statement(stmt_id)?;
    terms::dispatch(
        env,
        deferred,
        move || stmt.send_parameter_data(index, &bytes),
        terms::encode_outcome,
    )
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn stmt_function_code(stmt_id: &str) -> NifResult<i32> {
    Ok(get_statement(stmt_id)?.function_code()?)
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn stmt_column_info<'a>(env: Env<'a>, stmt_id: &str) -> NifResult<Term<'a>> {
    let infos = get_statement(stmt_id)?.get_column_info()?;
    Ok(terms::encode_column_infos(env, infos))
}

