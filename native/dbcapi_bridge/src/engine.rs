/// Execution engine
///
/// Drives one execution against a native statement:
/// `Idle -> Preparing -> Resetting -> ParameterCountCheck -> Binding -> Executing -> Fetching -> Done`,
/// with any failure moving to `Failed`. Ad hoc SQL gets a statement prepared for the
/// call and freed afterwards; prepared statements are reset and reused.
///
/// Every function here expects the caller to hold the connection lock.
use std::fmt;

use crate::convert;
use crate::driver::NativeConnection;
use crate::error::{Error, IndexKind, Result};
use crate::models::{BindParam, ColumnInfo, ExecOutcome, HostValue, StmtHandle};
use crate::params;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPhase {
    Idle,
    Preparing,
    Resetting,
    ParameterCountCheck,
    Binding,
    Executing,
    Fetching,
    Done,
    Failed,
}

impl fmt::Display for ExecPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Phase tracker for one execution.
#[derive(Debug)]
pub struct Execution {
    label: &'static str,
    phase: ExecPhase,
}

impl Execution {
    pub fn new(label: &'static str) -> Self {
        Execution {
            label,
            phase: ExecPhase::Idle,
        }
    }

    pub fn phase(&self) -> ExecPhase {
        self.phase
    }

    fn enter(&mut self, phase: ExecPhase) {
        log::trace!("{}: {} -> {}", self.label, self.phase, phase);
        self.phase = phase;
    }

    /// Run one phase, moving to `Failed` when it errors.
    fn step<T>(&mut self, phase: ExecPhase, work: impl FnOnce() -> Result<T>) -> Result<T> {
        self.enter(phase);
        work().inspect_err(|e| {
            log::debug!("{} failed while {}: {e}", self.label, self.phase);
            self.phase = ExecPhase::Failed;
        })
    }

    fn finish(&mut self) {
        self.enter(ExecPhase::Done);
    }
}

/// Waiting for streamed LOB bytes: `(parameter index, bytes still expected)`.
#[derive(Debug, PartialEq)]
pub struct PendingParamData {
    pub remaining: Vec<(usize, usize)>,
    pub params: Vec<BindParam>,
}

/// Result of a prepared execution.
#[derive(Debug)]
pub struct PreparedRun {
    pub outcome: ExecOutcome,
    /// The records the statement ran with
    pub bound: Vec<BindParam>,
    /// Set when the statement waits for streamed parameter data
    pub pending: Option<PendingParamData>,
}

/// Count check, merge and bind on an already reset statement.
fn bind_all(
    exec: &mut Execution,
    native: &mut dyn NativeConnection,
    stmt: StmtHandle,
    provided: Vec<BindParam>,
) -> Result<(Vec<BindParam>, bool)> {
    let declared = exec.step(ExecPhase::ParameterCountCheck, || {
        let declared = params::describe_params(native, stmt)?;
        params::check_parameter_count(provided.len(), &declared)?;
        Ok(declared)
    })?;
    exec.step(ExecPhase::Binding, || {
        let bound = params::merge_with_declared(native, stmt, declared, provided)?;
        let send_param_data = params::bind_parameters(native, stmt, &bound)?;
        Ok((bound, send_param_data))
    })
}

/// Execute ad hoc SQL. The statement prepared for the call is always freed.
pub fn execute_adhoc(
    native: &mut dyn NativeConnection,
    sql: &str,
    values: Vec<HostValue>,
) -> Result<ExecOutcome> {
    let mut exec = Execution::new("exec");
    let provided = params::to_bind_params(values);
    if let Some((index, _)) = params::lob_placeholders(&provided).first() {
        exec.enter(ExecPhase::Failed);
        return Err(Error::Binding { index: Some(*index) });
    }

    let stmt = exec.step(ExecPhase::Preparing, || Ok(native.prepare(sql)?))?;
    let result = run_adhoc(&mut exec, native, stmt, provided);
    native.free_stmt(stmt);
    result
}

fn run_adhoc(
    exec: &mut Execution,
    native: &mut dyn NativeConnection,
    stmt: StmtHandle,
    provided: Vec<BindParam>,
) -> Result<ExecOutcome> {
    exec.step(ExecPhase::Resetting, || Ok(native.reset(stmt)?))?;
    bind_all(exec, native, stmt, provided)?;
    exec.step(ExecPhase::Executing, || Ok(native.execute(stmt)?))?;
    let outcome = exec.step(ExecPhase::Fetching, || convert::fetch_result_set(native, stmt))?;
    exec.finish();
    Ok(outcome)
}

/// Execute a prepared statement with fresh parameter values.
///
/// When a LOB placeholder was bound the statement is left waiting for parameter
/// data and the outcome is `NoResult`.
pub fn execute_prepared(
    native: &mut dyn NativeConnection,
    stmt: StmtHandle,
    values: Vec<HostValue>,
) -> Result<PreparedRun> {
    let mut exec = Execution::new("statement exec");
    exec.step(ExecPhase::Resetting, || Ok(native.reset(stmt)?))?;
    let (bound, send_param_data) = bind_all(&mut exec, native, stmt, params::to_bind_params(values))?;
    exec.step(ExecPhase::Executing, || Ok(native.execute(stmt)?))?;

    if send_param_data {
        let remaining = params::lob_placeholders(&bound);
        log::debug!("statement waits for data on {} parameter(s)", remaining.len());
        exec.finish();
        return Ok(PreparedRun {
            outcome: ExecOutcome::NoResult,
            bound: Vec::new(),
            pending: Some(PendingParamData {
                remaining,
                params: bound,
            }),
        });
    }

    let outcome = exec.step(ExecPhase::Fetching, || convert::fetch_result_set(native, stmt))?;
    exec.finish();
    Ok(PreparedRun {
        outcome,
        bound,
        pending: None,
    })
}

/// Execute a prepared statement once per row of `rows`. Returns the rows affected.
pub fn execute_batch(
    native: &mut dyn NativeConnection,
    stmt: StmtHandle,
    rows: &[Vec<HostValue>],
) -> Result<i64> {
    let mut exec = Execution::new("statement exec_batch");
    let provided = exec.step(ExecPhase::Binding, || params::build_batch_params(rows))?;
    exec.step(ExecPhase::Resetting, || Ok(native.reset(stmt)?))?;
    bind_all(&mut exec, native, stmt, provided)?;
    exec.step(ExecPhase::Executing, || {
        native.set_batch_size(stmt, rows.len())?;
        native.execute(stmt)?;
        Ok(())
    })?;
    let affected = native.affected_rows(stmt).max(0);
    exec.finish();
    Ok(affected)
}

/// Prepare, bind and execute `sql` on a statement that stays open for a cursor.
///
/// On failure the statement is freed.
pub fn open_cursor(
    native: &mut dyn NativeConnection,
    sql: &str,
    values: Vec<HostValue>,
) -> Result<(StmtHandle, Vec<ColumnInfo>)> {
    let mut exec = Execution::new("exec_query");
    let provided = params::to_bind_params(values);
    if let Some((index, _)) = params::lob_placeholders(&provided).first() {
        exec.enter(ExecPhase::Failed);
        return Err(Error::Binding { index: Some(*index) });
    }

    let stmt = exec.step(ExecPhase::Preparing, || Ok(native.prepare(sql)?))?;
    let opened = (|| {
        exec.step(ExecPhase::Resetting, || Ok(native.reset(stmt)?))?;
        bind_all(&mut exec, native, stmt, provided)?;
        exec.step(ExecPhase::Executing, || Ok(native.execute(stmt)?))?;
        let columns = convert::column_infos(native, stmt)?;
        if columns.is_empty() {
            return Err(Error::ResultSet);
        }
        exec.finish();
        Ok(columns)
    })();

    match opened {
        Ok(columns) => Ok((stmt, columns)),
        Err(e) => {
            native.free_stmt(stmt);
            Err(e)
        }
    }
}

/// Stream one chunk of LOB bytes to a statement waiting for parameter data.
///
/// Returns the outcome once the deferred execution ran, `None` while more data
/// is expected.
pub fn send_param_data(
    native: &mut dyn NativeConnection,
    stmt: StmtHandle,
    pending: &mut PendingParamData,
    index: usize,
    data: &[u8],
) -> Result<Option<ExecOutcome>> {
    let Some(pos) = pending.remaining.iter().position(|(i, _)| *i == index) else {
        return Err(Error::InvalidIndex(IndexKind::Parameter));
    };

    let completed = native.send_param_data(stmt, index, data)?;
    let left = pending.remaining[pos].1.saturating_sub(data.len());
    if data.is_empty() || left == 0 {
        pending.remaining.remove(pos);
    } else {
        pending.remaining[pos].1 = left;
    }

    if !completed {
        return Ok(None);
    }
    let mut exec = Execution::new("send_parameter_data");
    let outcome = exec.step(ExecPhase::Fetching, || convert::fetch_result_set(native, stmt))?;
    exec.finish();
    Ok(Some(outcome))
}
