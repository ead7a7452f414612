/// Connection lifecycle and the per-connection handle guard
///
/// A [`Connection`] owns one native connection handle behind a [`HandleGuard`].
/// Every native call on the connection, and on any statement or result set it
/// issued, goes through that guard's lock.
///
/// States: `Unconnected -> Connecting -> Connected -> Disconnecting -> Unconnected`.
/// A failed connect frees the handle. Disconnect always frees the handle, and
/// dropping a connection disconnects it, leaving its statements and result sets inert.
use once_cell::sync::Lazy;
use rustler::{Atom, Encoder, Env, NifResult, Term};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::conn_string::{build_connect_string, ConnectParams};
use crate::constants::*;
use crate::cursor::{CursorState, ResultSet};
use crate::driver::libsql_driver::LibsqlDriver;
use crate::driver::{Driver, NativeConnection, WarningCallback};
use crate::engine::{self, PendingParamData};
use crate::error::{Error, Result};
use crate::models::{BindParam, ExecOutcome, HostValue, StmtHandle};
use crate::statement::Statement;
use crate::terms;
use crate::utils::safe_lock;

/// Process-wide native client used by connections created from the host.
pub static LIBSQL_DRIVER: Lazy<Arc<dyn Driver>> = Lazy::new(|| Arc::new(LibsqlDriver));

/// Bookkeeping for a prepared statement.
#[derive(Debug, Default)]
pub struct PreparedState {
    /// Values of the last completed execution
    pub params: Vec<BindParam>,
    /// Set while the statement waits for streamed parameter data
    pub pending: Option<PendingParamData>,
}

/// Everything guarded by a connection's lock.
pub struct HandleState {
    native: Option<Box<dyn NativeConnection>>,
    connected: bool,
    auto_commit: bool,
    external: bool,
    warning: Option<WarningCallback>,
    pub(crate) statements: HashMap<StmtHandle, PreparedState>,
    pub(crate) cursors: HashMap<StmtHandle, CursorState>,
}

impl HandleState {
    fn new() -> Self {
        HandleState {
            native: None,
            connected: false,
            auto_commit: true,
            external: false,
            warning: None,
            statements: HashMap::new(),
            cursors: HashMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.native.is_some()
    }

    /// The native connection, if connected.
    pub fn native(&mut self) -> Result<&mut dyn NativeConnection> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        match self.native.as_deref_mut() {
            Some(native) => Ok(native),
            None => Err(Error::NotConnected),
        }
    }

    /// The native connection together with statement and cursor bookkeeping.
    #[allow(clippy::type_complexity)]
    pub fn split(
        &mut self,
    ) -> Result<(
        &mut dyn NativeConnection,
        &mut HashMap<StmtHandle, PreparedState>,
        &mut HashMap<StmtHandle, CursorState>,
    )> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        match self.native.as_deref_mut() {
            Some(native) => Ok((native, &mut self.statements, &mut self.cursors)),
            None => Err(Error::NotConnected),
        }
    }

    /// Free a statement handle if the connection still holds it.
    pub fn free_statement(&mut self, handle: StmtHandle) {
        self.statements.remove(&handle);
        self.cursors.remove(&handle);
        if let Some(native) = self.native.as_deref_mut() {
            native.free_stmt(handle);
        }
    }

    /// Disconnect (unless external) and free the handle.
    fn teardown(&mut self) -> Result<()> {
        let Some(mut native) = self.native.take() else {
            return Err(Error::NotConnected);
        };
        native.register_warning_callback(None);

        let mut result = Ok(());
        if self.connected && !self.external {
            if let Err(e) = native.disconnect() {
                result = Err(Error::Native(e));
            }
        }
        drop(native);

        self.statements.clear();
        self.cursors.clear();
        if self.connected {
            self.connected = false;
            let open = OPEN_CONNECTIONS
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
                .map_or(0, |n| n.saturating_sub(1));
            log::debug!("connection closed, {open} still open");
        }
        self.external = false;
        result
    }
}

/// A native connection handle and the lock that serializes access to it.
pub struct HandleGuard {
    state: Mutex<HandleState>,
}

impl HandleGuard {
    fn new() -> Self {
        HandleGuard {
            state: Mutex::new(HandleState::new()),
        }
    }

    pub fn lock(&self, context: &str) -> Result<MutexGuard<'_, HandleState>> {
        safe_lock(&self.state, context)
    }

    /// Lock for teardown paths, where a poisoned lock must not stop the release.
    pub(crate) fn lock_for_release(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn count_open(state: &mut HandleState) {
    if !state.connected {
        state.connected = true;
        let open = OPEN_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("connection opened, {open} open");
    }
}

/// Host-facing connection object.
pub struct Connection {
    guard: Arc<HandleGuard>,
    driver: Arc<dyn Driver>,
    defaults: ConnectParams,
}

impl Connection {
    /// New unconnected connection on the libsql driver.
    pub fn new(defaults: ConnectParams) -> Self {
        Self::with_driver(Arc::clone(&LIBSQL_DRIVER), defaults)
    }

    pub fn with_driver(driver: Arc<dyn Driver>, defaults: ConnectParams) -> Self {
        Connection {
            guard: Arc::new(HandleGuard::new()),
            driver,
            defaults,
        }
    }

    pub fn guard(&self) -> &Arc<HandleGuard> {
        &self.guard
    }

    /// Connect with `params` appended to the constructor defaults.
    ///
    /// An already allocated handle is reused; a failed connect frees it.
    pub fn connect(&self, params: &ConnectParams) -> Result<()> {
        let conn_str = build_connect_string(&self.defaults, params);
        let mut state = self.guard.lock("connect")?;

        if state.native.is_none() {
            state.native = Some(self.driver.new_connection()?);
        }
        let auto_commit = state.auto_commit;
        let warning = state.warning.clone();

        let connected = match state.native.as_deref_mut() {
            Some(native) => native.set_autocommit(auto_commit).and_then(|()| {
                native.connect(&conn_str)?;
                native.register_warning_callback(warning);
                Ok(())
            }),
            None => return Err(Error::NotConnected),
        };
        if let Err(e) = connected {
            log::debug!("connect failed: {e}");
            state.native = None;
            state.statements.clear();
            state.cursors.clear();
            if state.connected {
                state.connected = false;
                OPEN_CONNECTIONS
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
                    .ok();
            }
            return Err(Error::Native(e));
        }

        state.external = false;
        count_open(&mut state);
        Ok(())
    }

    /// Adopt a native connection opened elsewhere.
    ///
    /// The connection is not connected or disconnected natively, but its handle
    /// is still freed on disconnect.
    pub fn connect_external(&self, mut native: Box<dyn NativeConnection>) -> Result<()> {
        let mut state = self.guard.lock("connect_external")?;
        if state.connected {
            state.teardown()?;
        }
        native.set_autocommit(state.auto_commit)?;
        native.register_warning_callback(state.warning.clone());
        state.native = Some(native);
        state.external = true;
        count_open(&mut state);
        Ok(())
    }

    pub fn disconnect(&self) -> Result<()> {
        let mut state = self.guard.lock("disconnect")?;
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state.teardown()
    }

    pub fn is_connected(&self) -> bool {
        self.guard
            .lock("is_connected")
            .map(|state| state.is_connected())
            .unwrap_or(false)
    }

    /// Execute ad hoc SQL.
    pub fn exec(&self, sql: &str, values: Vec<HostValue>) -> Result<ExecOutcome> {
        let mut state = self.guard.lock("exec")?;
        engine::execute_adhoc(state.native()?, sql, values)
    }

    /// Execute a query and keep its result set open.
    pub fn exec_query(&self, sql: &str, values: Vec<HostValue>) -> Result<ResultSet> {
        let mut state = self.guard.lock("exec_query")?;
        let (native, _, cursors) = state.split()?;
        let (handle, columns) = engine::open_cursor(native, sql, values)?;
        cursors.insert(handle, CursorState::new(columns));
        Ok(ResultSet::new(Arc::clone(&self.guard), handle))
    }

    pub fn prepare(&self, sql: &str) -> Result<Statement> {
        let mut state = self.guard.lock("prepare")?;
        let (native, statements, _) = state.split()?;
        let handle = native.prepare(sql)?;
        statements.insert(handle, PreparedState::default());
        log::trace!("prepared statement {}", handle.0);
        Ok(Statement::new(Arc::clone(&self.guard), handle, sql))
    }

    pub fn commit(&self) -> Result<()> {
        let mut state = self.guard.lock("commit")?;
        Ok(state.native()?.commit()?)
    }

    pub fn rollback(&self) -> Result<()> {
        let mut state = self.guard.lock("rollback")?;
        Ok(state.native()?.rollback()?)
    }

    /// Store the auto-commit flag; applied now when connected, otherwise on connect.
    pub fn set_auto_commit(&self, on: bool) -> Result<()> {
        let mut state = self.guard.lock("set_auto_commit")?;
        state.auto_commit = on;
        if state.connected {
            state.native()?.set_autocommit(on)?;
        }
        Ok(())
    }

    /// Set (or clear, with `None`) a client info property, allocating the handle if needed.
    pub fn set_client_info(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut state = self.guard.lock("set_client_info")?;
        if state.native.is_none() {
            state.native = Some(self.driver.new_connection()?);
        }
        match state.native.as_deref_mut() {
            Some(native) => Ok(native.set_clientinfo(key, value)?),
            None => Err(Error::NotConnected),
        }
    }

    pub fn get_client_info(&self, key: &str) -> Result<Option<String>> {
        let state = self.guard.lock("get_client_info")?;
        Ok(state.native.as_ref().and_then(|n| n.get_clientinfo(key)))
    }

    /// Subscribe to (or, with `None`, stop receiving) native warnings.
    pub fn set_warning_callback(&self, callback: Option<WarningCallback>) -> Result<()> {
        let mut state = self.guard.lock("set_warning_callback")?;
        state.warning.clone_from(&callback);
        if let Some(native) = state.native.as_deref_mut() {
            native.register_warning_callback(callback);
        }
        Ok(())
    }

    pub fn client_version(&self) -> String {
        self.driver.client_version()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let mut state = self.guard.lock_for_release();
        if state.native.is_some() {
            if let Err(e) = state.teardown() {
                log::warn!("disconnect on drop failed: {e}");
            }
        }
    }
}

/// Finalize the native client when no connection is open. Returns whether it did.
pub fn clean_api(driver: &dyn Driver) -> bool {
    if OPEN_CONNECTIONS.load(Ordering::SeqCst) > 0 {
        return false;
    }
    driver.finalize();
    true
}

pub(crate) fn get_connection(id: &str) -> Result<Arc<Connection>> {
    safe_lock(&CONNECTION_REGISTRY, "get_connection")?
        .get(id)
        .cloned()
        .ok_or(Error::InvalidObject)
}

/// Create an unconnected connection with default connect parameters.
///
/// `defaults` is `nil`, a connection string, or a keyword list/map such as
/// `[host: "h", port: 30015, uid: "system", pwd: "x"]`.
/// Returns the connection ID.
#[rustler::nif]
pub fn new_connection(defaults: Term) -> NifResult<String> {
    let defaults = terms::decode_connect_params(defaults, "createConnection([conn_params])")?;
    let conn_id = Uuid::new_v4().to_string();
    safe_lock(&CONNECTION_REGISTRY, "new_connection registry")?
        .insert(conn_id.clone(), Arc::new(Connection::new(defaults)));
    Ok(conn_id)
}

/// Connect, appending `params` to the connection's defaults.
#[rustler::nif(schedule = "DirtyIo")]
pub fn connect<'a>(env: Env<'a>, conn_id: &str, params: Term<'a>, deferred: bool) -> NifResult<Term<'a>> {
    let params = terms::decode_connect_params(params, "Connection::connect([conn_params])")?;
    let conn = get_connection(conn_id)?;
    terms::dispatch(env, deferred, move || conn.connect(&params), terms::encode_ok)
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn disconnect<'a>(env: Env<'a>, conn_id: &str, deferred: bool) -> NifResult<Term<'a>> {
    let conn = get_connection(conn_id)?;
    terms::dispatch(env, deferred, move || conn.disconnect(), terms::encode_ok)
}

/// Execute ad hoc SQL. Returns rows (a list of maps), an affected-row count, or `nil`.
#[rustler::nif(schedule = "DirtyIo")]
pub fn exec<'a>(
    env: Env<'a>,
    conn_id: &str,
    sql: String,
    args: Vec<Term<'a>>,
    deferred: bool,
) -> NifResult<Term<'a>> {
    let values = terms::decode_host_values(args)?;
    let conn = get_connection(conn_id)?;
    terms::dispatch(env, deferred, move || conn.exec(&sql, values), terms::encode_outcome)
}

/// Execute a query and return a result set ID.
#[rustler::nif(schedule = "DirtyIo")]
pub fn exec_query<'a>(
    env: Env<'a>,
    conn_id: &str,
    sql: String,
    args: Vec<Term<'a>>,
    deferred: bool,
) -> NifResult<Term<'a>> {
    let values = terms::decode_host_values(args)?;
    let conn = get_connection(conn_id)?;
    terms::dispatch(
        env,
        deferred,
        move || {
            let rs = conn.exec_query(&sql, values)?;
            let id = Uuid::new_v4().to_string();
            safe_lock(&RESULT_SET_REGISTRY, "exec_query registry")?.insert(id.clone(), Arc::new(rs));
            Ok(id)
        },
        terms::encode_encoder::<String>,
    )
}

/// Prepare a statement and return its ID.
#[rustler::nif(schedule = "DirtyIo")]
pub fn prepare<'a>(env: Env<'a>, conn_id: &str, sql: String, deferred: bool) -> NifResult<Term<'a>> {
    let conn = get_connection(conn_id)?;
    terms::dispatch(
        env,
        deferred,
        move || {
            let stmt = conn.prepare(&sql)?;
            let id = Uuid::new_v4().to_string();
            safe_lock(&STMT_REGISTRY, "prepare registry")?.insert(id.clone(), Arc::new(stmt));
            Ok(id)
        },
        terms::encode_encoder::<String>,
    )
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn commit<'a>(env: Env<'a>, conn_id: &str, deferred: bool) -> NifResult<Term<'a>> {
    let conn = get_connection(conn_id)?;
    terms::dispatch(env, deferred, move || conn.commit(), terms::encode_ok)
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn rollback<'a>(env: Env<'a>, conn_id: &str, deferred: bool) -> NifResult<Term<'a>> {
    let conn = get_connection(conn_id)?;
    terms::dispatch(env, deferred, move || conn.rollback(), terms::encode_ok)
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn set_auto_commit(conn_id: &str, on: bool) -> NifResult<Atom> {
    get_connection(conn_id)?.set_auto_commit(on)?;
    Ok(ok())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn set_client_info(conn_id: &str, key: &str, value: Option<String>) -> NifResult<Atom> {
    get_connection(conn_id)?.set_client_info(key, value.as_deref())?;
    Ok(ok())
}

#[rustler::nif]
pub fn get_client_info(conn_id: &str, key: &str) -> NifResult<Option<String>> {
    Ok(get_connection(conn_id)?.get_client_info(key)?)
}

/// Route native warnings to the calling process as
/// `{:dbcapi_warning, conn_id, {code, message, sql_state}}`, or stop doing so.
#[rustler::nif]
pub fn set_warning_handler(env: Env, conn_id: &str, enabled: bool) -> NifResult<Atom> {
    let conn = get_connection(conn_id)?;
    let callback: Option<WarningCallback> = if enabled {
        let pid = env.pid();
        let id = conn_id.to_string();
        Some(Arc::new(move |warning| {
            terms::send_warning(pid, id.clone(), warning.clone());
        }))
    } else {
        None
    };
    conn.set_warning_callback(callback)?;
    Ok(ok())
}

#[rustler::nif]
pub fn is_connected(conn_id: &str) -> NifResult<bool> {
    Ok(get_connection(conn_id)?.is_connected())
}

#[rustler::nif]
pub fn client_version() -> String {
    LIBSQL_DRIVER.client_version()
}

/// Finalize the native client if no connection is open.
#[rustler::nif(name = "clean_api")]
pub fn clean_api_nif() -> bool {
    clean_api(LIBSQL_DRIVER.as_ref())
}

/// Release a connection, statement or result set.
///
/// `kind` is `:conn_id`, `:stmt_id` or `:result_set_id`. Dropping the last
/// reference disconnects a connection, drops a statement and closes a result set.
#[rustler::nif(schedule = "DirtyIo")]
pub fn close<'a>(env: Env<'a>, id: &str, kind: Atom) -> NifResult<Term<'a>> {
    let found = if kind == conn_id() {
        safe_lock(&CONNECTION_REGISTRY, "close conn")?.remove(id).is_some()
    } else if kind == stmt_id() {
        safe_lock(&STMT_REGISTRY, "close stmt")?.remove(id).is_some()
    } else if kind == result_set_id() {
        safe_lock(&RESULT_SET_REGISTRY, "close result set")?.remove(id).is_some()
    } else {
        return Err(Error::InvalidArguments.into());
    };

    if found {
        Ok(ok().encode(env))
    } else {
        Err(Error::InvalidObject.into())
    }
}
