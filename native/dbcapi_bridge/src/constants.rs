/// Global constants, runtimes, registries and atom declarations
///
/// This module holds the static configuration of the bridge, the process-wide
/// runtimes used by the driver and the dispatch layer, the id-keyed registries
/// of host-visible objects, and the atoms used by the NIF interface.
use lazy_static::lazy_static;
use once_cell::sync::Lazy;
use rustler::atoms;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use tokio::runtime::{Builder, Runtime};

use crate::connection::Connection;
use crate::cursor::ResultSet;
use crate::statement::Statement;

/// Rows fetched per native fetch call when columns are bulk-bound.
pub const ROWSET_SIZE: usize = 10;

/// Appended to every non-external connection string.
pub const CONNECT_SUFFIX: &str = ";CHARSET=UTF-8;SCROLLABLERESULT=0";

/// Initial slot size for character and binary columns that declare no length.
pub const DEFAULT_COLUMN_MAX_SIZE: usize = 5000;

/// Chunk size of a [`crate::stream::LobReader`] unless the caller picks one
pub const LOB_DEFAULT_READ_SIZE: usize = 200 * 1024;

/// Largest chunk a [`crate::stream::LobReader`] requests at once
pub const LOB_MAX_READ_SIZE: usize = 256 * 1024;

/// Upper bound on concurrently running offloaded work items.
pub const WORKER_THREADS: usize = 8;

/// Default native connect timeout (in seconds), overridable with `ConnectTimeout`.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Global Tokio runtime used by the libsql driver to drive its async API.
///
/// IMPORTANT: This panics if runtime creation fails, which only happens when the
/// system has no threads or memory left. Creation happens on first driver use.
pub static TOKIO_RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    Runtime::new()
        .expect("Failed to initialize Tokio runtime - check system resources and thread limits")
});

/// Runtime whose bounded blocking pool executes deferred work items.
///
/// Kept apart from `TOKIO_RUNTIME` so that a worker may block on driver calls.
pub static WORKER_RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(WORKER_THREADS)
        .thread_name("dbcapi-worker")
        .build()
        .expect("Failed to initialize worker runtime - check system resources and thread limits")
});

/// Number of native connections currently open in this process.
///
/// Only used to decide whether the native interface may be finalized.
pub static OPEN_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

// Global registry for host-visible connections - Maps connection ID to Connection
lazy_static! {
    pub static ref CONNECTION_REGISTRY: Mutex<HashMap<String, Arc<Connection>>> =
        Mutex::new(HashMap::new());
}

// Global registry for prepared statements - Maps statement ID to Statement
lazy_static! {
    pub static ref STMT_REGISTRY: Mutex<HashMap<String, Arc<Statement>>> =
        Mutex::new(HashMap::new());
}

// Global registry for open result sets - Maps result set ID to ResultSet
lazy_static! {
    pub static ref RESULT_SET_REGISTRY: Mutex<HashMap<String, Arc<ResultSet>>> =
        Mutex::new(HashMap::new());
}

// Atom declarations - used as return values and option identifiers in the NIF interface
atoms! {
    ok,
    error,
    nil,
    conn_id,
    stmt_id,
    result_set_id,
    dbcapi_reply,
    dbcapi_warning,
    blob,
    lob,
    length,
    input,
    output,
    input_output,
}
