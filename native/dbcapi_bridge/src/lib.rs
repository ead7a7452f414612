//! `DbcapiBridge`: a DBCAPI-style database client for the BEAM
//!
//! This is the root module of the `DbcapiBridge` NIF library. Connections, prepared
//! statements and result sets are exposed as id-keyed objects; every call may run
//! inline or be deferred to the worker pool with its outcome sent back as a message.
pub mod conn_string;
pub mod connection;
pub mod constants;
pub mod convert;
pub mod cursor;
pub mod dispatch;
pub mod driver;
pub mod engine;
pub mod error;
pub mod models;
pub mod params;
pub mod statement;
pub mod stream;
pub mod terms;
pub mod utils;

// Re-export key types for internal use
pub use connection::Connection;
pub use constants::*;
pub use cursor::ResultSet;
pub use error::{Error, Result};
pub use models::*;
pub use statement::Statement;
pub use utils::{detect_function_code, detect_query_type, QueryType};

// Register all NIF functions with Erlang/Elixir
// Note: The rustler::init! macro automatically discovers all #[rustler::nif] functions
rustler::init!("Elixir.DbcapiBridge.Native");

#[cfg(test)]
mod tests;
