/// Error taxonomy for the bridge
///
/// Every error carries a numeric code, a message and a five-character SQL state,
/// which is the shape delivered to the host as `{code, message, sql_state}`.
use thiserror::Error;

use crate::models::NativeError;

/// Which kind of index was out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Parameter,
    Column,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Invalid Object")]
    InvalidObject,

    #[error("Invalid Arguments")]
    InvalidArguments,

    #[error("Invalid parameter {index} for function '{function}': expected {expected}, received {received}.")]
    InvalidParameter {
        index: usize,
        function: &'static str,
        expected: &'static str,
        received: &'static str,
    },

    #[error("No Connection Available")]
    NotConnected,

    #[error("{}", binding_message(*.index))]
    Binding { index: Option<usize> },

    #[error("Too many parameters for the SQL statement")]
    TooManyParameters,

    #[error("Not enough parameters for the SQL statement")]
    NotEnoughParameters,

    #[error("Error making result set Object")]
    ResultSet,

    #[error("{}", index_message(.0))]
    InvalidIndex(IndexKind),

    #[error("Statement is waiting for parameter data")]
    ParamDataPending,

    #[error("Unsupported data type: {0}")]
    Conversion(String),

    #[error("{}", .0.message)]
    Native(NativeError),

    #[error("An error occurred: {0}")]
    General(String),
}

fn binding_message(index: Option<usize>) -> String {
    match index {
        Some(i) => format!("Can not bind parameter({i})."),
        None => "Can not bind parameter(s)".to_string(),
    }
}

fn index_message(kind: &IndexKind) -> &'static str {
    match kind {
        IndexKind::Parameter => "Invalid parameter index.",
        IndexKind::Column => "Invalid column index.",
    }
}

pub const GENERAL_ERROR: i32 = -20000;
pub const INVALID_OBJECT: i32 = -20001;
pub const INVALID_ARGUMENTS: i32 = -20002;
pub const NOT_CONNECTED: i32 = -20003;
pub const BINDING_PARAMETERS: i32 = -20004;
pub const TOO_MANY_PARAMETERS: i32 = -20005;
pub const NOT_ENOUGH_PARAMETERS: i32 = -20006;
pub const RESULTSET: i32 = -20007;
pub const INVALID_INDEX: i32 = -20008;
pub const PARAM_DATA_PENDING: i32 = -20009;
pub const CONVERSION: i32 = -20010;

const DEFAULT_SQL_STATE: &str = "HY000";

impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidObject => INVALID_OBJECT,
            Error::InvalidArguments | Error::InvalidParameter { .. } => INVALID_ARGUMENTS,
            Error::NotConnected => NOT_CONNECTED,
            Error::Binding { .. } => BINDING_PARAMETERS,
            Error::TooManyParameters => TOO_MANY_PARAMETERS,
            Error::NotEnoughParameters => NOT_ENOUGH_PARAMETERS,
            Error::ResultSet => RESULTSET,
            Error::InvalidIndex(_) => INVALID_INDEX,
            Error::ParamDataPending => PARAM_DATA_PENDING,
            Error::Conversion(_) => CONVERSION,
            Error::Native(e) => e.code,
            Error::General(_) => GENERAL_ERROR,
        }
    }

    pub fn sql_state(&self) -> &str {
        match self {
            Error::Native(e) => &e.sql_state,
            _ => DEFAULT_SQL_STATE,
        }
    }

    /// `(code, message, sql_state)` triple handed to the host.
    pub fn to_triple(&self) -> (i32, String, String) {
        (self.code(), self.to_string(), self.sql_state().to_string())
    }
}

impl From<NativeError> for Error {
    fn from(err: NativeError) -> Self {
        Error::Native(err)
    }
}

impl From<Error> for rustler::Error {
    fn from(err: Error) -> Self {
        rustler::Error::Term(Box::new(err.to_triple()))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
