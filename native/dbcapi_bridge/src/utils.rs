/// Utility functions and helpers
///
/// This module provides commonly used helpers for locking with poison handling
/// and for classifying SQL text by its leading keyword.
use crate::driver::function_code;
use crate::error::{Error, Result};
use std::sync::{Mutex, MutexGuard};

/// Safely lock a mutex with proper error handling
///
/// Returns a descriptive error if the mutex is poisoned.
pub fn safe_lock<'a, T>(mutex: &'a Mutex<T>, context: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|e| Error::General(format!("Mutex poisoned in {context}: {e}")))
}

/// Statement category derived from the leading SQL keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    SelectForUpdate,
    Insert,
    Update,
    Delete,
    Ddl,
    Call,
    Explain,
    Begin,
    Commit,
    Rollback,
    Savepoint,
    Other,
}

impl QueryType {
    /// Native function code reported for statements of this type.
    pub fn function_code(self) -> i32 {
        match self {
            QueryType::Select => function_code::SELECT,
            QueryType::SelectForUpdate => function_code::SELECT_FOR_UPDATE,
            QueryType::Insert => function_code::INSERT,
            QueryType::Update => function_code::UPDATE,
            QueryType::Delete => function_code::DELETE,
            QueryType::Ddl => function_code::DDL,
            QueryType::Call => function_code::DB_PROCEDURE_CALL,
            QueryType::Explain => function_code::EXPLAIN,
            QueryType::Commit => function_code::COMMIT,
            QueryType::Rollback => function_code::ROLLBACK,
            QueryType::Savepoint => function_code::SAVEPOINT,
            QueryType::Begin | QueryType::Other => function_code::NIL,
        }
    }
}

/// Detect the query type from a SQL statement
///
/// Examines the first keyword to categorize the statement. `WITH` and `VALUES`
/// count as queries; `SELECT ... FOR UPDATE` is told apart by its trailing clause.
pub fn detect_query_type(query: &str) -> QueryType {
    let mut words = query.split_whitespace();
    let keyword = words.next().unwrap_or("").to_uppercase();

    match keyword.as_str() {
        "SELECT" | "WITH" | "VALUES" => {
            if has_for_update(query) {
                QueryType::SelectForUpdate
            } else {
                QueryType::Select
            }
        }
        "INSERT" | "REPLACE" | "UPSERT" => QueryType::Insert,
        "UPDATE" => QueryType::Update,
        "DELETE" => QueryType::Delete,
        "CREATE" | "DROP" | "ALTER" | "TRUNCATE" | "RENAME" | "COMMENT" => QueryType::Ddl,
        "CALL" => QueryType::Call,
        "EXPLAIN" => QueryType::Explain,
        "BEGIN" => QueryType::Begin,
        "COMMIT" | "END" => QueryType::Commit,
        "ROLLBACK" => QueryType::Rollback,
        "SAVEPOINT" | "RELEASE" => QueryType::Savepoint,
        _ => QueryType::Other,
    }
}

/// Native function code for a SQL statement.
#[inline]
pub fn detect_function_code(sql: &str) -> i32 {
    detect_query_type(sql).function_code()
}

/// Case-insensitive scan for a `FOR UPDATE` clause without allocating.
fn has_for_update(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let target = b"FOR UPDATE";
    if bytes.len() < target.len() {
        return false;
    }

    (0..=bytes.len() - target.len()).any(|i| {
        let preceded = i == 0 || bytes[i - 1].is_ascii_whitespace();
        let followed = bytes
            .get(i + target.len())
            .is_none_or(u8::is_ascii_whitespace);
        preceded
            && followed
            && bytes[i..i + target.len()]
                .iter()
                .zip(target)
                .all(|(c, t)| c.to_ascii_uppercase() == *t)
    })
}
