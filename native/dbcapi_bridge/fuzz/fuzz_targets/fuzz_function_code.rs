#![no_main]
//! Structured fuzzing of statement classification
//!
//! Builds SQL-like inputs from a leading keyword and a free-form body, and checks
//! that classification never panics and that query type and function code agree.

use arbitrary::Arbitrary;
use dbcapi_bridge::{detect_function_code, detect_query_type};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct SqlInput<'a> {
    leading_whitespace: Option<&'a str>,
    keyword: SqlKeyword,
    body: &'a str,
    for_update: bool,
}

#[derive(Debug, Arbitrary)]
enum SqlKeyword {
    Select,
    With,
    Insert,
    Upsert,
    Update,
    Delete,
    Create,
    Drop,
    Call,
    Explain,
    Commit,
    Rollback,
    Savepoint,
    /// Random bytes as keyword
    Random(u8, u8, u8, u8),
}

impl SqlKeyword {
    fn as_str(&self) -> String {
        match self {
            SqlKeyword::Select => "SELECT".to_string(),
            SqlKeyword::With => "WITH".to_string(),
            SqlKeyword::Insert => "INSERT".to_string(),
            SqlKeyword::Upsert => "UPSERT".to_string(),
            SqlKeyword::Update => "UPDATE".to_string(),
            SqlKeyword::Delete => "DELETE".to_string(),
            SqlKeyword::Create => "CREATE".to_string(),
            SqlKeyword::Drop => "DROP".to_string(),
            SqlKeyword::Call => "CALL".to_string(),
            SqlKeyword::Explain => "EXPLAIN".to_string(),
            SqlKeyword::Commit => "COMMIT".to_string(),
            SqlKeyword::Rollback => "ROLLBACK".to_string(),
            SqlKeyword::Savepoint => "SAVEPOINT".to_string(),
            SqlKeyword::Random(a, b, c, d) => [a, b, c, d].iter().map(|b| char::from(**b)).collect(),
        }
    }
}

fuzz_target!(|input: SqlInput| {
    let mut sql = String::new();
    if let Some(ws) = input.leading_whitespace {
        sql.push_str(ws);
    }
    sql.push_str(&input.keyword.as_str());
    sql.push(' ');
    sql.push_str(input.body);
    if input.for_update {
        sql.push_str(" FOR UPDATE");
    }

    let query_type = detect_query_type(&sql);
    assert_eq!(detect_function_code(&sql), query_type.function_code());
});
