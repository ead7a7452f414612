//! Property-based tests using proptest
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use crate::conn_string::{pairs_to_string, ConnectProperties};
use crate::error::Error;
use crate::models::HostValue;
use crate::params::{build_batch_params, to_bind_param};
use crate::utils::{detect_function_code, detect_query_type, QueryType};
use proptest::prelude::*;

/// Scalar host values a batch cell can hold.
fn scalar() -> impl Strategy<Value = HostValue> {
    prop_oneof![
        Just(HostValue::Null),
        any::<bool>().prop_map(HostValue::Bool),
        any::<i64>().prop_map(HostValue::Int),
        any::<f64>().prop_map(HostValue::Float),
        "[a-z]{0,12}".prop_map(HostValue::Str),
        prop::collection::vec(any::<u8>(), 0..12).prop_map(HostValue::Bytes),
    ]
}

proptest! {
    /// Property: detect_query_type should never panic for any valid UTF-8 string
    #[test]
    fn detect_query_type_never_panics(sql in ".*") {
        let _ = detect_query_type(&sql);
        let _ = detect_function_code(&sql);
    }

    /// Property: Case insensitivity for SQL keywords
    #[test]
    fn case_insensitive_keywords(
        whitespace in r"[ \t\n]*",
        select_case in prop::sample::select(vec!["select", "SELECT", "Select", "sElEcT"]),
        rest in "[a-z0-9 ,*]{0,50}"
    ) {
        let sql = format!("{whitespace}{select_case} {rest}");
        prop_assert_eq!(detect_query_type(&sql), QueryType::Select);
    }

    /// Property: Empty and whitespace-only strings are unclassified
    #[test]
    fn whitespace_is_other(whitespace in r"[ \t\n\r]*") {
        prop_assert_eq!(detect_query_type(&whitespace), QueryType::Other);
    }

    /// Property: host and port always end up in one trailing ServerNode entry
    #[test]
    fn host_and_port_fold_into_server_node(
        host in "[a-z][a-z0-9.]{0,20}",
        port in "[0-9]{1,5}",
        uid in "[a-z]{1,10}",
    ) {
        let pairs = vec![
            ("host".to_string(), host.clone()),
            ("UID".to_string(), uid.clone()),
            ("port".to_string(), port.clone()),
        ];
        let conn_str = pairs_to_string(&pairs);
        let expected_suffix = format!("ServerNode={host}:{port}");
        prop_assert!(conn_str.ends_with(&expected_suffix));
        prop_assert_eq!(conn_str.matches("ServerNode=").count(), 1);

        let props = ConnectProperties::parse(&conn_str);
        prop_assert_eq!(props.get("uid"), Some(uid.as_str()));
    }

    /// Property: parsing any semicolon-separated text never panics
    #[test]
    fn connect_properties_parse_never_panics(conn_str in ".*") {
        let props = ConnectProperties::parse(&conn_str);
        prop_assert!(props.len() <= conn_str.split(';').count());
    }

    /// Property: integers bind as 4-byte values exactly when they fit
    #[test]
    fn integer_binding_width(value in any::<i64>()) {
        let param = to_bind_param(HostValue::Int(value));
        let expected = if i32::try_from(value).is_ok() { 4 } else { 8 };
        prop_assert_eq!(param.value.buffer.len(), expected);
    }

    /// Property: a rectangular batch of one variant per column always builds
    #[test]
    fn uniform_batches_build(
        rows in 1usize..8,
        template in prop::collection::vec(scalar(), 1..5),
    ) {
        let batch: Vec<Vec<HostValue>> = (0..rows).map(|_| template.clone()).collect();
        let params = build_batch_params(&batch).unwrap_or_default();
        prop_assert_eq!(params.len(), template.len());
        for param in &params {
            prop_assert_eq!(param.value.rows(), rows);
        }
    }

    /// Property: ragged batches are always rejected before binding
    #[test]
    fn ragged_batches_rejected(
        first in prop::collection::vec(scalar(), 1..5),
        extra in 1usize..3,
    ) {
        let mut second = first.clone();
        second.extend(std::iter::repeat_n(HostValue::Null, extra));
        let result = build_batch_params(&[first, second]);
        let rejected = matches!(result, Err(Error::InvalidParameter { .. }));
        prop_assert!(rejected, "ragged batch accepted");
    }
}
