#![no_main]
//! Fuzz test for connection string assembly
//!
//! Key/value pairs are flattened and parsed back. Flattening must never panic,
//! and host/port must produce at most one ServerNode entry.

use dbcapi_bridge::conn_string::{build_connect_string, ConnectParams, ConnectProperties};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|pairs: Vec<(String, String)>| {
    let has_host = pairs.iter().any(|(k, _)| k.eq_ignore_ascii_case("host"));
    let params = ConnectParams::Pairs(pairs);
    let conn_str = build_connect_string(&ConnectParams::None, &params);

    let props = ConnectProperties::parse(&conn_str);
    if has_host {
        assert!(props.get("ServerNode").is_some());
    }
});
