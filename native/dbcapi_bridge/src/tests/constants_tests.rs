//! Tests for constants.rs - Registry management and global state
//!
//! These tests verify that the global registries (for connections, statements,
//! and result sets) are properly initialized and accessible.

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use super::test_utils::connect_memory;
use crate::constants::{
    CONNECTION_REGISTRY, CONNECT_SUFFIX, RESULT_SET_REGISTRY, ROWSET_SIZE, STMT_REGISTRY, TOKIO_RUNTIME,
    WORKER_RUNTIME,
};
use uuid::Uuid;

#[test]
fn test_uuid_generation() {
    let uuid1 = Uuid::new_v4().to_string();
    let uuid2 = Uuid::new_v4().to_string();

    assert_ne!(uuid1, uuid2, "UUIDs should be unique");
    assert_eq!(uuid1.len(), 36, "UUID should be 36 characters long");
}

#[test]
fn test_registry_initialization() {
    // Just verify registries can be accessed
    assert!(
        CONNECTION_REGISTRY.lock().is_ok(),
        "Connection registry should be accessible"
    );
    assert!(
        STMT_REGISTRY.lock().is_ok(),
        "Statement registry should be accessible"
    );
    assert!(
        RESULT_SET_REGISTRY.lock().is_ok(),
        "Result set registry should be accessible"
    );
}

#[test]
fn test_registries_hold_independent_entries() {
    let conn = Arc::new(connect_memory());
    let id = Uuid::new_v4().to_string();
    CONNECTION_REGISTRY
        .lock()
        .unwrap()
        .insert(id.clone(), Arc::clone(&conn));

    let stmt = conn.prepare("SELECT 1").unwrap();
    let stmt_id = Uuid::new_v4().to_string();
    STMT_REGISTRY
        .lock()
        .unwrap()
        .insert(stmt_id.clone(), Arc::new(stmt));

    // Removing the connection entry leaves the statement registered and usable
    CONNECTION_REGISTRY.lock().unwrap().remove(&id);
    let stmt = STMT_REGISTRY.lock().unwrap().remove(&stmt_id).unwrap();
    assert!(stmt.is_valid());
}

#[test]
fn test_static_configuration() {
    assert_eq!(ROWSET_SIZE, 10);
    assert!(CONNECT_SUFFIX.contains("CHARSET=UTF-8"));
    assert!(CONNECT_SUFFIX.contains("SCROLLABLERESULT=0"));
}

#[test]
fn test_runtimes_are_usable() {
    assert_eq!(TOKIO_RUNTIME.block_on(async { 1 + 1 }), 2);
    let handle = WORKER_RUNTIME.spawn_blocking(|| 3);
    assert_eq!(TOKIO_RUNTIME.block_on(handle).unwrap(), 3);
}
