//! Unit and integration tests for dbcapi_bridge
//!
//! This module organizes all tests for the bridge into logical submodules
//! that correspond to the main library modules.

mod concurrency_tests;
mod constants_tests;
mod error_handling_tests;
mod integration_tests;
mod proptest_tests;
mod stream_tests;
