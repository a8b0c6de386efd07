//! Test utilities shared by unit and integration tests
//!
//! Enabled for in-crate tests and, for other crates, through the
//! `test-utils` feature.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
