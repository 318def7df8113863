//! Shared plumbing for the Pulsepoll insights services: the layered
//! YAML configuration loader and, behind the `test-helpers` feature,
//! utilities reused by the engine's integration tests.

pub mod config;
pub mod yaml_include;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

#[cfg(any(test, feature = "test-helpers"))]
pub use test_helpers::{generate_unique_id, get_test_database_url, next_test_id};
