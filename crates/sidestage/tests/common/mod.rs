//! Shared test utilities for sidestage integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated pipeline runs in temporary directories
//! - Builders for archives, property lists and configuration files
//! - A loopback HTTP server for remote acquisitions

pub mod builders;
pub mod harness;
pub mod server;

pub use builders::*;
pub use harness::TestHarness;
