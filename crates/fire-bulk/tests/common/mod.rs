//! Shared test utilities for fire-bulk integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against a temp bulk directory and ledger
//! - Builders for tab-delimited bulk files and pipeline configuration

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
