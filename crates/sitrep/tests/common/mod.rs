//! Shared test utilities for sitrep integration tests.
//!
//! This module provides:
//! - `TestHarness` for a service rooted in a temp directory
//! - Analyzers that block or stall, for driving timing-sensitive cases
//! - Small CSV fixtures

pub mod harness;

pub use harness::*;
