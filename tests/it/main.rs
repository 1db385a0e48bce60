//! Integration tests for the `dsxw` worker pool library.
//!
//! These drive the crate's public API directly rather than through the CLI,
//! covering the cross-cutting contracts (data model, error taxonomy, queue
//! naming, configuration loading) that a single module's unit tests can't
//! exercise from outside the crate boundary.

mod config;
mod contracts;
mod errors;
mod queue;
