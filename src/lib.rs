//! The library module for the `dsxw` worker pool.
//!
//! `dsxw` is intended to be used in binary form, but the library is exported
//! separately so integration tests can drive the worker kernel and its
//! collaborators without going through the CLI.

pub mod api;
pub mod config;
pub mod contracts;
pub mod errors;
pub mod ext;
pub mod logging;
pub mod notifier;
pub mod queue;
pub mod state;
pub mod subcommand;
pub mod worker;

pub use config::Config;
