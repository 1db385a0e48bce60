//! CLI subcommand implementations.

pub mod healthcheck;
pub mod run;
