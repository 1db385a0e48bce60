//! The worker pool: a kernel providing shared lifecycle/retry/DLQ behavior,
//! and the three concrete workers built on top of it.

pub mod batch;
pub mod dianna;
pub mod kernel;
pub mod scan_request;

pub use kernel::WorkerKernel;
