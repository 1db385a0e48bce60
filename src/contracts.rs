//! The wire-level contract shared with connectors and the scanner: stable
//! queue/task names and the data types carried between them.

pub mod model;
pub mod names;

pub use model::{
    ConnectorDescriptor, DlqRecord, JobState, ScanRequest, Verdict, VerdictDetails,
    VerdictFileInfo, VerdictKind,
};
pub use names::{Queue, Task};
