#![forbid(unsafe_code)]
//! tabseal-exec: the run/step state machine.
//!
//! `Recorder` owns validated configuration and a store. `Recorder::start_run`
//! seals a `run_start` entry and returns a `Run`; `Run::step` hands out a
//! `StepHandle` that is sealed exactly once: by `close` (status ok), by `fail`,
//! or by `Drop` (status failed). Steps of one run are strictly sequential; the
//! `&mut Run` borrow held by a handle enforces that at compile time.
//!
//! Snapshot writes may run on a small worker pool (`snapshot`); `close` joins
//! them before anything is sealed.

pub mod error;
pub mod events;
pub mod ids;
pub mod metrics;
pub mod payload;
pub mod policy;
pub mod recorder;
pub mod report;
pub mod run;
pub mod snapshot;
pub mod stream;

pub use error::StepError;
pub use events::RunEvent;
pub use payload::{
    ArtifactRef, DatasetMeta, FailureInfo, RunDoc, RunStatus, StepPayload, StepStatus,
};
pub use recorder::{Recorder, RunOptions};
pub use report::{load_run_report, verify_run, RunReport, StepDiff, StepReport};
pub use run::{Run, RunSummary, StepHandle, StepSummary};
pub use snapshot::read_snapshot;
pub use stream::StreamRun;
