//! Gantry Tasks - Matrix build execution engine
//!
//! This crate runs each target of a [`gantry_core::TargetMatrix`] in its
//! execution environment, in parallel up to a concurrency limit, and deposits
//! every produced artifact into a shared [`gantry_core::ArtifactStore`].

pub mod cancel;
pub mod environment;
pub mod executor;
pub mod reporter;
pub mod result;
pub mod scheduler;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use environment::{ExecutionEnvironment, StepOutput};
pub use executor::{BuildExecutor, ExecutorOptions, StepContext};
pub use reporter::{
    BuildEvent, BuildReporter, BuildReporterRegistry, CollectingReporter, TracingReporter,
};
pub use result::{BuildFailure, BuildOutcome, BuildPhase, BuildResult, ExitStatus};
pub use scheduler::{BuildSummary, MatrixScheduler, SchedulerOptions};
