//! jobrunner-kernel: the job-control engine behind `jobrunner`.
//!
//! This crate provides:
//!
//! - **Jobfile**: Reads jobfiles into numbered, comma-split lines
//! - **Parser**: Turns lines into `Job` records, rejecting malformed ones
//! - **Planner**: Resolves stdin/stdout into shared files and named pipes
//! - **Fabric**: Creates the kernel pipes behind every named pipe
//! - **Launcher**: Forks and execs one child per runnable job
//! - **Reactor**: Reaps children and reports how each ended
//! - **Runner**: Drives all of the above in order

pub mod config;
pub mod diagnostic;
pub mod error;
pub mod fabric;
pub mod jobfile;
pub mod launcher;
pub mod parser;
pub mod planner;
pub mod reactor;
pub mod resources;
pub mod runner;

pub use config::{ChildStderr, RunnerConfig, CONFIG_ENV};
pub use diagnostic::{Diagnostic, DiagnosticCode, Location};
pub use error::{RunError, RunResult};
pub use launcher::{DescriptorPlan, Launcher, Redirect, EXEC_FAILURE_STATUS};
pub use planner::{Planned, ResourcePlanner};
pub use reactor::Reactor;
pub use resources::{AccessMode, FileResource, PipeEnd, PipeResource, ResourcePlan};
pub use runner::{JobRunner, RunEvent, RunReport};

// Job model, for embedders that only depend on the kernel
pub use jobrunner_types::{Job, JobId, JobOutcome, JobState, Termination};
