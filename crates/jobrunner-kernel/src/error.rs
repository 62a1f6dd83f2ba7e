//! Fatal run errors and their process exit codes.

use std::path::PathBuf;

use jobrunner_types::{JobId, TransitionError};
use thiserror::Error;

use crate::diagnostic::Diagnostic;

/// Result type for run stages.
pub type RunResult<T> = Result<T, RunError>;

/// Errors that abort the whole run.
///
/// Per-job problems (unopenable files, pipe conflicts) are not errors: they
/// invalidate the job and surface as [`Diagnostic`]s instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("file \"{}\" can not be opened", path.display())]
    JobfileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read jobfile \"{}\": {source}", path.display())]
    JobfileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// At least one job line is malformed. Every offending line is listed.
    #[error("{}", first_problem(diagnostics))]
    InvalidJobSpec { diagnostics: Vec<Diagnostic> },

    #[error("no runnable jobs")]
    NoRunnableJobs,

    #[error("failed to create pipe \"{name}\": {source}")]
    PipeCreate {
        name: String,
        #[source]
        source: nix::Error,
    },

    #[error("failed to open child stderr sink: {0}")]
    StderrSink(#[source] std::io::Error),

    #[error("fork failed for job {job}: {source}")]
    Fork {
        job: JobId,
        #[source]
        source: nix::Error,
    },

    #[error("waiting on job {job} failed: {source}")]
    Wait {
        job: JobId,
        #[source]
        source: nix::Error,
    },

    #[error("cannot watch for child termination: {0}")]
    ChildSignal(#[source] std::io::Error),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

fn first_problem(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .first()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "invalid job specification".to_string())
}

impl RunError {
    /// Process exit status for this failure.
    ///
    /// `1` (usage) is decided by the command-line layer before a run starts.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::JobfileOpen { .. } | RunError::JobfileRead { .. } => 2,
            RunError::InvalidJobSpec { .. } => 3,
            RunError::NoRunnableJobs => 4,
            RunError::PipeCreate { .. }
            | RunError::StderrSink(_)
            | RunError::Fork { .. }
            | RunError::Wait { .. }
            | RunError::ChildSignal(_)
            | RunError::Transition(_) => 5,
        }
    }
}
