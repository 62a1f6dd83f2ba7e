//! How a launched job ended.

use std::fmt;

use crate::job::JobId;

/// Termination of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited normally with this status code.
    Exited(i32),
    /// Killed by this signal number.
    Signaled(i32),
}

impl Termination {
    pub fn success(&self) -> bool {
        matches!(self, Termination::Exited(0))
    }
}

/// Per-job termination report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub id: JobId,
    pub pid: u32,
    pub termination: Termination,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.termination {
            Termination::Exited(code) => write!(f, "Job {} exited with status {}", self.id, code),
            Termination::Signaled(signal) => {
                write!(f, "Job {} terminated with signal {}", self.id, signal)
            }
        }
    }
}
