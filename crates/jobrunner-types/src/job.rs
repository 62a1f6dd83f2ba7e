//! Job identification, I/O wiring and lifecycle types.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::outcome::Termination;

/// Globally unique, 1-based job number.
///
/// Assigned densely in the order job lines are read across all jobfiles and
/// never reused, independent of file or line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a job.
///
/// ```text
/// Parsed → Validating → Invalid (terminal)
///                     → Planned → Launched → Running → Terminated (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Line split into fields, nothing checked yet.
    Parsed,
    /// Syntax and runnability checks in progress.
    Validating,
    /// Rejected during validation. Never launched.
    Invalid,
    /// All I/O resources resolved.
    Planned,
    /// Child process created.
    Launched,
    /// Parent has handed off the child's descriptors.
    Running,
    /// Child observed terminated.
    Terminated,
}

impl JobState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Parsed, Validating)
                | (Validating, Invalid)
                | (Validating, Planned)
                | (Planned, Launched)
                | (Launched, Running)
                | (Running, Terminated)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Parsed => "parsed",
            JobState::Validating => "validating",
            JobState::Invalid => "invalid",
            JobState::Planned => "planned",
            JobState::Launched => "launched",
            JobState::Running => "running",
            JobState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Attempted an illegal lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job}: cannot move from {from} to {to}")]
pub struct TransitionError {
    pub job: JobId,
    pub from: JobState,
    pub to: JobState,
}

/// Which standard stream of the child an I/O spec wires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Stdin,
    Stdout,
}

impl Direction {
    /// Verb used in open-failure diagnostics ("for reading" / "for writing").
    pub fn verb(self) -> &'static str {
        match self {
            Direction::Stdin => "reading",
            Direction::Stdout => "writing",
        }
    }
}

/// Resolved form of a stdin/stdout field.
///
/// - `-` inherits the parent's stream
/// - `@name` is one end of the named pipe `name`
/// - anything else is a file path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoSpec {
    Inherit,
    Pipe(String),
    File(PathBuf),
}

impl IoSpec {
    /// Classify a raw field. Empty fields and a bare `@` are not specs.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "" | "@" => None,
            "-" => Some(IoSpec::Inherit),
            _ => match raw.strip_prefix('@') {
                Some(name) => Some(IoSpec::Pipe(name.to_string())),
                None => Some(IoSpec::File(PathBuf::from(raw))),
            },
        }
    }
}

/// Where a job line came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Position of the jobfile on the command line (0-based).
    pub file_index: usize,
    /// Jobfile path as given by the user.
    pub file: PathBuf,
    /// Physical line number within the jobfile (1-based).
    pub line: usize,
}

impl Origin {
    pub fn new(file_index: usize, file: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            file_index,
            file: file.into(),
            line,
        }
    }
}

/// One declarative unit of work: program, arguments and I/O wiring.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub origin: Origin,
    /// Program to execute, also `argv[0]`.
    pub program: String,
    /// Full argument vector, `argv[0]` first.
    pub argv: Vec<String>,
    /// Raw stdin field as written in the jobfile.
    pub stdin: String,
    /// Raw stdout field as written in the jobfile.
    pub stdout: String,
    /// Parsed timeout in seconds. Validated, never enforced.
    pub timeout: Option<u64>,
    state: JobState,
    /// OS process id once launched.
    pub pid: Option<u32>,
    /// How the child ended, once reaped.
    pub termination: Option<Termination>,
}

impl Job {
    /// Create a freshly parsed job. `argv[0]` is set to `program`.
    pub fn new(
        id: JobId,
        origin: Origin,
        program: impl Into<String>,
        stdin: impl Into<String>,
        stdout: impl Into<String>,
    ) -> Self {
        let program = program.into();
        Self {
            id,
            origin,
            argv: vec![program.clone()],
            program,
            stdin: stdin.into(),
            stdout: stdout.into(),
            timeout: None,
            state: JobState::Parsed,
            pid: None,
            termination: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// False once the job has been rejected. Never becomes true again.
    pub fn is_valid(&self) -> bool {
        self.state != JobState::Invalid
    }

    /// Move to `next`, refusing transitions outside the lifecycle.
    pub fn advance(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(next) {
            return Err(TransitionError {
                job: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Reject the job. Only legal while validating.
    pub fn invalidate(&mut self) -> Result<(), TransitionError> {
        self.advance(JobState::Invalid)
    }

    /// The raw field for one direction.
    pub fn raw_spec(&self, direction: Direction) -> &str {
        match direction {
            Direction::Stdin => &self.stdin,
            Direction::Stdout => &self.stdout,
        }
    }

    /// Parsed spec for one direction, `None` if the field is malformed.
    pub fn spec(&self, direction: Direction) -> Option<IoSpec> {
        IoSpec::parse(self.raw_spec(direction))
    }

    /// `jobIndex:program:stdin:stdout:timeout`, an absent timeout printed as 0.
    pub fn listing(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.id,
            self.program,
            self.stdin,
            self.stdout,
            self.timeout.unwrap_or(0)
        )
    }
}
