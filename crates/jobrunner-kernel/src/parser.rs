//! Job line parsing.
//!
//! Field layout: `program,stdin,stdout[,timeout[,arg]*]`. Field 0 is both the
//! program and `argv[0]`; fields from index 4 on are appended to argv.

use std::fmt;

use jobrunner_types::{Direction, IoSpec, Job, JobId, JobState, TransitionError};

use crate::diagnostic::{Diagnostic, DiagnosticCode};
use crate::jobfile::JobLine;

/// Index of the first extra argv field.
const FIRST_ARG_FIELD: usize = 4;

/// Why a job line is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxFault {
    /// Fewer than program, stdin and stdout.
    TooFewFields(usize),
    EmptyProgram,
    /// stdin/stdout field empty, or a pipe spec without a name.
    BadSpec { direction: Direction, raw: String },
    /// Timeout present but not a non-negative integer.
    BadTimeout(String),
}

impl fmt::Display for SyntaxFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxFault::TooFewFields(n) => write!(f, "expected at least 3 fields, found {}", n),
            SyntaxFault::EmptyProgram => write!(f, "empty program"),
            SyntaxFault::BadSpec { direction, raw } => {
                let name = match direction {
                    Direction::Stdin => "stdin",
                    Direction::Stdout => "stdout",
                };
                write!(f, "bad {} field {:?}", name, raw)
            }
            SyntaxFault::BadTimeout(raw) => write!(f, "bad timeout {:?}", raw),
        }
    }
}

/// Parse an optional timeout field. Empty means no timeout.
pub fn parse_timeout(raw: &str) -> Result<Option<u64>, SyntaxFault> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| SyntaxFault::BadTimeout(raw.to_string()))
}

/// Parse one line into a `Parsed` job, reporting the first syntax fault.
///
/// The job is always produced, so a malformed line still consumes its job
/// number and can be reported by position.
pub fn parse_job(id: JobId, line: &JobLine) -> (Job, Option<SyntaxFault>) {
    let field = |i: usize| line.fields.get(i).map(String::as_str).unwrap_or("");

    let mut job = Job::new(id, line.origin.clone(), field(0), field(1), field(2));
    job.argv
        .extend(line.fields.iter().skip(FIRST_ARG_FIELD).cloned());

    let timeout = parse_timeout(field(3));
    if let Ok(t) = timeout {
        job.timeout = t;
    }

    let fault = if line.fields.len() < 3 {
        Some(SyntaxFault::TooFewFields(line.fields.len()))
    } else if job.program.is_empty() {
        Some(SyntaxFault::EmptyProgram)
    } else if let Some(direction) = [Direction::Stdin, Direction::Stdout]
        .into_iter()
        .find(|d| IoSpec::parse(job.raw_spec(*d)).is_none())
    {
        Some(SyntaxFault::BadSpec {
            direction,
            raw: job.raw_spec(direction).to_string(),
        })
    } else {
        timeout.err()
    };

    (job, fault)
}

/// Number and parse every line.
///
/// Each job ends up `Validating` (ready for planning) or `Invalid`. One
/// diagnostic is returned per malformed line.
pub fn parse_jobs(lines: &[JobLine]) -> Result<(Vec<Job>, Vec<Diagnostic>), TransitionError> {
    let mut jobs = Vec::with_capacity(lines.len());
    let mut diagnostics = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let id = JobId(i as u64 + 1);
        let (mut job, fault) = parse_job(id, line);
        job.advance(JobState::Validating)?;

        if let Some(fault) = fault {
            tracing::debug!(job = %id, reason = %fault, "invalid job line");
            job.invalidate()?;
            diagnostics.push(
                Diagnostic::new(DiagnosticCode::InvalidSpec, "invalid job specification")
                    .for_job(id)
                    .at(&job.origin),
            );
        }
        jobs.push(job);
    }

    Ok((jobs, diagnostics))
}
