//! Per-job diagnostics and formatting.

use std::fmt;
use std::path::PathBuf;

use jobrunner_types::{JobId, Origin};

/// Categorizes diagnostics for filtering and tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    /// Missing or empty mandatory field, or malformed timeout.
    InvalidSpec,
    /// stdin file could not be opened for reading.
    UnreadableInput,
    /// stdout file could not be opened for writing.
    UnwritableOutput,
    /// A pipe end was claimed by a second job.
    PipeConflict,
}

impl DiagnosticCode {
    /// Returns a short code string for the diagnostic.
    pub fn code(&self) -> &'static str {
        match self {
            DiagnosticCode::InvalidSpec => "E001",
            DiagnosticCode::UnreadableInput => "E002",
            DiagnosticCode::UnwritableOutput => "E003",
            DiagnosticCode::PipeConflict => "E004",
        }
    }

    /// Whether the whole run stops on this diagnostic, rather than only the job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiagnosticCode::InvalidSpec)
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Jobfile position a diagnostic points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} of \"{}\"", self.line, self.file.display())
    }
}

/// A problem found with one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Category code.
    pub code: DiagnosticCode,
    /// Human-readable message.
    pub message: String,
    /// Job the problem belongs to, if already numbered.
    pub job: Option<JobId>,
    /// Jobfile line, if known.
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            job: None,
            location: None,
        }
    }

    /// Attach the jobfile position of a job line.
    pub fn at(mut self, origin: &Origin) -> Self {
        self.location = Some(Location {
            file: origin.file.clone(),
            line: origin.line,
        });
        self
    }

    pub fn for_job(mut self, job: JobId) -> Self {
        self.job = Some(job);
        self
    }

    /// Longer form with the category code, for logs.
    pub fn format_detailed(&self) -> String {
        let mut result = format!("[{}] {}", self.code, self.message);
        if let Some(job) = self.job {
            result.push_str(&format!(" (job {})", job));
        }
        if let Some(location) = &self.location {
            result.push_str(&format!(" on {}", location));
        }
        result
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} on {}", self.message, location),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location() {
        let diag = Diagnostic::new(DiagnosticCode::PipeConflict, "Invalid pipe usage \"x\"")
            .at(&Origin::new(1, "b.jobs", 7));
        assert_eq!(
            diag.to_string(),
            "Invalid pipe usage \"x\" on line 7 of \"b.jobs\""
        );
    }

    #[test]
    fn display_without_location() {
        let diag = Diagnostic::new(DiagnosticCode::UnreadableInput, "Unable to open \"in\" for reading");
        assert_eq!(diag.to_string(), "Unable to open \"in\" for reading");
    }

    #[test]
    fn detailed_format() {
        let diag = Diagnostic::new(DiagnosticCode::UnwritableOutput, "Unable to open \"/x/y\" for writing")
            .for_job(JobId(2))
            .at(&Origin::new(0, "jobs", 3));
        let detailed = diag.format_detailed();
        assert!(detailed.starts_with("[E003]"));
        assert!(detailed.contains("(job 2)"));
        assert!(detailed.contains("line 3 of \"jobs\""));
    }

    #[test]
    fn only_spec_errors_are_fatal() {
        assert!(DiagnosticCode::InvalidSpec.is_fatal());
        assert!(!DiagnosticCode::PipeConflict.is_fatal());
        assert!(!DiagnosticCode::UnreadableInput.is_fatal());
    }
}
