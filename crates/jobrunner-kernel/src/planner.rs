//! Resource planning: resolve every job's stdin/stdout before anything runs.
//!
//! Each direction is resolved independently and both are always attempted, so
//! a job with two problems reports both. Problems invalidate only the job.

use jobrunner_types::{Direction, IoSpec, Job, JobState, TransitionError};

use crate::diagnostic::{Diagnostic, DiagnosticCode};
use crate::resources::{AccessMode, ResourcePlan};

/// Result of planning: the resource arena plus per-job problems found.
#[derive(Debug)]
pub struct Planned {
    pub resources: ResourcePlan,
    pub diagnostics: Vec<Diagnostic>,
}

impl Planned {
    /// Number of jobs that survived planning.
    pub fn runnable(jobs: &[Job]) -> usize {
        jobs.iter()
            .filter(|j| j.state() == JobState::Planned)
            .count()
    }
}

/// Builds the [`ResourcePlan`] for a job collection.
#[derive(Debug, Default)]
pub struct ResourcePlanner {
    resources: ResourcePlan,
    diagnostics: Vec<Diagnostic>,
}

impl ResourcePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan every `Validating` job, moving it to `Planned` or `Invalid`.
    ///
    /// Jobs in any other state are skipped. A pipe end stays claimed by the
    /// job that asked for it first even if that job is invalidated later in
    /// the pass, so a later job asking for the same end is still a conflict.
    #[tracing::instrument(level = "debug", skip_all, fields(jobs = jobs.len()))]
    pub fn plan(mut self, jobs: &mut [Job]) -> Result<Planned, TransitionError> {
        for job in jobs.iter_mut() {
            if job.state() != JobState::Validating {
                continue;
            }

            let problems: Vec<Diagnostic> = [Direction::Stdin, Direction::Stdout]
                .into_iter()
                .filter_map(|direction| self.resolve(job, direction))
                .collect();

            if problems.is_empty() {
                job.advance(JobState::Planned)?;
            } else {
                job.invalidate()?;
                self.diagnostics.extend(problems);
            }
        }

        self.release_invalid(jobs);

        tracing::debug!(
            runnable = Planned::runnable(jobs),
            files = self.resources.files().count(),
            pipes = self.resources.pipes().count(),
            "planned resources"
        );

        Ok(Planned {
            resources: self.resources,
            diagnostics: self.diagnostics,
        })
    }

    /// Resolve one direction of one job, returning a diagnostic on failure.
    fn resolve(&mut self, job: &Job, direction: Direction) -> Option<Diagnostic> {
        let raw = job.raw_spec(direction);
        let problem = match job.spec(direction)? {
            IoSpec::Inherit => return None,
            IoSpec::Pipe(name) => {
                let holder = self
                    .resources
                    .claim_pipe(&name, direction.into(), job.id)
                    .err()?;
                tracing::debug!(job = %job.id, pipe = %name, %holder, "pipe end already claimed");
                Diagnostic::new(
                    DiagnosticCode::PipeConflict,
                    format!("Invalid pipe usage \"{}\"", name),
                )
            }
            IoSpec::File(path) => {
                let err = self
                    .resources
                    .open_file(&path, direction.into(), job.id)
                    .err()?;
                tracing::debug!(job = %job.id, path = %path.display(), error = %err, "open failed");
                let code = match direction {
                    Direction::Stdin => DiagnosticCode::UnreadableInput,
                    Direction::Stdout => DiagnosticCode::UnwritableOutput,
                };
                Diagnostic::new(
                    code,
                    format!("Unable to open \"{}\" for {}", raw, direction.verb()),
                )
            }
        };
        Some(problem.for_job(job.id).at(&job.origin))
    }

    /// Give back file slots held by jobs that did not survive planning.
    fn release_invalid(&mut self, jobs: &[Job]) {
        for job in jobs.iter().filter(|j| !j.is_valid()) {
            for direction in [Direction::Stdin, Direction::Stdout] {
                if let Some(IoSpec::File(path)) = job.spec(direction) {
                    self.resources
                        .release_file_user(&path, AccessMode::from(direction), job.id);
                }
            }
        }
    }
}
