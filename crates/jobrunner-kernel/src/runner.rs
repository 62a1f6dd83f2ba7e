//! Run engine: drives a job collection through every stage in order.
//!
//! ```text
//! read → parse → plan → build pipes → launch → reap
//! ```
//!
//! Each stage sees the whole collection before the next one starts.

use std::path::PathBuf;

use jobrunner_types::{Job, JobOutcome, JobState};

use crate::config::RunnerConfig;
use crate::diagnostic::Diagnostic;
use crate::error::{RunError, RunResult};
use crate::fabric::build_pipes;
use crate::jobfile::{read_jobfiles, JobLine};
use crate::launcher::Launcher;
use crate::parser::parse_jobs;
use crate::planner::{Planned, ResourcePlanner};
use crate::reactor::Reactor;

/// Something a caller may want to show while a run is in progress.
#[derive(Debug, Clone, Copy)]
pub enum RunEvent<'a> {
    /// A job was rejected during planning. The rest of the run continues.
    Diagnostic(&'a Diagnostic),
    /// Verbose mode: a runnable job, reported before anything launches.
    Listing(&'a Job),
    /// A child terminated.
    Outcome(&'a JobOutcome),
}

/// Final state of a completed run.
#[derive(Debug)]
pub struct RunReport {
    /// Every job read, in jobfile order, with its final state.
    pub jobs: Vec<Job>,
    /// Outcomes in termination order.
    pub outcomes: Vec<JobOutcome>,
    /// Planning problems, in job order.
    pub diagnostics: Vec<Diagnostic>,
}

impl RunReport {
    pub fn launched(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.state() == JobState::Terminated)
            .count()
    }

    pub fn invalid(&self) -> usize {
        self.jobs.iter().filter(|j| !j.is_valid()).count()
    }

    /// Whether every launched job exited with status 0.
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.termination.success())
    }
}

/// Runs jobfiles with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct JobRunner {
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Read and parse jobfiles without running anything.
    ///
    /// Fails with [`RunError::InvalidJobSpec`] listing every malformed line.
    pub fn load(&self, paths: &[PathBuf]) -> RunResult<Vec<Job>> {
        let lines = read_jobfiles(paths)?;
        parse(&lines)
    }

    /// Run every job in `paths` to completion.
    pub async fn run(
        &self,
        paths: &[PathBuf],
        on_event: &mut dyn FnMut(RunEvent<'_>),
    ) -> RunResult<RunReport> {
        let jobs = self.load(paths)?;
        self.run_jobs(jobs, on_event).await
    }

    /// Plan, launch and reap an already-parsed collection.
    ///
    /// Jobs must be `Validating` to be considered; anything else is carried
    /// through to the report untouched.
    #[tracing::instrument(level = "debug", skip_all, fields(jobs = jobs.len()))]
    pub async fn run_jobs(
        &self,
        mut jobs: Vec<Job>,
        on_event: &mut dyn FnMut(RunEvent<'_>),
    ) -> RunResult<RunReport> {
        let Planned {
            mut resources,
            diagnostics,
        } = ResourcePlanner::new().plan(&mut jobs)?;
        for diagnostic in &diagnostics {
            tracing::warn!("{}", diagnostic.format_detailed());
            on_event(RunEvent::Diagnostic(diagnostic));
        }

        build_pipes(&mut resources, &jobs)?;

        let runnable = Planned::runnable(&jobs);
        if runnable == 0 {
            return Err(RunError::NoRunnableJobs);
        }

        if self.config.verbose {
            for job in jobs.iter().filter(|j| j.state() == JobState::Planned) {
                on_event(RunEvent::Listing(job));
            }
        }

        let launched = Launcher::new(&mut resources, &self.config)?.launch_all(&mut jobs)?;
        tracing::debug!(launched, "all jobs launched");

        let outcomes = Reactor::new(&mut resources, self.config.poll_interval())
            .reap(&mut jobs, &mut |outcome| on_event(RunEvent::Outcome(outcome)))
            .await?;

        Ok(RunReport {
            jobs,
            outcomes,
            diagnostics,
        })
    }
}

fn parse(lines: &[JobLine]) -> RunResult<Vec<Job>> {
    let (jobs, diagnostics) = parse_jobs(lines)?;
    if diagnostics.iter().any(|d| d.code.is_fatal()) {
        return Err(RunError::InvalidJobSpec { diagnostics });
    }
    tracing::debug!(jobs = jobs.len(), "jobs parsed");
    Ok(jobs)
}
