//! Completion reactor: reap launched children and report how each ended.
//!
//! Children are polled with `waitpid(pid, WNOHANG)` in round-robin sweeps.
//! Between sweeps the reactor sleeps until SIGCHLD arrives or the poll
//! interval runs out, whichever is first. Reaping is per pid, so children the
//! host process started elsewhere are never consumed here.

use std::time::Duration;

use jobrunner_types::{Direction, IoSpec, Job, JobOutcome, JobState, Termination};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};

use crate::error::{RunError, RunResult};
use crate::resources::{AccessMode, PipeEnd, ResourcePlan};

/// Waits for every `Running` job to terminate.
pub struct Reactor<'a> {
    resources: &'a mut ResourcePlan,
    poll_interval: Duration,
    /// Where the next sweep starts, so no child is always polled last.
    cursor: usize,
}

impl<'a> Reactor<'a> {
    pub fn new(resources: &'a mut ResourcePlan, poll_interval: Duration) -> Self {
        Self {
            resources,
            poll_interval,
            cursor: 0,
        }
    }

    /// Reap until no job is left running.
    ///
    /// `on_outcome` is called once per job, in termination order. The
    /// returned outcomes are in the same order.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn reap(
        &mut self,
        jobs: &mut [Job],
        on_outcome: &mut dyn FnMut(&JobOutcome),
    ) -> RunResult<Vec<JobOutcome>> {
        // Registered before the first sweep so no SIGCHLD is lost in between.
        let mut sigchld = signal(SignalKind::child()).map_err(RunError::ChildSignal)?;

        let mut running: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.state() == JobState::Running)
            .map(|(i, _)| i)
            .collect();
        let mut outcomes = Vec::with_capacity(running.len());
        tracing::debug!(running = running.len(), "reaping");

        loop {
            self.sweep(jobs, &mut running, &mut outcomes, on_outcome)?;
            if running.is_empty() {
                break;
            }
            // Timeout elapsing is fine: the next sweep polls regardless.
            let _ = tokio::time::timeout(self.poll_interval, sigchld.recv()).await;
        }

        Ok(outcomes)
    }

    /// Poll every running job once, starting one past the previous start.
    fn sweep(
        &mut self,
        jobs: &mut [Job],
        running: &mut Vec<usize>,
        outcomes: &mut Vec<JobOutcome>,
        on_outcome: &mut dyn FnMut(&JobOutcome),
    ) -> RunResult<()> {
        let count = running.len();
        if count == 0 {
            return Ok(());
        }
        let start = self.cursor % count;
        self.cursor = start + 1;

        let mut finished = Vec::new();
        for offset in 0..count {
            let slot = (start + offset) % count;
            let job = &mut jobs[running[slot]];
            if let Some(termination) = poll(job)? {
                let outcome = self.complete(job, termination)?;
                on_outcome(&outcome);
                outcomes.push(outcome);
                finished.push(slot);
            }
        }

        finished.sort_unstable();
        for slot in finished.into_iter().rev() {
            running.remove(slot);
        }
        Ok(())
    }

    /// Record the termination and release what the job still held.
    fn complete(&mut self, job: &mut Job, termination: Termination) -> RunResult<JobOutcome> {
        job.termination = Some(termination);
        job.advance(JobState::Terminated)?;

        for direction in [Direction::Stdin, Direction::Stdout] {
            match job.spec(direction) {
                Some(IoSpec::File(path)) => {
                    self.resources
                        .release_file_user(&path, AccessMode::from(direction), job.id);
                }
                Some(IoSpec::Pipe(name)) => {
                    self.resources.close_pipe_end(&name, PipeEnd::from(direction));
                }
                Some(IoSpec::Inherit) | None => {}
            }
        }

        let outcome = JobOutcome {
            id: job.id,
            pid: job.pid.unwrap_or_default(),
            termination,
        };
        tracing::debug!(job = %job.id, ?termination, "job terminated");
        Ok(outcome)
    }
}

/// Non-blocking check of one child.
fn poll(job: &Job) -> RunResult<Option<Termination>> {
    let Some(pid) = job.pid else {
        return Ok(None);
    };

    match waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(_, code)) => Ok(Some(Termination::Exited(code))),
        Ok(WaitStatus::Signaled(_, signal, _)) => Ok(Some(Termination::Signaled(signal as i32))),
        Ok(_) | Err(Errno::EINTR) => Ok(None),
        Err(source) => Err(RunError::Wait { job: job.id, source }),
    }
}
