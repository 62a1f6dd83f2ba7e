//! Pipe fabric: create one kernel pipe per named pipe in the plan.

use std::collections::HashSet;

use jobrunner_types::{Job, JobId, JobState};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;

use crate::error::{RunError, RunResult};
use crate::resources::{PipeEnd, ResourcePlan};

/// Materialize every pipe in `plan`.
///
/// Pipes are created close-on-exec, so only the descriptors a child dups onto
/// its stdin/stdout survive its exec. Ends not claimed by a runnable job are
/// closed straight away: a write end nobody uses must not keep a reader from
/// seeing EOF. The first creation failure aborts the run.
#[tracing::instrument(level = "debug", skip_all)]
pub fn build_pipes(plan: &mut ResourcePlan, jobs: &[Job]) -> RunResult<usize> {
    let runnable: HashSet<JobId> = jobs
        .iter()
        .filter(|j| j.state() == JobState::Planned)
        .map(|j| j.id)
        .collect();
    let in_use = |claimant: Option<JobId>| claimant.is_some_and(|id| runnable.contains(&id));

    let mut created = 0;
    for pipe in plan.pipes_mut() {
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(|source| RunError::PipeCreate {
            name: pipe.name.clone(),
            source,
        })?;
        pipe.install(read_end, write_end);
        created += 1;

        for end in [PipeEnd::Read, PipeEnd::Write] {
            if !in_use(pipe.claimant(end)) && pipe.take(end).is_some() {
                tracing::trace!(pipe = %pipe.name, ?end, "closed unused pipe end");
            }
        }
    }

    tracing::debug!(pipes = created, "pipes created");
    Ok(created)
}
