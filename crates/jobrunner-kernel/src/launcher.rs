//! Process launching: fork one child per runnable job and exec its program.
//!
//! The descriptor plan, the resolved program path and the null-terminated C
//! argv are all built before `fork()`. The child only calls `fcntl`, `dup2`,
//! `close`, `execv` and `_exit`, none of which allocate.

use std::ffi::{c_char, CString};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use jobrunner_types::{Direction, IoSpec, Job, JobState};
use nix::fcntl::{fcntl, FcntlArg};
use nix::unistd::{close, dup2, fork, ForkResult, Pid};

use crate::config::{ChildStderr, RunnerConfig};
use crate::error::{RunError, RunResult};
use crate::resources::{AccessMode, PipeEnd, ResourcePlan};

/// Exit status of a child whose program image could not be replaced.
pub const EXEC_FAILURE_STATUS: i32 = 255;

const STDIN_FILENO: RawFd = 0;
const STDOUT_FILENO: RawFd = 1;
const STDERR_FILENO: RawFd = 2;

/// Where one standard stream of the child comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Leave the inherited stream alone.
    Inherit,
    Pipe { name: String, fd: RawFd },
    File { path: PathBuf, fd: RawFd },
}

impl Redirect {
    pub fn fd(&self) -> Option<RawFd> {
        match self {
            Redirect::Inherit => None,
            Redirect::Pipe { fd, .. } | Redirect::File { fd, .. } => Some(*fd),
        }
    }
}

/// Per-job descriptor wiring, computed once before fork.
///
/// `close` lists every descriptor held in the resource arena that this job
/// does not use. Closing them in the child keeps a stray write end from
/// holding a pipe open after its writer exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPlan {
    pub stdin: Redirect,
    pub stdout: Redirect,
    pub close: Vec<RawFd>,
}

impl DescriptorPlan {
    /// Build the plan for `job` from the descriptors `resources` holds now.
    ///
    /// A pipe end or file the job names but the arena no longer holds falls
    /// back to `Inherit`.
    pub fn for_job(job: &Job, resources: &ResourcePlan) -> Self {
        let stdin = redirect_for(job, Direction::Stdin, resources);
        let stdout = redirect_for(job, Direction::Stdout, resources);
        let used = [stdin.fd(), stdout.fd()];
        let close = resources
            .open_fds()
            .into_iter()
            .filter(|fd| !used.contains(&Some(*fd)))
            .collect();

        Self {
            stdin,
            stdout,
            close,
        }
    }

    /// Rewire the calling process according to the plan. Child side only.
    ///
    /// When the runner was started with a standard stream closed, a source
    /// descriptor can sit on 0, 1 or 2. Sources are first copied above 2 so
    /// no `dup2` overwrites a source that a later one still reads.
    fn apply(&self, stderr: Option<RawFd>) -> nix::Result<()> {
        let wiring = [
            (self.stdin.fd(), STDIN_FILENO),
            (self.stdout.fd(), STDOUT_FILENO),
            (stderr, STDERR_FILENO),
        ];

        let mut lifted = [None; 3];
        for (slot, (source, _)) in lifted.iter_mut().zip(wiring) {
            *slot = source.map(lift_above_stdio).transpose()?;
        }
        for (source, (_, target)) in lifted.iter().zip(wiring) {
            if let Some(fd) = *source {
                dup2(fd, target)?;
            }
        }

        let rewired = |fd: RawFd| wiring.iter().any(|(s, t)| s.is_some() && *t == fd);
        let stale = self
            .close
            .iter()
            .copied()
            .chain(wiring.iter().filter_map(|(s, _)| *s))
            .chain(lifted.iter().flatten().copied());
        for fd in stale {
            if !rewired(fd) {
                let _ = close(fd);
            }
        }
        Ok(())
    }
}

/// Copy `fd` above the standard streams if it sits on one of them.
fn lift_above_stdio(fd: RawFd) -> nix::Result<RawFd> {
    if fd > STDERR_FILENO {
        return Ok(fd);
    }
    fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(STDERR_FILENO + 1))
}

fn redirect_for(job: &Job, direction: Direction, resources: &ResourcePlan) -> Redirect {
    match job.spec(direction) {
        Some(IoSpec::Pipe(name)) => {
            let end = PipeEnd::from(direction);
            match resources.pipe(&name).and_then(|p| p.raw_fd(end)) {
                Some(fd) => Redirect::Pipe { name, fd },
                None => Redirect::Inherit,
            }
        }
        Some(IoSpec::File(path)) => {
            match resources
                .file(&path, AccessMode::from(direction))
                .filter(|f| f.users().contains(&job.id))
                .and_then(|f| f.raw_fd())
            {
                Some(fd) => Redirect::File { path, fd },
                None => Redirect::Inherit,
            }
        }
        Some(IoSpec::Inherit) | None => Redirect::Inherit,
    }
}

/// Find an executable for `name` in a `PATH`-style list.
///
/// Names containing `/` are taken as paths and returned unchanged.
pub fn resolve_in_path(name: &str, path_var: &str) -> Option<PathBuf> {
    if name.contains('/') {
        return Some(PathBuf::from(name));
    }

    for dir in path_var.split(':') {
        if dir.is_empty() {
            continue;
        }

        let path = Path::new(dir).join(name);
        if path.is_file() {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = path.metadata() {
                if metadata.permissions().mode() & 0o111 != 0 {
                    return Some(path);
                }
            }
        }
    }

    None
}

/// Program image prepared for `execv`.
struct ExecImage {
    /// `None` when the program cannot be found or named in C.
    path: Option<CString>,
    /// Owns the strings `argv_ptrs` points into.
    argv: Vec<CString>,
    /// `argv` as a null-terminated pointer array.
    argv_ptrs: Vec<*const c_char>,
}

impl ExecImage {
    fn prepare(job: &Job, path_var: &str) -> Self {
        use std::os::unix::ffi::OsStrExt;

        let argv: Option<Vec<CString>> = job
            .argv
            .iter()
            .map(|a| CString::new(a.as_bytes()).ok())
            .collect();
        let path = resolve_in_path(&job.program, path_var)
            .and_then(|p| CString::new(p.as_os_str().as_bytes()).ok());

        let Some(argv) = argv else {
            return Self {
                path: None,
                argv: Vec::new(),
                argv_ptrs: vec![std::ptr::null()],
            };
        };

        // Moving `argv` below leaves the heap buffers, and so the pointers, in place.
        let argv_ptrs = argv
            .iter()
            .map(|a| a.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        Self {
            path,
            argv,
            argv_ptrs,
        }
    }
}

/// Forks and execs jobs against a shared resource arena.
pub struct Launcher<'a> {
    resources: &'a mut ResourcePlan,
    stderr_sink: Option<OwnedFd>,
    path_var: String,
}

impl<'a> Launcher<'a> {
    pub fn new(resources: &'a mut ResourcePlan, config: &RunnerConfig) -> RunResult<Self> {
        let stderr_sink = match config.child_stderr {
            ChildStderr::Inherit => None,
            ChildStderr::Null => Some(OwnedFd::from(
                OpenOptions::new()
                    .write(true)
                    .open("/dev/null")
                    .map_err(RunError::StderrSink)?,
            )),
        };

        Ok(Self {
            resources,
            stderr_sink,
            path_var: std::env::var("PATH").unwrap_or_default(),
        })
    }

    /// Launch every `Planned` job in collection order.
    pub fn launch_all(&mut self, jobs: &mut [Job]) -> RunResult<usize> {
        let mut launched = 0;
        for job in jobs.iter_mut().filter(|j| j.state() == JobState::Planned) {
            self.launch(job)?;
            launched += 1;
        }
        Ok(launched)
    }

    /// Fork `job`, exec its program in the child, and hand off its pipe ends.
    ///
    /// Leaves the job `Running`. A fork failure is fatal to the run; an exec
    /// failure only makes the child exit with [`EXEC_FAILURE_STATUS`].
    #[tracing::instrument(level = "debug", skip_all, fields(job = %job.id, program = %job.program))]
    pub fn launch(&mut self, job: &mut Job) -> RunResult<Pid> {
        let plan = DescriptorPlan::for_job(job, self.resources);
        let image = ExecImage::prepare(job, &self.path_var);
        let stderr = self.stderr_sink.as_ref().map(AsRawFd::as_raw_fd);

        if image.path.is_none() {
            tracing::warn!(program = %job.program, "program not found, child will exit {}", EXEC_FAILURE_STATUS);
        }
        tracing::trace!(?plan, argc = image.argv.len(), "descriptor plan");

        // Buffered parent output must not be duplicated into the child.
        let _ = std::io::stdout().flush();

        // SAFETY: the child branch only makes async-signal-safe calls (fcntl,
        // dup2, close, execv, _exit) on data prepared before the fork, and
        // never allocates, so it is sound even if other threads held locks.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => exec_child(&plan, stderr, &image),
            Ok(ForkResult::Parent { child }) => {
                job.pid = Some(child.as_raw() as u32);
                job.advance(JobState::Launched)?;
                self.hand_off(job);
                job.advance(JobState::Running)?;
                tracing::debug!(pid = child.as_raw(), "launched");
                Ok(child)
            }
            Err(source) => Err(RunError::Fork {
                job: job.id,
                source,
            }),
        }
    }

    /// Close the pipe ends now owned by the child.
    ///
    /// File descriptors stay open until every job using them has been reaped.
    fn hand_off(&mut self, job: &Job) {
        for direction in [Direction::Stdin, Direction::Stdout] {
            if let Some(IoSpec::Pipe(name)) = job.spec(direction) {
                self.resources.close_pipe_end(&name, PipeEnd::from(direction));
            }
        }
    }
}

fn exec_child(plan: &DescriptorPlan, stderr: Option<RawFd>, image: &ExecImage) -> ! {
    if plan.apply(stderr).is_ok() {
        if let Some(path) = &image.path {
            // SAFETY: `path` and every `argv_ptrs` entry point into CStrings
            // owned by `image`, and the array ends with a null pointer.
            unsafe { nix::libc::execv(path.as_ptr(), image.argv_ptrs.as_ptr()) };
        }
    }
    // SAFETY: _exit skips atexit handlers and stdio flushing inherited from
    // the parent, which is what a failed child must do.
    unsafe { nix::libc::_exit(EXEC_FAILURE_STATUS) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::build_pipes;
    use crate::jobfile::parse_jobfile;
    use crate::parser::parse_jobs;
    use crate::planner::ResourcePlanner;

    fn prepare(text: &str) -> (Vec<Job>, ResourcePlan) {
        let lines = parse_jobfile(0, Path::new("jobs.txt"), text);
        let (mut jobs, _) = parse_jobs(&lines).unwrap();
        let mut plan = ResourcePlanner::new().plan(&mut jobs).unwrap().resources;
        build_pipes(&mut plan, &jobs).unwrap();
        (jobs, plan)
    }

    #[test]
    fn inherit_job_has_nothing_to_wire() {
        let (jobs, plan) = prepare("sort,-,-\n");
        let desc = DescriptorPlan::for_job(&jobs[0], &plan);
        assert_eq!(desc.stdin, Redirect::Inherit);
        assert_eq!(desc.stdout, Redirect::Inherit);
        assert!(desc.close.is_empty());
    }

    #[test]
    fn writer_closes_the_read_end_it_does_not_use() {
        let (jobs, plan) = prepare("echo,-,@p\ncat,@p,-\n");
        let pipe = plan.pipe("p").unwrap();
        let read = pipe.raw_fd(PipeEnd::Read).unwrap();
        let write = pipe.raw_fd(PipeEnd::Write).unwrap();

        let writer = DescriptorPlan::for_job(&jobs[0], &plan);
        assert_eq!(writer.stdin, Redirect::Inherit);
        assert_eq!(
            writer.stdout,
            Redirect::Pipe {
                name: "p".into(),
                fd: write
            }
        );
        assert_eq!(writer.close, vec![read]);

        let reader = DescriptorPlan::for_job(&jobs[1], &plan);
        assert_eq!(reader.stdin.fd(), Some(read));
        assert_eq!(reader.close, vec![write]);
    }

    #[test]
    fn unrelated_descriptors_are_closed() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "data\n").unwrap();
        let text = format!(
            "cat,{},-\necho,-,@a\ncat,@a,-\n",
            input.display()
        );

        let (jobs, plan) = prepare(&text);
        let file_fd = plan
            .file(&input, AccessMode::Read)
            .and_then(|f| f.raw_fd())
            .unwrap();

        let desc = DescriptorPlan::for_job(&jobs[0], &plan);
        assert_eq!(
            desc.stdin,
            Redirect::File {
                path: input.clone(),
                fd: file_fd
            }
        );
        assert_eq!(desc.close.len(), 2);
        assert!(!desc.close.contains(&file_fd));

        let desc = DescriptorPlan::for_job(&jobs[1], &plan);
        assert!(desc.close.contains(&file_fd));
    }

    #[test]
    fn closed_end_falls_back_to_inherit() {
        let (jobs, mut plan) = prepare("echo,-,@p\ncat,@p,-\n");
        plan.close_pipe_end("p", PipeEnd::Read);
        let desc = DescriptorPlan::for_job(&jobs[1], &plan);
        assert_eq!(desc.stdin, Redirect::Inherit);
    }

    #[test]
    fn resolve_finds_sh() {
        let path_var = std::env::var("PATH").unwrap_or_else(|_| "/bin:/usr/bin".into());
        let found = resolve_in_path("sh", &path_var).expect("sh in PATH");
        assert!(found.ends_with("sh"));
    }

    #[test]
    fn resolve_passes_paths_through() {
        assert_eq!(resolve_in_path("./run.sh", ""), Some(PathBuf::from("./run.sh")));
        assert_eq!(resolve_in_path("/bin/true", ""), Some(PathBuf::from("/bin/true")));
    }

    #[test]
    fn resolve_misses_unknown_programs() {
        assert_eq!(resolve_in_path("definitely_not_a_real_command_12345", "/bin:/usr/bin"), None);
        assert_eq!(resolve_in_path("sh", ""), None);
    }

    #[test]
    fn exec_argv_is_null_terminated() {
        let (jobs, _) = prepare("sh,-,-,,-c,exit 0\n");
        let image = ExecImage::prepare(&jobs[0], "/bin:/usr/bin");

        assert!(image.path.is_some());
        assert_eq!(image.argv.len(), 3);
        assert_eq!(image.argv_ptrs.len(), 4);
        assert!(image.argv_ptrs[3].is_null());
        for (ptr, arg) in image.argv_ptrs.iter().zip(&image.argv) {
            assert_eq!(*ptr, arg.as_ptr());
        }
    }

    #[test]
    fn source_on_a_standard_slot_survives_rewiring() {
        use nix::fcntl::OFlag;
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::pipe2;
        use std::fs::File;
        use std::io::Read;

        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).unwrap();
        let devnull = File::open("/dev/null").unwrap();
        let write_raw = write_end.as_raw_fd();

        // The child moves the pipe's write end onto fd 0 first, as if the
        // runner had been started with stdin closed.
        let plan = DescriptorPlan {
            stdin: Redirect::File {
                path: "/dev/null".into(),
                fd: devnull.as_raw_fd(),
            },
            stdout: Redirect::Pipe {
                name: "p".into(),
                fd: STDIN_FILENO,
            },
            close: Vec::new(),
        };

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let wired = dup2(write_raw, STDIN_FILENO).is_ok() && plan.apply(None).is_ok();
                let status = if wired {
                    unsafe { nix::libc::write(STDOUT_FILENO, b"ok".as_ptr().cast(), 2) };
                    0
                } else {
                    1
                };
                unsafe { nix::libc::_exit(status) }
            }
            ForkResult::Parent { child } => {
                drop(write_end);
                let mut out = String::new();
                File::from(read_end).read_to_string(&mut out).unwrap();
                assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));
                assert_eq!(out, "ok");
            }
        }
    }
}
