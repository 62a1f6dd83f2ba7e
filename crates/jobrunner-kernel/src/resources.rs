//! Resource arena: the files and named pipes a run wires jobs through.
//!
//! Jobs never hold descriptors. They name a resource by path or pipe name and
//! the arena resolves it, so one file or pipe can serve several jobs.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use jobrunner_types::{Direction, JobId};

/// Permission bits for created output files (owner rwx).
pub const OUTPUT_FILE_MODE: u32 = 0o700;

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessMode {
    Read,
    Write,
}

impl From<Direction> for AccessMode {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Stdin => AccessMode::Read,
            Direction::Stdout => AccessMode::Write,
        }
    }
}

/// End of a pipe. Stdin reads from a pipe, stdout writes to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

impl From<Direction> for PipeEnd {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Stdin => PipeEnd::Read,
            Direction::Stdout => PipeEnd::Write,
        }
    }
}

/// Identity of a file resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey {
    pub path: PathBuf,
    pub mode: AccessMode,
}

/// An open file shared by every job naming the same path and mode.
#[derive(Debug)]
pub struct FileResource {
    pub path: PathBuf,
    pub mode: AccessMode,
    fd: Option<OwnedFd>,
    /// Jobs still expected to use the descriptor.
    users: Vec<JobId>,
}

impl FileResource {
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn users(&self) -> &[JobId] {
        &self.users
    }
}

/// A named pipe with at most one reader and one writer.
#[derive(Debug)]
pub struct PipeResource {
    pub name: String,
    pub reader: Option<JobId>,
    pub writer: Option<JobId>,
    read_end: Option<OwnedFd>,
    write_end: Option<OwnedFd>,
}

impl PipeResource {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            writer: None,
            read_end: None,
            write_end: None,
        }
    }

    pub fn claimant(&self, end: PipeEnd) -> Option<JobId> {
        match end {
            PipeEnd::Read => self.reader,
            PipeEnd::Write => self.writer,
        }
    }

    pub fn raw_fd(&self, end: PipeEnd) -> Option<RawFd> {
        let fd = match end {
            PipeEnd::Read => self.read_end.as_ref(),
            PipeEnd::Write => self.write_end.as_ref(),
        };
        fd.map(AsRawFd::as_raw_fd)
    }

    pub(crate) fn install(&mut self, read_end: OwnedFd, write_end: OwnedFd) {
        self.read_end = Some(read_end);
        self.write_end = Some(write_end);
    }

    /// Remove one end from the arena. Dropping the result closes it.
    pub(crate) fn take(&mut self, end: PipeEnd) -> Option<OwnedFd> {
        match end {
            PipeEnd::Read => self.read_end.take(),
            PipeEnd::Write => self.write_end.take(),
        }
    }
}

/// Files and pipes for one run, keyed by path/mode and by pipe name.
#[derive(Debug, Default)]
pub struct ResourcePlan {
    files: BTreeMap<FileKey, FileResource>,
    pipes: BTreeMap<String, PipeResource>,
}

impl ResourcePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(&self, path: &Path, mode: AccessMode) -> Option<&FileResource> {
        self.files.get(&FileKey {
            path: path.to_path_buf(),
            mode,
        })
    }

    pub fn files(&self) -> impl Iterator<Item = &FileResource> {
        self.files.values()
    }

    pub fn pipe(&self, name: &str) -> Option<&PipeResource> {
        self.pipes.get(name)
    }

    pub fn pipes(&self) -> impl Iterator<Item = &PipeResource> {
        self.pipes.values()
    }

    pub(crate) fn pipes_mut(&mut self) -> impl Iterator<Item = &mut PipeResource> {
        self.pipes.values_mut()
    }

    /// Register `job` as a user of `path`, opening it on first use.
    ///
    /// Reads open the existing file; writes create or truncate it with
    /// [`OUTPUT_FILE_MODE`].
    pub fn open_file(&mut self, path: &Path, mode: AccessMode, job: JobId) -> std::io::Result<()> {
        let key = FileKey {
            path: path.to_path_buf(),
            mode,
        };

        if let Some(resource) = self.files.get_mut(&key) {
            resource.users.push(job);
            return Ok(());
        }

        let file = match mode {
            AccessMode::Read => File::open(path)?,
            AccessMode::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(OUTPUT_FILE_MODE)
                .open(path)?,
        };

        tracing::trace!(path = %path.display(), ?mode, fd = file.as_raw_fd(), "opened file");
        self.files.insert(
            key,
            FileResource {
                path: path.to_path_buf(),
                mode,
                fd: Some(OwnedFd::from(file)),
                users: vec![job],
            },
        );
        Ok(())
    }

    /// Claim one end of pipe `name` for `job`, creating the pipe record.
    ///
    /// Returns the current holder if the end is already claimed by another job.
    pub fn claim_pipe(&mut self, name: &str, end: PipeEnd, job: JobId) -> Result<(), JobId> {
        let pipe = self
            .pipes
            .entry(name.to_string())
            .or_insert_with(|| PipeResource::new(name));

        let slot = match end {
            PipeEnd::Read => &mut pipe.reader,
            PipeEnd::Write => &mut pipe.writer,
        };

        match *slot {
            Some(holder) if holder != job => Err(holder),
            _ => {
                *slot = Some(job);
                Ok(())
            }
        }
    }

    /// Drop `job` from file user lists, closing files nobody needs any more.
    pub fn release_file_user(&mut self, path: &Path, mode: AccessMode, job: JobId) {
        let key = FileKey {
            path: path.to_path_buf(),
            mode,
        };
        if let Some(resource) = self.files.get_mut(&key) {
            resource.users.retain(|u| *u != job);
            if resource.users.is_empty() && resource.fd.take().is_some() {
                tracing::trace!(path = %path.display(), ?mode, "closed file");
            }
        }
    }

    /// Close one pipe end if still held. Returns whether anything was closed.
    pub fn close_pipe_end(&mut self, name: &str, end: PipeEnd) -> bool {
        let closed = self
            .pipes
            .get_mut(name)
            .and_then(|pipe| pipe.take(end))
            .is_some();
        if closed {
            tracing::trace!(pipe = name, ?end, "closed pipe end");
        }
        closed
    }

    /// Every descriptor the arena still holds, in a stable order.
    pub fn open_fds(&self) -> Vec<RawFd> {
        let files = self.files.values().filter_map(FileResource::raw_fd);
        let pipes = self.pipes.values().flat_map(|p| {
            [p.raw_fd(PipeEnd::Read), p.raw_fd(PipeEnd::Write)]
                .into_iter()
                .flatten()
        });
        files.chain(pipes).collect()
    }
}
