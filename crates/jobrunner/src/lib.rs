//! jobrunner command line: argument handling, run setup and report output.
//!
//! Reports go to the standard streams, not through `tracing`:
//! - verbose job listings on stdout
//! - planning diagnostics and per-job outcomes on stderr
//! - fatal errors on stderr, prefixed with `jobrunner:`

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use thiserror::Error;

use jobrunner_kernel::{JobRunner, RunError, RunEvent, RunnerConfig};

pub const USAGE: &str = "Usage: jobrunner [-v] jobfile [jobfile ...]";

/// Exit status for a malformed command line.
pub const USAGE_EXIT: u8 = 1;

/// Exit status for failures outside the run itself, such as a bad config file.
/// Matches the engine's code for internal failures.
pub const INTERNAL_EXIT: u8 = 5;

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Help,
    Version,
    Run { verbose: bool, jobfiles: Vec<PathBuf> },
}

/// The command line does not match `[-v] jobfile [jobfile ...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{}", USAGE)]
pub struct UsageError;

/// Parse arguments, program name excluded.
///
/// `-v` is only recognised as the first argument. Any other argument,
/// including ones that start with `-`, names a jobfile.
pub fn parse_args(args: &[String]) -> Result<Invocation, UsageError> {
    let (verbose, rest) = match args.first().map(String::as_str) {
        None => return Err(UsageError),
        Some("--help" | "-h") => return Ok(Invocation::Help),
        Some("--version" | "-V") => return Ok(Invocation::Version),
        Some("-v") => (true, &args[1..]),
        Some(_) => (false, args),
    };

    if rest.is_empty() || rest.iter().any(|a| a == "-v") {
        return Err(UsageError);
    }

    Ok(Invocation::Run {
        verbose,
        jobfiles: rest.iter().map(PathBuf::from).collect(),
    })
}

pub fn print_help() {
    println!(
        r#"jobrunner v{}

{USAGE}

Runs every job in the given jobfiles at once, wiring stdin/stdout through
files and named pipes, and reports how each job ended.

Jobfile lines:
  program,stdin,stdout[,timeout[,arg]*]

  stdin/stdout:  -        inherit from jobrunner
                 @name    one end of the named pipe "name"
                 path     a file (read for stdin, truncated for stdout)

Options:
  -v                           List runnable jobs before launching them
  -h, --help                   Show this help
  -V, --version                Show version

Environment:
  JOBRUNNER_CONFIG             Config file (default: ~/.config/jobrunner/config.toml)
  RUST_LOG                     Log filter for diagnostics on stderr

Exit status:
  0 success, 1 usage, 2 unopenable jobfile, 3 invalid job line,
  4 no runnable jobs, 5 internal failure
"#,
        env!("CARGO_PKG_VERSION")
    );
}

pub fn print_version() {
    println!(
        "jobrunner {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("JOBRUNNER_GIT_HASH")
    );
}

/// Carry out an invocation and return the process exit status.
pub fn dispatch(invocation: Invocation) -> Result<ExitCode> {
    match invocation {
        Invocation::Help => {
            print_help();
            Ok(ExitCode::SUCCESS)
        }
        Invocation::Version => {
            print_version();
            Ok(ExitCode::SUCCESS)
        }
        Invocation::Run { verbose, jobfiles } => {
            let config = RunnerConfig::load()?.with_verbose(verbose);
            tracing::debug!(?config, "configuration loaded");
            run_jobfiles(config, &jobfiles)
        }
    }
}

/// Run jobfiles to completion on a single-threaded runtime.
pub fn run_jobfiles(config: RunnerConfig, jobfiles: &[PathBuf]) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let runner = JobRunner::new(config);
    let result = runtime.block_on(runner.run(jobfiles, &mut print_event));

    match result {
        Ok(report) => {
            tracing::debug!(
                launched = report.launched(),
                invalid = report.invalid(),
                all_succeeded = report.all_succeeded(),
                "run complete"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            report_error(&err);
            Ok(ExitCode::from(err.exit_code()))
        }
    }
}

fn print_event(event: RunEvent<'_>) {
    match event {
        RunEvent::Diagnostic(diagnostic) => eprintln!("{diagnostic}"),
        RunEvent::Listing(job) => println!("{}", job.listing()),
        RunEvent::Outcome(outcome) => eprintln!("{outcome}"),
    }
}

fn report_error(err: &RunError) {
    match err {
        RunError::InvalidJobSpec { diagnostics } => {
            for diagnostic in diagnostics {
                eprintln!("jobrunner: {diagnostic}");
            }
        }
        other => eprintln!("jobrunner: {other}"),
    }
}
