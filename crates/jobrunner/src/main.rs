//! jobrunner CLI entry point.
//!
//! Usage:
//!   jobrunner jobs.txt              # Run every job in jobs.txt
//!   jobrunner -v a.txt b.txt        # List runnable jobs, then run them

use std::env;
use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> ExitCode {
    // Initialize tracing (respects RUST_LOG env var). Stdout belongs to
    // verbose listings, so logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let invocation = match jobrunner::parse_args(&args) {
        Ok(invocation) => invocation,
        Err(usage) => {
            eprintln!("{usage}");
            return ExitCode::from(jobrunner::USAGE_EXIT);
        }
    };

    match jobrunner::dispatch(invocation) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("jobrunner: {e:?}");
            ExitCode::from(jobrunner::INTERNAL_EXIT)
        }
    }
}
