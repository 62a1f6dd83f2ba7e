//! Tests for the jobrunner binary: exit codes and what lands on each stream.
//!
//! stdin is always /dev/null so jobs that inherit it see EOF immediately.

use std::path::Path;
use std::process::{Command, Output, Stdio};

use rstest::rstest;

fn jobrunner(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_jobrunner"))
        .args(args)
        .current_dir(dir)
        // Keep a user config from changing the run.
        .env("JOBRUNNER_CONFIG", dir.join("no-config.toml"))
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .output()
        .expect("failed to run jobrunner")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[rstest]
#[case::no_args(&[])]
#[case::only_verbose(&["-v"])]
#[case::verbose_misplaced(&["jobs.txt", "-v"])]
fn usage_errors_exit_1(#[case] args: &[&str]) {
    let dir = tempfile::tempdir().unwrap();
    let output = jobrunner(dir.path(), args);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stderr(&output), "Usage: jobrunner [-v] jobfile [jobfile ...]\n");
}

#[test]
fn missing_jobfile_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let output = jobrunner(dir.path(), &["absent.txt"]);
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(
        stderr(&output),
        "jobrunner: file \"absent.txt\" can not be opened\n"
    );
}

#[test]
fn malformed_lines_exit_3() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("jobs.txt"), "true,-\ntrue,-,-\nsleep,-,-,1s\n").unwrap();

    let output = jobrunner(dir.path(), &["jobs.txt"]);
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(
        stderr(&output),
        "jobrunner: invalid job specification on line 1 of \"jobs.txt\"\n\
         jobrunner: invalid job specification on line 3 of \"jobs.txt\"\n"
    );
}

#[test]
fn nothing_runnable_exits_4() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("jobs.txt"), "# just a comment\n").unwrap();

    let output = jobrunner(dir.path(), &["jobs.txt"]);
    assert_eq!(output.status.code(), Some(4));
    assert_eq!(stderr(&output), "jobrunner: no runnable jobs\n");
}

#[test]
fn sort_and_grep_both_finish() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("jobs.txt"), "sort,-,-\ngrep,-,-,,foo\n").unwrap();

    let output = jobrunner(dir.path(), &["-v", "jobs.txt"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "1:sort:-:-:0\n2:grep:-:-:0\n");

    // grep finds nothing on an empty stdin.
    let err = stderr(&output);
    assert!(err.contains("Job 1 exited with status 0\n"), "stderr: {err}");
    assert!(err.contains("Job 2 exited with status 1\n"), "stderr: {err}");
    assert_eq!(err.lines().count(), 2);
}

#[test]
fn conflict_is_reported_and_the_rest_runs() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("jobs.txt"),
        "sh,-,@x,,-c,echo hi\nsh,-,@x,,-c,echo bye\ncat,@x,out.txt\n",
    )
    .unwrap();

    let output = jobrunner(dir.path(), &["jobs.txt"]);
    assert_eq!(output.status.code(), Some(0));

    let err = stderr(&output);
    assert!(err.starts_with("Invalid pipe usage \"x\" on line 2 of \"jobs.txt\"\n"), "stderr: {err}");
    assert!(err.contains("Job 1 exited with status 0\n"));
    assert!(err.contains("Job 3 exited with status 0\n"));
    assert!(!err.contains("Job 2 "));
    assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hi\n");
}

#[test]
fn child_stderr_is_discarded_by_default() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("jobs.txt"), "sh,-,-,,-c,echo noisy >&2\n").unwrap();

    let output = jobrunner(dir.path(), &["jobs.txt"]);
    assert_eq!(stderr(&output), "Job 1 exited with status 0\n");
}

#[test]
fn child_stderr_can_be_inherited() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("jobs.txt"), "sh,-,-,,-c,echo noisy >&2\n").unwrap();
    std::fs::write(dir.path().join("config.toml"), "child_stderr = \"inherit\"\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_jobrunner"))
        .arg("jobs.txt")
        .current_dir(dir.path())
        .env("JOBRUNNER_CONFIG", dir.path().join("config.toml"))
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .output()
        .expect("failed to run jobrunner");

    let err = stderr(&output);
    assert!(err.contains("noisy\n"), "stderr: {err}");
    assert!(err.contains("Job 1 exited with status 0\n"));
}

#[test]
fn unreadable_config_is_an_internal_failure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("jobs.txt"), "true,-,-\n").unwrap();
    std::fs::write(dir.path().join("config.toml"), "child_stderr = \"file\"\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_jobrunner"))
        .arg("jobs.txt")
        .current_dir(dir.path())
        .env("JOBRUNNER_CONFIG", dir.path().join("config.toml"))
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .output()
        .expect("failed to run jobrunner");

    assert_eq!(output.status.code(), Some(5));
    assert!(stderr(&output).starts_with("jobrunner: "));
    assert!(!stderr(&output).contains("Job 1"));
}

#[test]
fn version_and_help_exit_0() {
    let dir = tempfile::tempdir().unwrap();
    let version = jobrunner(dir.path(), &["--version"]);
    assert!(version.status.success());
    assert!(stdout(&version).starts_with("jobrunner "));

    let help = jobrunner(dir.path(), &["--help"]);
    assert!(help.status.success());
    assert!(stdout(&help).contains("Usage: jobrunner [-v] jobfile"));
}
