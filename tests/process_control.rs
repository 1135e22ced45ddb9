//! Integration tests for the process controller
//!
//! The sandbox program is deliberately missing and `allow_unsandboxed` is set,
//! so scripts run directly under /bin/bash while the wrapper plumbing (run and
//! stop command lines, process groups, transcripts) is still exercised.

use gradebox::exec::{ControllerOptions, ProcessController, RunState, SandboxCommand};
use gradebox::{GradeError, SandboxConfig};
use regex::bytes::Regex;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_millis(600);
const GRACE: Duration = Duration::from_millis(200);

fn sandbox() -> SandboxCommand {
    let config = SandboxConfig {
        program: "gradebox-no-such-sandbox".to_string(),
        allow_unsandboxed: true,
        use_pty: false,
        ..SandboxConfig::default()
    };
    SandboxCommand::new(&config, "gradebox-test").unwrap()
}

fn options(workdir: &Path, use_pty: bool) -> ControllerOptions {
    ControllerOptions {
        timeout: TIMEOUT,
        grace: GRACE,
        output_limit: 64 * 1024,
        use_pty,
        workdir: workdir.to_path_buf(),
        transcript: Some(workdir.join("log/run/stdout.log")),
    }
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_missing_sandbox_refused_unless_allowed() {
    let config = SandboxConfig {
        program: "gradebox-no-such-sandbox".to_string(),
        ..SandboxConfig::default()
    };
    assert!(matches!(
        SandboxCommand::new(&config, "x"),
        Err(GradeError::Sandbox(_))
    ));
    assert!(!sandbox().is_sandboxed());
}

#[test]
fn test_interactive_exchange_and_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let run = script(
        dir.path(),
        "make.sh",
        "echo 'name?'\nread name\necho \"hello $name\"\nexit 4\n",
    );
    let mut process =
        ProcessController::new(&sandbox(), &run, None, options(dir.path(), false)).unwrap();
    assert_eq!(process.state(), RunState::NotStarted);

    let prompt = Regex::new(r"name\?").unwrap();
    process.expect(&prompt, TIMEOUT).unwrap();
    process.send("grader", true).unwrap();
    let greeting = Regex::new("hello (\\w+)").unwrap();
    assert_eq!(process.expect(&greeting, TIMEOUT).unwrap(), "hello grader");

    let termination = process.terminate("end of test").clone();
    assert_eq!(termination.exit_code, Some(4));
    assert_eq!(termination.signal, None);
    assert!(!termination.forced);

    let transcript = std::fs::read_to_string(dir.path().join("log/run/stdout.log")).unwrap();
    assert_eq!(transcript, "name?\nhello grader\n");
}

#[test]
fn test_pty_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let run = script(dir.path(), "make.sh", "read n\necho $((n * 2))\n");
    let mut process =
        ProcessController::new(&sandbox(), &run, None, options(dir.path(), true)).unwrap();
    process.send("21", true).unwrap();
    let answer = Regex::new("42").unwrap();
    assert!(process.expect(&answer, TIMEOUT).is_ok());
    assert_eq!(process.terminate("end of test").exit_code, Some(0));
}

#[test]
fn test_timeout_then_terminate() {
    let dir = tempfile::tempdir().unwrap();
    let run = script(dir.path(), "make.sh", "echo started\nsleep 30\n");
    let mut process =
        ProcessController::new(&sandbox(), &run, None, options(dir.path(), false)).unwrap();

    let never = Regex::new("finished").unwrap();
    let err = process.expect(&never, Duration::from_millis(300)).unwrap_err();
    assert!(matches!(err, GradeError::Timeout(_)));

    let termination = process.terminate("program prints `finished`: got timeout").clone();
    assert_eq!(termination.exit_code, None);
    assert!(termination.signal.is_some());
    assert!(process.captured_output().contains("started"));
    assert!(process.send("late", true).is_err());
}

#[test]
fn test_term_ignoring_child_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let run = script(
        dir.path(),
        "make.sh",
        "trap '' TERM HUP INT\necho stubborn\nwhile :; do sleep 0.05; done\n",
    );
    let mut process =
        ProcessController::new(&sandbox(), &run, None, options(dir.path(), false)).unwrap();
    let ready = Regex::new("stubborn").unwrap();
    process.expect(&ready, TIMEOUT).unwrap();

    let started = Instant::now();
    let termination = process.terminate("end of test").clone();
    let elapsed = started.elapsed();

    assert!(termination.forced);
    assert_eq!(termination.signal, Some(libc::SIGKILL));
    assert!(
        elapsed < TIMEOUT * 2,
        "termination took {:?}, limit {:?}",
        elapsed,
        TIMEOUT * 2
    );
    assert_eq!(process.state(), RunState::Terminated);
}

#[test]
fn test_stop_script_runs_first() {
    let dir = tempfile::tempdir().unwrap();
    let run = script(
        dir.path(),
        "make.sh",
        "echo $$ > run.pid\ntrap 'echo stopped; exit 0' INT\necho ready\nwhile :; do sleep 0.05; done\n",
    );
    let stop = script(dir.path(), "stop.sh", "kill -INT $(cat run.pid)\n");
    let mut process =
        ProcessController::new(&sandbox(), &run, Some(&stop), options(dir.path(), false))
            .unwrap();
    let ready = Regex::new("ready").unwrap();
    process.expect(&ready, TIMEOUT).unwrap();

    let termination = process.terminate("end of test").clone();
    assert!(!termination.forced);
    assert_eq!(termination.exit_code, Some(0));
    assert!(process.captured_output().ends_with("stopped\n"));

    // cached: a second request neither re-runs the stop script nor changes the outcome
    assert_eq!(process.terminate("again"), &termination);
}

#[test]
fn test_output_limit_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let run = script(dir.path(), "make.sh", "head -c 5000 /dev/zero | tr '\\0' x\n");
    let mut opts = options(dir.path(), false);
    opts.output_limit = 100;
    let mut process = ProcessController::new(&sandbox(), &run, None, opts).unwrap();
    process.start().unwrap();

    let termination = process.terminate("end of test").clone();
    assert!(termination.output_truncated);
    assert_eq!(process.captured_output().len(), 100);
}
