//! Integration tests for interactive runs of a submission
//!
//! Programs are built with the system C compiler and started without a sandbox
//! (`allow_unsandboxed`), so the whole build, drive, terminate and report path
//! of a `Run` is exercised.

use gradebox::check::{Check, Recorder, Status};
use gradebox::harness::evaluate;
use gradebox::{HarnessConfig, LanguageConfig, SandboxConfig};
use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};
use zip::ZipArchive;

const TIMEOUT_MS: u64 = 3000;

/// Prints `ready`, then exits with the number it reads. A negative number makes
/// it ignore every polite signal and hang.
const ECHO_EXIT: &str = r#"#define _POSIX_C_SOURCE 200809L
#include <signal.h>
#include <stdio.h>
#include <unistd.h>

int main(void)
{
  int code;
  signal(SIGINT, SIG_IGN);
  printf("ready\n");
  fflush(stdout);
  if (scanf("%d", &code) != 1) {
    return 1;
  }
  if (code < 0) {
    signal(SIGTERM, SIG_IGN);
    signal(SIGHUP, SIG_IGN);
    printf("stuck\n");
    fflush(stdout);
    for (;;) {
      pause();
    }
  }
  printf("exit %d\n", code);
  fflush(stdout);
  return code;
}
"#;

const SPIN: &str = "int main(void)\n{\n  for (;;) {\n  }\n}\n";

fn project(source: &str) -> (tempfile::TempDir, HarnessConfig) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/main.c"), source).unwrap();

    let mut config = HarnessConfig {
        project_dir: dir.path().to_path_buf(),
        language: "c".to_string(),
        timeout_ms: TIMEOUT_MS,
        grace_ms: 100,
        sandbox: SandboxConfig {
            program: "gradebox-no-such-sandbox".to_string(),
            allow_unsandboxed: true,
            use_pty: false,
            ..SandboxConfig::default()
        },
        ..HarnessConfig::default()
    };
    config.languages.insert(
        "c".to_string(),
        LanguageConfig {
            compiler: Some("cc".to_string()),
            ..LanguageConfig::default()
        },
    );
    (dir, config)
}

fn texts(block: &Check) -> Vec<&str> {
    block.checks.iter().map(|check| check.text.as_str()).collect()
}

fn archive_names(path: &Path) -> Vec<String> {
    let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    archive.file_names().map(str::to_string).collect()
}

#[test]
fn test_timeout_then_exit_code() {
    let (_dir, config) = project(SPIN);
    let mut code = None;
    let started = Instant::now();
    let (root, _) = evaluate(&config, 1, "never answers", |submission| {
        submission.run(None, true, |run| {
            run.get("ready");
            code = run.exit_code()?;
            Ok(())
        });
        Ok(())
    })
    .unwrap();
    let elapsed = started.elapsed();

    let block = &root.checks[0];
    assert_eq!(block.status, Status::Fail);
    assert_eq!(
        texts(block),
        vec!["compile every source file", "program prints `ready`: got timeout"]
    );
    assert_eq!(block.checks[0].status, Status::Pass);
    assert!(code.is_some(), "exit code after a timeout");
    // the build, one expect timeout, then a stop script that ends the loop
    assert!(
        elapsed < Duration::from_millis(4 * TIMEOUT_MS),
        "took {:?}",
        elapsed
    );
}

#[test]
fn test_stdin_is_sent_on_start() {
    let (_dir, config) = project(ECHO_EXIT);
    let mut code = None;
    let (root, _) = evaluate(&config, 1, "stdin", |submission| {
        submission.run(Some("3"), true, |run| {
            run.get("ready");
            run.get("exit 3");
            code = run.exit_code()?;
            Ok(())
        });
        Ok(())
    })
    .unwrap();

    assert_eq!(code, Some(3));
    let block = &root.checks[0];
    assert!(block.text.starts_with("build and execute program"));
    assert_eq!(block.status, Status::Pass, "{:#?}", block);
    assert_eq!(
        texts(block),
        vec![
            "compile every source file",
            "program prints `ready`",
            "program prints `exit 3`"
        ]
    );
}

#[test]
fn test_put_and_compile_block_first() {
    let source = ECHO_EXIT.replace("  int code;\n", "  int code;\n  int unused;\n");
    let (_dir, config) = project(&source);
    let mut code = None;
    let (root, _) = evaluate(&config, 1, "put", |submission| {
        submission.run(None, true, |run| {
            run.get("ready");
            run.put("5");
            run.get("exit 5");
            code = run.exit_code()?;
            Ok(())
        });
        Ok(())
    })
    .unwrap();

    assert_eq!(code, Some(5));
    let block = &root.checks[0];
    assert_eq!(
        texts(block)[1..],
        ["program prints `ready`", "program reads `5`", "program prints `exit 5`"]
    );

    let compile = &block.checks[0];
    assert_eq!(compile.text, "compile every source file");
    assert!(compile.auto);
    assert_eq!(compile.status, Status::Warn);
    assert!(compile.checks.iter().any(|check| check.text == "compile `main.c`"));
    assert!(compile.checks.iter().any(|check| check.text == "link program"));
    let warning = compile
        .checks
        .iter()
        .find(|check| check.status == Status::Warn)
        .unwrap();
    assert!(warning.text.contains("unused variable"));
    assert!(warning.details.as_deref().unwrap().starts_with("main.c:"));
    // warnings never fail the run
    assert_eq!(block.status, Status::Warn);
}

#[test]
fn test_two_runs_in_one_submission() {
    let (dir, config) = project(ECHO_EXIT);
    let mut codes = Vec::new();
    let (root, archive) = evaluate(&config, 1, "two runs", |submission| {
        submission.run(Some("3"), true, |run| {
            run.get("exit 3");
            codes.push(run.exit_code()?);
            Ok(())
        });
        submission.run(Some("-1"), true, |run| {
            run.get("stuck");
            codes.push(run.exit_code()?);
            codes.push(run.signal()?);
            Ok(())
        });
        Ok(())
    })
    .unwrap();

    assert_eq!(archive, dir.path().join("test-001.zip"));
    assert_eq!(root.checks.len(), 2);
    assert_eq!(root.checks[0].status, Status::Pass);

    // the second program was killed before its exit code was recorded
    assert_eq!(codes[0], Some(3));
    let signal = codes[2].expect("killed by a signal");
    assert_eq!(codes[1], Some(128 + signal));

    let names = archive_names(&archive);
    assert_eq!(names.iter().filter(|name| *name == "src/make.sh").count(), 1);
    assert!(names.iter().any(|name| name == "log/run/run.log"));
}

#[test]
fn test_unused_run_starts_nothing() {
    let (dir, mut config) = project(ECHO_EXIT);
    config.keep_workdir = true;
    let started = Instant::now();
    let (root, _) = evaluate(&config, 1, "no interaction", |submission| {
        submission.run(None, true, |run| {
            run.check(true, "nothing to run");
            Ok(())
        });
        Ok(())
    })
    .unwrap();

    assert!(started.elapsed() < Duration::from_millis(TIMEOUT_MS));
    assert_eq!(texts(&root.checks[0]), vec!["nothing to run"]);
    assert_eq!(root.status, Status::Pass);

    let workdir = dir.path().join("test-001");
    assert!(!workdir.join("make.sh").exists());
    let transcript = std::fs::read_to_string(workdir.join("log/run/run.log")).unwrap();
    assert!(transcript.contains("close: program never started"));
    assert!(!transcript.contains("start:"));
}
