/// Interactive process control for one run
///
/// Lifecycle: NotStarted -> Running -> Draining -> Closing -> Terminated.
/// The child always leads its own process group; every signal targets the
/// whole group so grandchildren are swept with it.
use crate::config::types::{GradeError, HarnessConfig, Result};
use crate::exec::output::{spawn_reader, OutputCapture, StreamEvent};
use crate::exec::sandbox::{command_for, SandboxCommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Running,
    Draining,
    Closing,
    Terminated,
}

/// Final outcome of a run, cached once reached
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub reason: String,
    /// The group had to be killed with SIGKILL
    pub forced: bool,
    pub output_truncated: bool,
}

/// Timing and I/O options for a controller
#[derive(Clone, Debug)]
pub struct ControllerOptions {
    pub timeout: Duration,
    pub grace: Duration,
    pub output_limit: usize,
    pub use_pty: bool,
    pub workdir: PathBuf,
    /// Raw output transcript (`log/run/stdout.log`)
    pub transcript: Option<PathBuf>,
}

impl ControllerOptions {
    pub fn from_config(config: &HarnessConfig, workdir: &Path) -> Self {
        Self {
            timeout: config.timeout(),
            grace: config.grace(),
            output_limit: config.output_limit_bytes,
            use_pty: config.sandbox.use_pty,
            workdir: workdir.to_path_buf(),
            transcript: None,
        }
    }
}

struct Live {
    child: Child,
    pgid: Pid,
    input: Option<File>,
    events: Receiver<StreamEvent>,
}

/// Owns one sandboxed child and its interactive exchange
pub struct ProcessController {
    options: ControllerOptions,
    run_argv: Vec<String>,
    stop_argv: Option<Vec<String>>,
    state: RunState,
    live: Option<Live>,
    capture: OutputCapture,
    pending: Vec<u8>,
    eof: bool,
    termination: Option<Termination>,
}

impl ProcessController {
    /// Prepare a controller for a rendered script; nothing is spawned yet
    pub fn new(
        sandbox: &SandboxCommand,
        run_script: &Path,
        stop_script: Option<&Path>,
        options: ControllerOptions,
    ) -> Result<Self> {
        let capture = OutputCapture::new(options.output_limit, options.transcript.as_deref())?;
        Ok(Self {
            run_argv: sandbox.run_argv(run_script),
            stop_argv: stop_script.map(|script| sandbox.stop_argv(script)),
            options,
            state: RunState::NotStarted,
            live: None,
            capture,
            pending: Vec::new(),
            eof: false,
            termination: None,
        })
    }

    /// Controller over an explicit argv, bypassing the sandbox wrapper
    pub fn from_argv(argv: Vec<String>, options: ControllerOptions) -> Result<Self> {
        let capture = OutputCapture::new(options.output_limit, options.transcript.as_deref())?;
        Ok(Self {
            run_argv: argv,
            stop_argv: None,
            options,
            state: RunState::NotStarted,
            live: None,
            capture,
            pending: Vec::new(),
            eof: false,
            termination: None,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    /// Everything the program printed so far (bounded)
    pub fn captured_output(&self) -> String {
        self.capture.text()
    }

    pub fn pid(&self) -> Option<u32> {
        self.live.as_ref().map(|live| live.child.id())
    }

    /// Spawn the child; a no-op once started
    pub fn start(&mut self) -> Result<()> {
        if self.state != RunState::NotStarted {
            return Ok(());
        }
        let mut command = command_for(&self.run_argv, &self.options.workdir)?;
        let (input, spawned) = if self.options.use_pty {
            spawn_with_pty(&mut command)?
        } else {
            spawn_with_pipes(&mut command)?
        };
        // pid of the group leader is also the group id
        let pgid = Pid::from_raw(spawned.child.id() as i32);
        log::debug!("started {:?} as group {}", self.run_argv, pgid);
        self.live = Some(Live {
            child: spawned.child,
            pgid,
            input: Some(input),
            events: spawned.events,
        });
        self.state = RunState::Running;
        Ok(())
    }

    /// Wait until the output matches `pattern`; consumed output is dropped
    pub fn expect(&mut self, pattern: &Regex, timeout: Duration) -> Result<String> {
        self.ensure_running()?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = pattern.find(&self.pending) {
                let matched = String::from_utf8_lossy(found.as_bytes()).into_owned();
                let end = found.end();
                self.pending.drain(..end);
                return Ok(matched);
            }
            if self.eof {
                return Err(GradeError::Eof);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(GradeError::Timeout(timeout));
            }
            self.receive(deadline - now);
        }
    }

    /// Write `text` to the program, with a trailing newline when `eol`
    pub fn send(&mut self, text: &str, eol: bool) -> Result<()> {
        self.ensure_running()?;
        let input = self
            .live
            .as_mut()
            .and_then(|live| live.input.as_mut())
            .ok_or_else(|| GradeError::Process("program input is closed".to_string()))?;
        input.write_all(text.as_bytes())?;
        if eol {
            input.write_all(b"\n")?;
        }
        input.flush()?;
        Ok(())
    }

    /// Stop the program; idempotent, later calls return the cached outcome
    pub fn terminate(&mut self, reason: &str) -> &Termination {
        let termination = match self.termination.take() {
            Some(done) => done,
            None => self.shutdown(reason),
        };
        self.state = RunState::Terminated;
        self.termination.insert(termination)
    }

    fn ensure_running(&mut self) -> Result<()> {
        match self.state {
            RunState::NotStarted => self.start(),
            RunState::Running => Ok(()),
            state => Err(GradeError::Process(format!(
                "program is no longer running ({:?})",
                state
            ))),
        }
    }

    /// Pull one event, waiting at most `wait`
    fn receive(&mut self, wait: Duration) {
        let Some(live) = self.live.as_ref() else {
            self.eof = true;
            return;
        };
        match live.events.recv_timeout(wait) {
            Ok(StreamEvent::Data(chunk)) => {
                self.capture.ingest(&chunk);
                self.pending.extend_from_slice(&chunk);
                let limit = self.options.output_limit;
                if self.pending.len() > limit {
                    let excess = self.pending.len() - limit;
                    self.pending.drain(..excess);
                }
            }
            Ok(StreamEvent::Failed(e)) => {
                log::warn!("reading program output failed: {}", e);
                self.capture.mark_read_error();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.eof = true,
        }
    }

    fn shutdown(&mut self, reason: &str) -> Termination {
        if self.live.is_none() {
            log::debug!("terminate before start: {}", reason);
            return Termination {
                exit_code: None,
                signal: None,
                reason: reason.to_string(),
                forced: false,
                output_truncated: false,
            };
        }
        let grace = self.options.grace;

        self.state = RunState::Draining;
        log::debug!("terminating: {}", reason);
        if let Some(stop_argv) = self.stop_argv.clone() {
            self.run_stop_script(&stop_argv, grace);
            std::thread::sleep(grace);
        }
        let deadline = Instant::now() + self.options.timeout;
        while !self.eof {
            let now = Instant::now();
            if now >= deadline {
                log::debug!("output still open after {:?}", self.options.timeout);
                break;
            }
            self.receive(deadline - now);
        }

        self.state = RunState::Closing;
        let (status, forced) = match self.live.as_mut() {
            Some(live) => close_group(live, grace),
            None => (None, false),
        };
        self.collect_leftovers();
        self.capture.flush();

        Termination {
            exit_code: status.and_then(|s| s.code()),
            signal: status.and_then(|s| s.signal()),
            reason: reason.to_string(),
            forced,
            output_truncated: self.capture.is_truncated(),
        }
    }

    fn run_stop_script(&self, argv: &[String], grace: Duration) {
        let spawned = command_for(argv, &self.options.workdir).and_then(|mut command| {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(GradeError::from)
        });
        match spawned {
            Ok(mut stopper) => match stopper.wait_timeout(grace) {
                Ok(Some(status)) => log::debug!("stop script exited with {}", status),
                Ok(None) => {
                    log::warn!("stop script still running after {:?}, killing it", grace);
                    let _ = stopper.kill();
                    let _ = stopper.wait();
                }
                Err(e) => log::warn!("waiting for stop script failed: {}", e),
            },
            Err(e) => log::warn!("stop script could not be started: {}", e),
        }
    }

    /// Output that arrived while the group was being closed
    fn collect_leftovers(&mut self) {
        while !self.eof {
            let Some(live) = self.live.as_ref() else {
                break;
            };
            match live.events.try_recv() {
                Ok(StreamEvent::Data(chunk)) => self.capture.ingest(&chunk),
                Ok(StreamEvent::Failed(_)) => self.capture.mark_read_error(),
                Err(_) => break,
            }
        }
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        if self.termination.is_none() && self.live.is_some() {
            let _ = self.terminate("controller dropped");
        }
    }
}

/// SIGHUP+SIGTERM to the group, grace wait, then SIGKILL and reap
fn close_group(live: &mut Live, grace: Duration) -> (Option<ExitStatus>, bool) {
    drop(live.input.take());
    signal_group(live.pgid, Signal::SIGHUP);
    signal_group(live.pgid, Signal::SIGTERM);

    let mut forced = false;
    let status = match live.child.wait_timeout(grace) {
        Ok(Some(status)) => Some(status),
        Ok(None) => {
            forced = true;
            signal_group(live.pgid, Signal::SIGKILL);
            live.child.wait().ok()
        }
        Err(e) => {
            log::warn!("waiting for program failed: {}", e);
            forced = true;
            signal_group(live.pgid, Signal::SIGKILL);
            live.child.wait().ok()
        }
    };
    // leader is reaped; sweep anything left in its group
    signal_group(live.pgid, Signal::SIGKILL);
    (status, forced)
}

fn signal_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) => log::trace!("sent {:?} to group {}", signal, pgid),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => log::warn!("failed to send {:?} to group {}: {}", signal, pgid, e),
    }
}

struct Spawned {
    child: Child,
    events: Receiver<StreamEvent>,
}

fn spawn_with_pipes(command: &mut std::process::Command) -> Result<(File, Spawned)> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    let mut child = command
        .spawn()
        .map_err(|e| GradeError::Sandbox(format!("failed to start program: {}", e)))?;

    let (tx, rx) = crossbeam_channel::unbounded();
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, tx.clone());
    }
    drop(tx);

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| GradeError::Process("program stdin unavailable".to_string()))?;
    let input = File::from(std::os::fd::OwnedFd::from(stdin));
    Ok((input, Spawned { child, events: rx }))
}

fn spawn_with_pty(command: &mut std::process::Command) -> Result<(File, Spawned)> {
    use nix::pty::{openpty, OpenptyResult, Winsize};
    use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, OutputFlags, SetArg, Termios};

    let OpenptyResult { master, slave } = openpty(None::<&Winsize>, None::<&Termios>)?;
    let mut termios = tcgetattr(&slave)?;
    termios.local_flags.remove(LocalFlags::ECHO);
    termios.output_flags.remove(OutputFlags::ONLCR);
    tcsetattr(&slave, SetArg::TCSANOW, &termios)?;

    command
        .stdin(Stdio::from(slave.try_clone()?))
        .stdout(Stdio::from(slave.try_clone()?))
        .stderr(Stdio::from(slave.try_clone()?));
    // New session (and process group) with the pty as controlling terminal.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::ioctl(0, libc::TIOCSCTTY as _, 0) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let child = command
        .spawn()
        .map_err(|e| GradeError::Sandbox(format!("failed to start program: {}", e)))?;
    // the parent's copies of the slave must go, or EOF never arrives
    drop(slave);
    command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

    let master = File::from(master);
    let input = master.try_clone()?;
    let (tx, rx) = crossbeam_channel::unbounded();
    spawn_reader(master, tx);
    Ok((input, Spawned { child, events: rx }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(use_pty: bool) -> ControllerOptions {
        ControllerOptions {
            timeout: Duration::from_millis(2000),
            grace: Duration::from_millis(200),
            output_limit: 1024 * 1024,
            use_pty,
            workdir: std::env::temp_dir(),
            transcript: None,
        }
    }

    fn shell(script: &str, use_pty: bool) -> ProcessController {
        ProcessController::from_argv(
            vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
            options(use_pty),
        )
        .unwrap()
    }

    #[test]
    fn test_echo_roundtrip_with_pipes() {
        let mut process = shell("read name; echo \"hello $name\"", false);
        process.send("world", true).unwrap();
        let re = Regex::new("hello world").unwrap();
        assert_eq!(process.expect(&re, Duration::from_secs(2)).unwrap(), "hello world");
        let termination = process.terminate("end of test").clone();
        assert_eq!(termination.exit_code, Some(0));
        assert!(!termination.forced);
        assert_eq!(process.state(), RunState::Terminated);
    }

    #[test]
    fn test_echo_roundtrip_with_pty() {
        let mut process = shell("read name; echo \"hi $name\"", true);
        process.send("pty", true).unwrap();
        let re = Regex::new("hi pty").unwrap();
        assert!(process.expect(&re, Duration::from_secs(2)).is_ok());
        assert_eq!(process.terminate("done").exit_code, Some(0));
        assert!(!process.captured_output().contains("\r\n"));
    }

    #[test]
    fn test_eof_reported() {
        let mut process = shell("echo bye", false);
        let re = Regex::new("never printed").unwrap();
        let err = process.expect(&re, Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, GradeError::Eof));
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let mut process = shell("exit 3", false);
        process.start().unwrap();
        let first = process.terminate("first").clone();
        let second = process.terminate("second").clone();
        assert_eq!(first, second);
        assert_eq!(second.reason, "first");
        assert_eq!(second.exit_code, Some(3));
    }

    #[test]
    fn test_terminate_before_start() {
        let mut process = shell("echo never", false);
        let termination = process.terminate("not needed").clone();
        assert_eq!(termination.exit_code, None);
        assert!(process.send("x", true).is_err());
    }
}
