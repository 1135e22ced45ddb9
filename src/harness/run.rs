/// Interactive build-and-execute session of one submission
///
/// The program is started lazily by the first `get`, `put` or accessor. Every
/// step is logged to `log/run/run.log`; the raw output goes to `log/run/stdout.log`.
use crate::check::{describe, BlockKind, Check, CheckStack, Recorder, Status};
use crate::config::types::{GradeError, Result};
use crate::exec::{ControllerOptions, ProcessController, SandboxCommand, Termination};
use crate::harness::submission::Submission;
use crate::harness::workspace::short_id;
use crate::judge::{Diagnostic, MemoryFinding};
use regex::bytes::Regex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Archive name of the rendered build+run script
pub const SCRIPT_ARCHIVE_NAME: &str = "src/make.sh";

pub struct Run<'s> {
    submission: &'s mut Submission,
    stdin: Option<String>,
    eol: bool,
    controller: Option<ProcessController>,
    transcript: File,
}

impl Recorder for Run<'_> {
    fn checks(&mut self) -> &mut CheckStack {
        self.submission.checks()
    }

    fn debug(&self) -> bool {
        self.submission.debug()
    }
}

impl<'s> Run<'s> {
    pub(crate) fn new(
        submission: &'s mut Submission,
        stdin: Option<&str>,
        eol: bool,
    ) -> Result<Self> {
        let path = submission.workspace().log_file("run", "run.log")?;
        let transcript = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            submission,
            stdin: stdin.map(str::to_string),
            eol,
            controller: None,
            transcript,
        })
    }

    fn log(&mut self, line: impl AsRef<str>) {
        let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
        if let Err(e) = writeln!(self.transcript, "[{}] {}", stamp, line.as_ref()) {
            log::debug!("run transcript write failed: {}", e);
        }
    }

    /// Render the script and start the program on first use
    fn process(&mut self) -> Result<&mut ProcessController> {
        let controller = match self.controller.take() {
            Some(controller) => controller,
            None => self.launch()?,
        };
        Ok(self.controller.insert(controller))
    }

    fn launch(&mut self) -> Result<ProcessController> {
        let submission = &mut *self.submission;
        let workdir = submission.workspace().dir().to_path_buf();
        let sources = submission.sources();
        let rendered = submission.backend().render_script(&workdir, &sources)?;
        submission
            .workspace_mut()
            .add_extra(SCRIPT_ARCHIVE_NAME, workdir.join(&rendered.run_script));

        let sandbox = SandboxCommand::new(
            &submission.config().sandbox,
            format!("gradebox-{}", short_id()),
        )?;
        let mut options = ControllerOptions::from_config(submission.config(), &workdir);
        options.transcript = Some(submission.workspace().log_file("run", "stdout.log")?);
        let mut controller = ProcessController::new(
            &sandbox,
            &rendered.run_script,
            rendered.stop_script.as_deref(),
            options,
        )?;
        controller.start()?;
        self.log(format!(
            "start: {} in sandbox {}",
            rendered.run_script.display(),
            if sandbox.is_sandboxed() { sandbox.instance() } else { "(none)" }
        ));

        if let Some(input) = self.stdin.clone() {
            self.log(format!("send: {:?}", input));
            controller.send(&input, self.eol)?;
        }
        Ok(controller)
    }

    /// Expect the literal `text` in the program output
    pub fn get(&mut self, text: &str) -> Status {
        let pattern = Regex::new(&regex::escape(text)).map_err(GradeError::from);
        self.expect_output(pattern, text)
    }

    /// Expect output matching the regular expression `pattern`
    pub fn get_regex(&mut self, pattern: &str) -> Status {
        let compiled = Regex::new(pattern).map_err(GradeError::from);
        self.expect_output(compiled, pattern)
    }

    fn expect_output(&mut self, pattern: Result<Regex>, shown: &str) -> Status {
        let label = format!("program prints `{}`", describe(shown));
        self.log(format!("expect: {:?}", shown));
        let timeout = self.submission.config().timeout();
        let outcome = pattern.and_then(|pattern| {
            let controller = self.process()?;
            controller.expect(&pattern, timeout)
        });
        match outcome {
            Ok(found) => {
                self.log(format!("got: {:?}", found));
                self.add(Status::Pass, label, None)
            }
            Err(GradeError::Eof) => {
                self.log("error: end of file");
                let status = self.add(Status::Fail, format!("{}: got end-of-file", label), None);
                self.stop("end of file");
                status
            }
            Err(GradeError::Timeout(after)) => {
                self.log(format!("error: timeout after {:?}", after));
                let status = self.add(Status::Fail, format!("{}: got timeout", label), None);
                self.stop("timeout");
                status
            }
            Err(e) => {
                self.log(format!("error: {}", e));
                let status = self.add(
                    Status::Fail,
                    format!("{}: got internal error", label),
                    Some(e.to_string()),
                );
                self.stop("internal error");
                status
            }
        }
    }

    /// Send a line to the program
    pub fn put(&mut self, text: &str) -> Status {
        self.send(text, true)
    }

    /// Send `text` without a trailing newline
    pub fn put_raw(&mut self, text: &str) -> Status {
        self.send(text, false)
    }

    fn send(&mut self, text: &str, eol: bool) -> Status {
        let label = format!("program reads `{}`", describe(text));
        self.log(format!("send: {:?}", text));
        match self.process().and_then(|controller| controller.send(text, eol)) {
            Ok(()) => self.add(Status::Pass, label, None),
            Err(e) => {
                self.log(format!("error: {}", e));
                let status = self.add(
                    Status::Fail,
                    format!("{}: got internal error", label),
                    Some(e.to_string()),
                );
                self.stop("internal error");
                status
            }
        }
    }

    /// Terminate a started program; never starts one
    fn stop(&mut self, reason: &str) {
        let live = self
            .controller
            .as_ref()
            .is_some_and(|controller| controller.termination().is_none());
        if live {
            self.log(format!("terminate: {}", reason));
        }
        if let Some(controller) = self.controller.as_mut() {
            controller.terminate(reason);
        }
    }

    /// Terminate the program (starting it first if needed); the first reason sticks
    pub fn terminate(&mut self, reason: &str) -> Result<Termination> {
        let cached = self
            .controller
            .as_ref()
            .and_then(|controller| controller.termination().cloned());
        if let Some(done) = cached {
            return Ok(done);
        }
        self.log(format!("terminate: {}", reason));
        let termination = self.process()?.terminate(reason).clone();
        self.log(format!(
            "terminated: exit code {:?}, signal {:?}{}",
            termination.exit_code,
            termination.signal,
            if termination.forced { ", killed" } else { "" }
        ));
        Ok(termination)
    }

    /// Exit code of the program.
    ///
    /// The code recorded by the build script wins over the wrapper's; a program
    /// killed by a signal reports `128 + signal`.
    pub fn exit_code(&mut self) -> Result<Option<i32>> {
        let termination = self.terminate("exit code requested")?;
        let workdir = self.submission.workspace().dir().to_path_buf();
        Ok(self
            .submission
            .backend()
            .exit_code(&workdir)
            .or(termination.exit_code)
            .or(termination.signal.map(|signal| 128 + signal)))
    }

    pub fn signal(&mut self) -> Result<Option<i32>> {
        Ok(self.terminate("signal requested")?.signal)
    }

    /// Everything the program printed (bounded by the output limit)
    pub fn stdout(&mut self) -> Result<String> {
        self.terminate("stdout requested")?;
        Ok(self
            .controller
            .as_ref()
            .map(ProcessController::captured_output)
            .unwrap_or_default())
    }

    pub fn termination_reason(&mut self) -> Result<String> {
        Ok(self.terminate("termination reason requested")?.reason)
    }

    /// Terminate, then put compile and memory checks ahead of the body's checks.
    ///
    /// A run whose program was never started records nothing.
    pub(crate) fn close(&mut self) -> Result<()> {
        if self.controller.is_none() {
            self.log("close: program never started");
            return Ok(());
        }
        self.terminate("end of test")?;
        let workdir = self.submission.workspace().dir().to_path_buf();
        let backend = self.submission.backend();

        let compile = match backend.build_diagnostics(&workdir) {
            Ok(diagnostics) => diagnostics
                .iter()
                .map(|diagnostic| diagnostic_check(&workdir, diagnostic))
                .collect(),
            Err(GradeError::Backend { message, raw }) => {
                vec![Check::new(Status::Fail, message).with_details(raw).auto()]
            }
            Err(e) => return Err(e),
        };
        let memory = match backend.memory_findings(&workdir) {
            Ok(findings) => findings.iter().map(finding_check).collect(),
            Err(GradeError::Backend { message, raw }) => {
                vec![Check::new(Status::Fail, message).with_details(raw).auto()]
            }
            Err(e) => return Err(e),
        };

        let mut blocks = Vec::new();
        for (text, checks) in [
            ("compile every source file", compile),
            ("safety checks", memory),
        ] {
            if !checks.is_empty() {
                blocks.push(all_block(text, checks));
            }
        }
        self.log(format!("close: {} report blocks", blocks.len()));
        self.submission.checks().prepend(blocks);
        Ok(())
    }
}

fn all_block(text: &str, checks: Vec<Check>) -> Check {
    let mut block = Check::new(
        BlockKind::All.reduce(checks.iter().map(|check| check.status)),
        text,
    )
    .auto();
    block.checks = checks;
    block
}

fn diagnostic_check(workdir: &Path, diagnostic: &Diagnostic) -> Check {
    let text = match &diagnostic.flag {
        Some(flag) => format!("{} [{}]", diagnostic.message, flag),
        None => diagnostic.message.clone(),
    };
    let check = Check::new(diagnostic.severity.status(), text).auto();
    match source_context(workdir, diagnostic).or_else(|| diagnostic.raw.clone()) {
        Some(details) => check.with_details(details),
        None => check,
    }
}

/// `file:line:col` followed by the offending line and a caret under the column
fn source_context(workdir: &Path, diagnostic: &Diagnostic) -> Option<String> {
    let file = diagnostic.file.as_deref()?;
    let line_no = diagnostic.line?;
    let mut context = match diagnostic.col {
        Some(col) => format!("{}:{}:{}", file, line_no, col),
        None => format!("{}:{}", file, line_no),
    };
    let text = std::fs::read_to_string(workdir.join(file)).ok();
    let line = text
        .as_deref()
        .and_then(|text| text.lines().nth(line_no.checked_sub(1)?));
    if let Some(line) = line {
        context.push('\n');
        context.push_str(line);
        if let Some(col) = diagnostic.col {
            let before: String = line.chars().take(col.saturating_sub(1)).collect();
            let pad: String = before
                .chars()
                .map(|c| if c == '\t' { '\t' } else { ' ' })
                .collect();
            context.push('\n');
            context.push_str(&pad);
            context.push('^');
        }
    }
    Some(context)
}

fn finding_check(finding: &MemoryFinding) -> Check {
    let stack: Vec<String> = finding
        .stack
        .iter()
        .map(|frame| match (&frame.file, frame.line) {
            (Some(file), Some(line)) => format!("{} ({}:{})", frame.function, file, line),
            (Some(file), None) => format!("{} ({})", frame.function, file),
            _ => frame.function.clone(),
        })
        .collect();
    let check = Check::new(finding.status(), finding.description.clone()).auto();
    if stack.is_empty() {
        check
    } else {
        check.with_details(stack.join("\n"))
    }
}
