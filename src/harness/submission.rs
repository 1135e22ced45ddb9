/// One submission's evaluation: working copy, check tree and source index
use crate::check::recorder::failure_message;
use crate::check::{contained, describe, BlockKind, Check, CheckStack, Recorder, Status};
use crate::config::types::{HarnessConfig, Result};
use crate::harness::archive::write_archive;
use crate::harness::run::Run;
use crate::harness::workspace::SubmissionWorkspace;
use crate::judge::{backend_for, LanguageBackend, SourceIndex};
use crate::query::{self, QueryResult};
use regex::Regex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

pub struct Submission {
    config: HarnessConfig,
    backend: Box<dyn LanguageBackend>,
    workspace: SubmissionWorkspace,
    checks: CheckStack,
    index: Option<SourceIndex>,
}

impl Recorder for Submission {
    fn checks(&mut self) -> &mut CheckStack {
        &mut self.checks
    }

    fn debug(&self) -> bool {
        self.config.debug
    }
}

impl Submission {
    /// Materialise the working copy `test-NNN` and start an empty check tree
    pub fn open(config: &HarnessConfig, number: usize, text: &str) -> Result<Self> {
        let backend = backend_for(&config.language, &config.language_config())?;
        let workspace =
            SubmissionWorkspace::create(&config.project_dir, number, config.keep_workdir)?;
        log::info!("Evaluating test {}: {}", number, text);
        Ok(Self {
            config: config.clone(),
            backend,
            workspace,
            checks: CheckStack::new(text),
            index: None,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn LanguageBackend {
        self.backend.as_ref()
    }

    pub fn workspace(&self) -> &SubmissionWorkspace {
        &self.workspace
    }

    pub(crate) fn workspace_mut(&mut self) -> &mut SubmissionWorkspace {
        &mut self.workspace
    }

    /// Source files the backend builds, relative to the working copy
    pub fn sources(&self) -> Vec<PathBuf> {
        self.workspace
            .files()
            .iter()
            .filter(|path| self.backend.is_source(path))
            .cloned()
            .collect()
    }

    /// Parse the sources on first use
    pub fn source_index(&mut self) -> Result<&SourceIndex> {
        let index = match self.index.take() {
            Some(index) => index,
            None => {
                let sources = self.sources();
                SourceIndex::load(self.backend.as_ref(), self.workspace.dir(), &sources)?
            }
        };
        Ok(self.index.insert(index))
    }

    /// Record whether the code declares `signature` (by name when it has no parameter list)
    pub fn has(&mut self, signature: &str) -> Status {
        let text = format!("code declares `{}`", describe(signature));
        let loaded = self.source_index().map(|_| ());
        if let Err(e) = loaded {
            return self.add(Status::Fail, text, Some(format!("internal error: {}", e)));
        }
        let found = self
            .index
            .as_ref()
            .is_some_and(|index| index.lookup(self.backend.as_ref(), signature).is_some());
        self.check(found, text)
    }

    /// Descendant search over every source file, with the backend's macros
    pub fn query(&mut self, text: &str) -> Result<QueryResult<'_>> {
        let macros = self.backend.macros();
        let index = self.source_index()?;
        query::run(index.forest(), &index.roots(), text, &macros)
    }

    /// Whether any source file's text matches `pattern`
    pub fn source_matches(&self, pattern: &Regex) -> Result<bool> {
        for path in self.sources() {
            let text = std::fs::read_to_string(self.workspace.dir().join(&path))?;
            if pattern.is_match(&text) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Add a source file to the submission; the index is rebuilt on next use
    pub fn add_source(&mut self, text: &str) -> Result<PathBuf> {
        let suffix = self.backend.suffix();
        let path = self.workspace.add_source(text, suffix)?;
        self.index = None;
        log::debug!("Added source {}", path.display());
        Ok(path)
    }

    /// Comment out the declaration `name`; false when there is none
    pub fn del_source(&mut self, name: &str) -> Result<bool> {
        self.source_index()?;
        let dir = self.workspace.dir().to_path_buf();
        match self.index.as_mut() {
            Some(index) => index.comment_out(self.backend.as_ref(), &dir, name),
            None => Ok(false),
        }
    }

    /// Build and execute the program inside a contained `All` block.
    ///
    /// `stdin` is sent as soon as the program starts. Compile and memory checks
    /// are prepended to the block once the body returns.
    pub fn run<F>(&mut self, stdin: Option<&str>, eol: bool, body: F) -> Status
    where
        F: FnOnce(&mut Run<'_>) -> anyhow::Result<()>,
    {
        let text = match stdin {
            Some(input) => format!("build and execute program with input `{}`", describe(input)),
            None => "build and execute program".to_string(),
        };
        contained(self, BlockKind::All, &text, |submission| -> anyhow::Result<()> {
            let mut run = Run::new(submission, stdin, eol)?;
            let outcome = catch_unwind(AssertUnwindSafe(|| body(&mut run)));
            let closed = run.close();
            match outcome {
                Ok(result) => {
                    closed?;
                    result
                }
                Err(payload) => std::panic::resume_unwind(payload),
            }
        })
    }

    /// Seal the check tree, write `test-NNN.zip` and drop the working copy
    pub fn close(mut self) -> Result<(Check, PathBuf)> {
        let checks = std::mem::replace(&mut self.checks, CheckStack::new(""));
        let root = checks.finish();
        let archive = write_archive(&self.workspace, &root)?;
        self.workspace.cleanup()?;
        log::info!(
            "Test {} finished with {} ({} checks)",
            self.workspace.number(),
            root.status,
            root.count()
        );
        Ok((root, archive))
    }
}

/// Evaluate one submission; failures of `body` are recorded, never propagated.
///
/// Only a working copy that cannot be created or an archive that cannot be
/// written is an error.
pub fn evaluate<F>(
    config: &HarnessConfig,
    number: usize,
    text: &str,
    body: F,
) -> Result<(Check, PathBuf)>
where
    F: FnOnce(&mut Submission) -> anyhow::Result<()>,
{
    let mut submission = Submission::open(config, number, text)?;
    let outcome = catch_unwind(AssertUnwindSafe(|| body(&mut submission)));
    if let Some(message) = failure_message(text, outcome) {
        if config.debug {
            log::error!(
                "evaluation of test {} aborted: {}\n{}",
                number,
                message,
                std::backtrace::Backtrace::force_capture()
            );
        }
        submission.add(
            Status::Fail,
            "evaluation completed",
            Some(format!("internal error: {}", message)),
        );
    }
    submission.close()
}
