use crate::check::Status;
use crate::config::types::{GradeError, LanguageConfig, Result};
use crate::query::MacroTable;
use crate::tree::{parse_tree_json, Forest, SourceRange, ValueId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Scripts rendered for one run, relative to the working copy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedScript {
    pub run_script: PathBuf,
    pub stop_script: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn status(self) -> Status {
        match self {
            Severity::Info => Status::Pass,
            Severity::Warning => Status::Warn,
            Severity::Error => Status::Fail,
        }
    }
}

/// One build message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub col: Option<usize>,
    /// Warning flag, e.g. `-Wunused-variable`
    pub flag: Option<String>,
    /// Tool output kept when no message in it could be parsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Diagnostic {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
            file: None,
            line: None,
            col: None,
            flag: None,
            raw: None,
        }
    }

    /// A failed build step whose output could not be parsed
    pub fn unparsed(message: impl Into<String>, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            severity: Severity::Error,
            raw: (!raw.trim().is_empty()).then_some(raw),
            ..Self::info(message)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<usize>,
}

/// One memory-safety finding with its call stack
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryFinding {
    pub description: String,
    pub stack: Vec<StackFrame>,
}

impl MemoryFinding {
    /// Leaks warn, every other finding fails
    pub fn status(&self) -> Status {
        if self.description.contains("LEAK") {
            Status::Warn
        } else {
            Status::Fail
        }
    }
}

/// A declaration found in a parsed source file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    /// Canonical signature
    pub signature: String,
    /// Source file, relative to the working copy
    pub file: PathBuf,
    pub node: ValueId,
    pub range: SourceRange,
}

/// Language backend contract: scripts in, structured results out.
pub trait LanguageBackend: Send + Sync {
    fn language(&self) -> &'static str;
    /// Suffix given to added source files
    fn suffix(&self) -> &'static str;
    fn is_source(&self, path: &Path) -> bool;
    fn macros(&self) -> MacroTable;
    fn comment_prefix(&self) -> &'static str;
    fn render_script(&self, workdir: &Path, sources: &[PathBuf]) -> Result<RenderedScript>;
    fn build_diagnostics(&self, workdir: &Path) -> Result<Vec<Diagnostic>>;
    fn memory_findings(&self, workdir: &Path) -> Result<Vec<MemoryFinding>>;
    /// Exit code recorded by the script, which may differ from the wrapper's
    fn exit_code(&self, workdir: &Path) -> Option<i32>;
    fn parse_source(&self, path: &Path) -> Result<serde_json::Value>;
    fn declarations(&self, forest: &Forest, root: ValueId, text: &str) -> Vec<Declaration>;
    fn canonical_signature(&self, text: &str) -> String;
}

/// Run a configured parser command (`{file}` replaced by the path, appended when absent)
pub fn run_parser(language: &str, config: &LanguageConfig, path: &Path) -> Result<serde_json::Value> {
    let parser = config.parser.as_ref().ok_or_else(|| {
        GradeError::Config(format!("no parser configured for language {}", language))
    })?;
    let file = path.to_string_lossy();
    let mut argv: Vec<String> = parser.iter().map(|arg| arg.replace("{file}", &file)).collect();
    if !parser.iter().any(|arg| arg.contains("{file}")) {
        argv.push(file.to_string());
    }
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| GradeError::Config(format!("empty parser command for {}", language)))?;
    let output = Command::new(program).args(args).output()?;
    if !output.status.success() {
        return Err(GradeError::ParseTree(format!(
            "parser failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    parse_tree_json(&output.stdout).map_err(|e| {
        GradeError::ParseTree(format!("parser output for {} is not JSON: {}", path.display(), e))
    })
}

/// Read a small integer file written by a script (`echo $? > file`)
pub fn read_return_code(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Remove the return codes and memory-checker logs of an earlier run.
///
/// Scripts are rendered once per run into the same working copy; a stale
/// `run.ret` would otherwise stand in for the exit code of a killed program.
pub fn clear_run_outputs(workdir: &Path) -> Result<()> {
    let build = workdir.join("log/build");
    if build.is_dir() {
        for entry in std::fs::read_dir(&build)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "ret") {
                std::fs::remove_file(&path)?;
            }
        }
    }
    match std::fs::remove_file(workdir.join("log/run/run.ret")) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    let memchk = workdir.join("log/memchk");
    if memchk.is_dir() {
        std::fs::remove_dir_all(&memchk)?;
    }
    Ok(())
}

/// Quote a path for a POSIX shell script
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Log file stem for a source path: `dir/x.c` -> `dir_x.c`
pub fn log_stem(path: &Path) -> String {
    path.to_string_lossy().replace(['/', '\\'], "_")
}
