/// Core types and configuration structures for gradebox
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Per-language toolchain settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LanguageConfig {
    /// Compiler executable (gcc for C)
    pub compiler: Option<String>,
    /// Extra compiler arguments appended to the backend defaults
    pub compiler_args: Vec<String>,
    /// Extra linker arguments
    pub linker_args: Vec<String>,
    /// Interpreter executable (python3 for Python)
    pub interpreter: Option<String>,
    /// Memory checker prefix, e.g. ["drmemory", "-batch", "-logdir", "{logdir}", "--"]
    pub memcheck: Option<Vec<String>>,
    /// External parser command producing a JSON parse tree on stdout.
    /// `{file}` is replaced by the source path.
    pub parser: Option<Vec<String>>,
}

/// Sandbox wrapper settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Sandbox executable
    pub program: String,
    /// Extra wrapper arguments placed before the script
    pub extra_args: Vec<String>,
    /// Allow ptrace inside the sandbox (needed by memory checkers)
    pub allow_debuggers: bool,
    /// Mount a throwaway overlay over the filesystem
    pub overlay_tmpfs: bool,
    /// CPU time limit passed to the wrapper
    pub cpu_time_limit_secs: Option<u64>,
    /// Run the script directly when the sandbox program is missing
    pub allow_unsandboxed: bool,
    /// Talk to the child through a pseudo-terminal instead of pipes
    pub use_pty: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            program: "firejail".to_string(),
            extra_args: Vec::new(),
            allow_debuggers: true,
            overlay_tmpfs: false,
            cpu_time_limit_secs: None,
            allow_unsandboxed: false,
            use_pty: true,
        }
    }
}

/// Harness configuration, passed explicitly to every submission
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Project directory holding `src/` and receiving `test-NNN` archives
    pub project_dir: PathBuf,
    /// Active language backend
    pub language: String,
    /// Per-operation timeout for reads and draining
    pub timeout_ms: u64,
    /// Grace period between termination steps
    pub grace_ms: u64,
    /// Maximum captured program output
    pub output_limit_bytes: usize,
    /// Log tracebacks of contained failures
    pub debug: bool,
    /// Keep `test-NNN` directories after archiving
    pub keep_workdir: bool,
    pub sandbox: SandboxConfig,
    pub languages: BTreeMap<String, LanguageConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            language: "c".to_string(),
            timeout_ms: 5000,
            grace_ms: 1000,
            output_limit_bytes: 8 * 1024 * 1024,
            debug: false,
            keep_workdir: false,
            sandbox: SandboxConfig::default(),
            languages: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Toolchain settings for the active language (defaults when unset)
    pub fn language_config(&self) -> LanguageConfig {
        self.languages
            .get(&self.language)
            .cloned()
            .unwrap_or_default()
    }
}

/// Custom error types for gradebox
#[derive(Error, Debug)]
pub enum GradeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("Set operation on pinned query result (pins: {0})")]
    PinnedSetOperation(String),

    #[error("Parse tree error: {0}")]
    ParseTree(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("End of output stream")]
    Eof,

    #[error("Backend error: {message}")]
    Backend { message: String, raw: String },

    #[error("Archive error: {0}")]
    Archive(String),
}

impl From<nix::errno::Errno> for GradeError {
    fn from(err: nix::errno::Errno) -> Self {
        GradeError::Process(format!("System error: {}", err))
    }
}

impl From<zip::result::ZipError> for GradeError {
    fn from(err: zip::result::ZipError) -> Self {
        GradeError::Archive(err.to_string())
    }
}

impl From<regex::Error> for GradeError {
    fn from(err: regex::Error) -> Self {
        GradeError::Pattern(err.to_string())
    }
}

impl From<walkdir::Error> for GradeError {
    fn from(err: walkdir::Error) -> Self {
        GradeError::Io(std::io::Error::other(err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, GradeError>;
