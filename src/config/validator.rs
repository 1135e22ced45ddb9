// Config validation
// Fail fast at startup with actionable errors; soft problems become warnings.

use crate::config::types::{GradeError, HarnessConfig, Result};
use std::path::{Path, PathBuf};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate config before any submission is opened
pub fn validate_config(config: &HarnessConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_timing(config, &mut result);
    validate_sandbox(config, &mut result);
    validate_languages(config, &mut result);

    for warning in &result.warnings {
        log::warn!("config: {}", warning);
    }

    if !result.is_valid() {
        let error_msg = format!("Config validation failed:\n{}", result.errors.join("\n"));
        return Err(GradeError::Config(error_msg));
    }

    Ok(result)
}

fn validate_timing(config: &HarnessConfig, result: &mut ValidationResult) {
    if config.timeout_ms == 0 {
        result.add_error("timeout_ms cannot be zero".to_string());
    }
    // stop script, close and kill each wait one grace period
    if config.grace_ms.saturating_mul(3) > config.timeout_ms {
        result.add_error(format!(
            "grace_ms {} is too large for timeout_ms {} (need 3 * grace <= timeout)",
            config.grace_ms, config.timeout_ms
        ));
    }
    if config.output_limit_bytes == 0 {
        result.add_error("output_limit_bytes cannot be zero".to_string());
    }
    if config.timeout_ms > 10 * 60 * 1000 {
        result.add_warning(format!(
            "timeout_ms {} is very high, stuck programs will hold the run for a long time",
            config.timeout_ms
        ));
    }
}

fn validate_sandbox(config: &HarnessConfig, result: &mut ValidationResult) {
    if find_program(&config.sandbox.program).is_none() {
        if config.sandbox.allow_unsandboxed {
            result.add_warning(format!(
                "sandbox program '{}' not found, programs will run unsandboxed",
                config.sandbox.program
            ));
        } else {
            result.add_error(format!(
                "sandbox program '{}' not found (set sandbox.allow_unsandboxed to run without it)",
                config.sandbox.program
            ));
        }
    }
    if config.sandbox.cpu_time_limit_secs == Some(0) {
        result.add_error("sandbox.cpu_time_limit_secs cannot be zero".to_string());
    }
}

fn validate_languages(config: &HarnessConfig, result: &mut ValidationResult) {
    if crate::judge::backend_for(&config.language, &config.language_config()).is_err() {
        result.add_error(format!("unsupported language: {}", config.language));
    }
    for (name, language) in &config.languages {
        if let Some(parser) = &language.parser {
            if parser.is_empty() {
                result.add_error(format!("languages.{}.parser is empty", name));
            } else if !parser.iter().any(|arg| arg.contains("{file}")) {
                result.add_warning(format!(
                    "languages.{}.parser has no {{file}} placeholder, the path is appended",
                    name
                ));
            }
        }
        if let Some(memcheck) = &language.memcheck {
            if memcheck.is_empty() {
                result.add_error(format!("languages.{}.memcheck is empty", name));
            }
        }
    }
}

/// Resolve a program name against PATH (paths with a slash are checked directly)
pub fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        return path.is_file().then(|| path.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
