/// Sandbox wrapper invocation
use crate::config::types::{GradeError, Result, SandboxConfig};
use crate::config::validator::find_program;
use std::path::{Path, PathBuf};

const SHELL: &str = "/bin/bash";

/// Builds the wrapper command lines for one run
#[derive(Clone, Debug)]
pub struct SandboxCommand {
    config: SandboxConfig,
    instance: String,
    program: Option<PathBuf>,
}

impl SandboxCommand {
    /// Resolve the sandbox program; fall back to a direct shell only when allowed
    pub fn new(config: &SandboxConfig, instance: impl Into<String>) -> Result<Self> {
        let program = find_program(&config.program);
        if program.is_none() {
            if !config.allow_unsandboxed {
                return Err(GradeError::Sandbox(format!(
                    "sandbox program '{}' not found",
                    config.program
                )));
            }
            log::warn!(
                "sandbox program '{}' not found, running unsandboxed",
                config.program
            );
        }
        Ok(Self {
            config: config.clone(),
            instance: instance.into(),
            program,
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn is_sandboxed(&self) -> bool {
        self.program.is_some()
    }

    /// `firejail --quiet --name=<instance> [options] /bin/bash <script>`
    pub fn run_argv(&self, script: &Path) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(program) = &self.program {
            argv.push(program.to_string_lossy().into_owned());
            argv.push("--quiet".to_string());
            argv.push(format!("--name={}", self.instance));
            if self.config.allow_debuggers {
                argv.push("--allow-debuggers".to_string());
            }
            if self.config.overlay_tmpfs {
                argv.push("--overlay-tmpfs".to_string());
            }
            if let Some(secs) = self.config.cpu_time_limit_secs {
                argv.push(format!("--rlimit-cpu={}", secs));
            }
            argv.extend(self.config.extra_args.iter().cloned());
        }
        argv.push(SHELL.to_string());
        argv.push(script.to_string_lossy().into_owned());
        argv
    }

    /// Run the stop script inside the same sandbox instance
    pub fn stop_argv(&self, script: &Path) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(program) = &self.program {
            argv.push(program.to_string_lossy().into_owned());
            argv.push("--quiet".to_string());
            argv.push(format!("--join={}", self.instance));
        }
        argv.push(SHELL.to_string());
        argv.push(script.to_string_lossy().into_owned());
        argv
    }
}

/// Build a `Command` from an argv vector
pub fn command_for(argv: &[String], workdir: &Path) -> Result<std::process::Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| GradeError::Sandbox("empty command".to_string()))?;
    let mut command = std::process::Command::new(program);
    command.args(args).current_dir(workdir);
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_with(program: &str) -> SandboxConfig {
        SandboxConfig {
            program: program.to_string(),
            allow_unsandboxed: true,
            cpu_time_limit_secs: Some(10),
            overlay_tmpfs: true,
            extra_args: vec!["--net=none".to_string()],
            ..SandboxConfig::default()
        }
    }

    #[test]
    fn test_sandboxed_argv() {
        // any existing program stands in for the wrapper
        let command = SandboxCommand::new(&sandbox_with("/bin/sh"), "gradebox-1").unwrap();
        assert!(command.is_sandboxed());
        let argv = command.run_argv(Path::new("make.sh"));
        assert_eq!(
            argv,
            vec![
                "/bin/sh",
                "--quiet",
                "--name=gradebox-1",
                "--allow-debuggers",
                "--overlay-tmpfs",
                "--rlimit-cpu=10",
                "--net=none",
                "/bin/bash",
                "make.sh",
            ]
        );
        let stop = command.stop_argv(Path::new("stop.sh"));
        assert_eq!(
            stop,
            vec!["/bin/sh", "--quiet", "--join=gradebox-1", "/bin/bash", "stop.sh"]
        );
    }

    #[test]
    fn test_unsandboxed_fallback() {
        let command = SandboxCommand::new(&sandbox_with("/nonexistent/jail"), "x").unwrap();
        assert!(!command.is_sandboxed());
        assert_eq!(command.run_argv(Path::new("make.sh")), vec!["/bin/bash", "make.sh"]);
    }

    #[test]
    fn test_missing_sandbox_rejected() {
        let mut config = sandbox_with("/nonexistent/jail");
        config.allow_unsandboxed = false;
        let err = SandboxCommand::new(&config, "x").unwrap_err();
        assert!(matches!(err, GradeError::Sandbox(_)));
    }

    #[test]
    fn test_command_for_empty() {
        assert!(command_for(&[], Path::new(".")).is_err());
    }
}
