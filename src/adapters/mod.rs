//! Adapters for the external tools the harness drives.
//!
//! Every tool (make, git, the vagrant project, kubectl) is invoked through
//! a [`CommandRunner`], which captures combined output so callers can embed
//! it in their errors.

pub mod git;
pub mod kubectl;
pub mod make;
pub mod process;
pub mod vagrant;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use kubectl::Kubectl;
pub use process::ProcessRunner;

/// A fully described external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Written to the child's stdin, which is then closed
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// What a finished command left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, None if killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    /// stdout followed by stderr
    pub combined: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Successful output with `stdout` as the only stream
    pub fn ok(stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        Self {
            exit_code: Some(0),
            combined: stdout.clone(),
            stdout,
        }
    }

    /// Failed output carrying `combined` as diagnostics
    pub fn failed(exit_code: i32, combined: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            combined: combined.into(),
        }
    }
}

/// The command never produced an exit status
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {after:?}")]
    TimedOut { program: String, after: Duration },
}

/// Runs external commands to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Run `spec` and turn anything but a zero exit into the combined output
/// (or the runner's own error text) for the caller to wrap
pub async fn run_checked(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<CommandOutput, String> {
    match runner.run(spec).await {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => {
            let code = output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            Err(format!("`{}` exited with {}: {}", spec, code, output.combined.trim()))
        }
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        let spec = CommandSpec::new("git").args(["-C", "../cni-plugin", "checkout", "master"]);
        assert_eq!(spec.to_string(), "git -C ../cni-plugin checkout master");
    }

    #[test]
    fn test_output_success() {
        assert!(CommandOutput::ok("done").success());
        assert!(!CommandOutput::failed(2, "make: *** [image] Error 1").success());
        assert!(!CommandOutput::default().success());
    }
}
