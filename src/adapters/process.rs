//! Subprocess runner backed by `tokio::process`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{CommandError, CommandOutput, CommandRunner, CommandSpec};

/// Runs commands as real child processes.
///
/// Children are killed if the future waiting on them is dropped, so a
/// cancelled caller never leaves a process behind.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        debug!(command = %spec, "Running command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = spec.current_dir {
            command.current_dir(dir);
        }

        let spawn_error = |source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        };

        let mut child = command.spawn().map_err(spawn_error)?;

        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await.map_err(spawn_error)?;
            // Dropping stdin signals EOF
        }

        let output = match spec.timeout {
            Some(limit) => timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| CommandError::TimedOut {
                    program: spec.program.clone(),
                    after: limit,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(spawn_error)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut combined = stdout.clone();
        combined.push_str(&stderr);

        debug!(command = %spec, exit_code = ?output.status.code(), "Command finished");

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout,
            combined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = ProcessRunner::new().run(&spec).await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.combined, "out\nerr\n");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_feeds_stdin() {
        let spec = CommandSpec::new("cat").stdin("kind: Pod\n");
        let output = ProcessRunner::new().run(&spec).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "kind: Pod\n");
    }

    #[tokio::test]
    async fn test_env_and_current_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo $IMG; pwd"])
            .env("IMG", "calicovpp/vpp:latest")
            .current_dir(dir.path());
        let output = ProcessRunner::new().run(&spec).await.unwrap();

        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("calicovpp/vpp:latest"));
        let pwd = std::path::PathBuf::from(lines.next().unwrap());
        assert_eq!(pwd.canonicalize().unwrap(), dir.path().canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_timeout() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Some(Duration::from_millis(50)));
        let result = ProcessRunner::new().run(&spec).await;
        assert!(matches!(result, Err(CommandError::TimedOut { .. })));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz");
        let result = ProcessRunner::new().run(&spec).await;
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }
}
