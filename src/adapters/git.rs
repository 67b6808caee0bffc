//! Branch selection in component source trees.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use super::{run_checked, CommandRunner, CommandSpec};
use crate::core::error::HarnessError;

/// Switches checkouts with `git -C <path> checkout <branch>`.
///
/// The working tree is left on the selected branch afterwards.
#[derive(Clone)]
pub struct Git {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl Git {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_binary_path(runner, "git")
    }

    pub fn with_binary_path(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    /// Check out `branch` in `path`; no-op when there is no branch
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn select_branch(&self, path: &Path, branch: Option<&str>) -> Result<(), HarnessError> {
        let branch = match branch {
            Some(b) if !b.is_empty() => b,
            _ => return Ok(()),
        };

        info!("Checking out branch");
        let spec = CommandSpec::new(&self.binary)
            .arg("-C")
            .arg(path.display().to_string())
            .args(["checkout", branch]);

        run_checked(self.runner.as_ref(), &spec)
            .await
            .map(|_| ())
            .map_err(|output| HarnessError::BranchCheckout {
                path: path.to_path_buf(),
                branch: branch.to_string(),
                output,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingRunner;
    use crate::adapters::CommandOutput;

    #[tokio::test]
    async fn test_no_branch_is_noop() {
        let runner = RecordingRunner::succeeding();
        let git = Git::new(runner.clone());

        git.select_branch(Path::new("../cni-plugin"), None).await.unwrap();
        git.select_branch(Path::new("../cni-plugin"), Some("")).await.unwrap();

        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_invocation() {
        let runner = RecordingRunner::succeeding();
        let git = Git::new(runner.clone());

        git.select_branch(Path::new("../vpp-manager"), Some("release-v3.20"))
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to_string(), "git -C ../vpp-manager checkout release-v3.20");
    }

    #[tokio::test]
    async fn test_checkout_failure_carries_output() {
        let runner = RecordingRunner::new(|_| {
            Ok(CommandOutput::failed(
                1,
                "error: pathspec 'nope' did not match any file(s) known to git",
            ))
        });
        let git = Git::new(runner);

        let err = git
            .select_branch(Path::new("../calico-vpp"), Some("nope"))
            .await
            .unwrap_err();

        match err {
            HarnessError::BranchCheckout { branch, output, .. } => {
                assert_eq!(branch, "nope");
                assert!(output.contains("did not match"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
