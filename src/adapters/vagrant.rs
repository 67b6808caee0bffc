//! Cluster provisioning and image loading via the vagrant multi-node project.
//!
//! Every target runs as `bash -c "source ./<env-file> && make <target>"`
//! inside the project directory, so the project's own environment file
//! decides node count, box, and networking options.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use super::git::Git;
use super::{run_checked, CommandRunner, CommandSpec};
use crate::config::{ClusterSettings, Tools};
use crate::core::error::HarnessError;
use crate::domain::{ClusterHandle, ComponentSpec, ImageName};

/// Drives the provisioning project's Makefile
#[derive(Clone)]
pub struct Vagrant {
    runner: Arc<dyn CommandRunner>,
    git: Git,
    shell: String,
    make: String,
    settings: ClusterSettings,
    timeout: Option<Duration>,
}

impl Vagrant {
    pub fn new(runner: Arc<dyn CommandRunner>, tools: &Tools, settings: ClusterSettings) -> Self {
        Self {
            git: Git::with_binary_path(runner.clone(), &tools.git),
            runner,
            shell: tools.shell.clone(),
            make: tools.make.clone(),
            settings,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn make_target(&self, project: &Path, target: &str, extra: &[String]) -> CommandSpec {
        let mut script = format!("source ./{} && {} {}", self.settings.env_file, self.make, target);
        for arg in extra {
            script.push(' ');
            script.push_str(arg);
        }
        CommandSpec::new(&self.shell)
            .args(["-c".to_string(), script])
            .current_dir(project)
            .timeout(self.timeout)
    }

    /// Bring the cluster up. Never retried: a half-provisioned cluster needs
    /// manual cleanup before another attempt.
    #[instrument(skip(self, spec), fields(path = %spec.path.display()))]
    pub async fn provision_cluster(&self, spec: &ComponentSpec) -> Result<ClusterHandle, HarnessError> {
        if !spec.path.is_dir() {
            return Err(HarnessError::MissingSource {
                component: spec.component,
                path: spec.path.clone(),
            });
        }

        self.git.select_branch(&spec.path, spec.branch.as_deref()).await?;

        info!("Starting vagrant k8s cluster");
        let command = self.make_target(&spec.path, &self.settings.up_target, &[]);
        run_checked(self.runner.as_ref(), &command)
            .await
            .map_err(|output| HarnessError::Provision { output })?;

        Ok(ClusterHandle::new(spec.path.clone()).with_kubeconfig(self.settings.kubeconfig.clone()))
    }

    /// Load one image into every node of the cluster
    #[instrument(skip(self, cluster))]
    pub async fn push_image(&self, cluster: &ClusterHandle, image: &ImageName) -> Result<(), HarnessError> {
        info!("Loading image into cluster");
        let jobs = format!("-j{}", self.settings.load_jobs);
        let command = self
            .make_target(&cluster.project, &self.settings.load_target, &[jobs])
            .env("IMG", image.as_str());

        run_checked(self.runner.as_ref(), &command)
            .await
            .map(|_| ())
            .map_err(|output| HarnessError::Push {
                image: image.clone(),
                output,
            })
    }

    /// Load images one at a time, in order. The first failure stops the
    /// loop; images already loaded stay loaded.
    pub async fn push_images(&self, cluster: &ClusterHandle, images: &[ImageName]) -> Result<(), HarnessError> {
        for image in images {
            self.push_image(cluster, image).await?;
        }
        Ok(())
    }

    /// Tear the cluster down with the project's destroy target
    #[instrument(skip(self, cluster), fields(path = %cluster.project.display()))]
    pub async fn destroy_cluster(&self, cluster: &ClusterHandle) -> Result<(), HarnessError> {
        warn!("Destroying vagrant k8s cluster");
        let command = self.make_target(&cluster.project, &self.settings.destroy_target, &[]);
        run_checked(self.runner.as_ref(), &command)
            .await
            .map(|_| ())
            .map_err(|output| HarnessError::Provision { output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::CommandOutput;
    use crate::domain::Component;
    use crate::fakes::RecordingRunner;
    use tempfile::TempDir;

    fn vagrant(runner: Arc<RecordingRunner>) -> Vagrant {
        Vagrant::new(runner, &Tools::default(), ClusterSettings::default())
    }

    fn project(dir: &TempDir, branch: Option<&str>) -> ComponentSpec {
        ComponentSpec {
            component: Component::Vagrant,
            path: dir.path().to_path_buf(),
            branch: branch.map(str::to_string),
            image: None,
        }
    }

    #[tokio::test]
    async fn test_provision_runs_make_up_in_project() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::succeeding();

        let handle = vagrant(runner.clone())
            .provision_cluster(&project(&dir, None))
            .await
            .unwrap();

        assert_eq!(handle.project, dir.path());
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "bash");
        assert_eq!(calls[0].args, vec!["-c", "source ./calicovpp.env && make up"]);
        assert_eq!(calls[0].current_dir.as_deref(), Some(dir.path()));
    }

    #[tokio::test]
    async fn test_provision_selects_branch_first() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::succeeding();

        vagrant(runner.clone())
            .provision_cluster(&project(&dir, Some("calicovpp")))
            .await
            .unwrap();

        let programs: Vec<String> = runner.calls().iter().map(|c| c.program.clone()).collect();
        assert_eq!(programs, vec!["git", "bash"]);
    }

    #[tokio::test]
    async fn test_provision_failure_embeds_output() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new(|_| Ok(CommandOutput::failed(1, "VirtualBox is not installed")));

        let err = vagrant(runner)
            .provision_cluster(&project(&dir, None))
            .await
            .unwrap_err();

        match err {
            HarnessError::Provision { output } => assert!(output.contains("VirtualBox")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_push_passes_image_and_jobs() {
        let runner = RecordingRunner::succeeding();
        let cluster = ClusterHandle::new("/work/vagrant");

        vagrant(runner.clone())
            .push_image(&cluster, &ImageName::new("calico/cni:latest"))
            .await
            .unwrap();

        let calls = runner.calls();
        let call = &calls[0];
        assert_eq!(call.args[1], "source ./calicovpp.env && make load-image -j3");
        assert_eq!(
            call.env,
            vec![("IMG".to_string(), "calico/cni:latest".to_string())]
        );
    }
}
