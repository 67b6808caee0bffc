//! Image builds through each component's Makefile.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use super::git::Git;
use super::{run_checked, CommandRunner, CommandSpec};
use crate::core::error::HarnessError;
use crate::domain::{ComponentSpec, ImageName};

/// Runs `make -C <path> <target>`
#[derive(Clone)]
pub struct Make {
    binary: String,
    runner: Arc<dyn CommandRunner>,
    timeout: Option<Duration>,
}

impl Make {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_binary_path(runner, "make")
    }

    pub fn with_binary_path(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            runner,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build `target` in `path`. Each call starts a full build.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn build(&self, path: &Path, target: &str) -> Result<(), HarnessError> {
        info!("Running build");
        let spec = CommandSpec::new(&self.binary)
            .arg("-C")
            .arg(path.display().to_string())
            .arg(target)
            .timeout(self.timeout);

        run_checked(self.runner.as_ref(), &spec)
            .await
            .map(|_| ())
            .map_err(|output| HarnessError::Build {
                path: path.to_path_buf(),
                target: target.to_string(),
                output,
            })
    }
}

/// Builds component images, switching branches first when asked to
#[derive(Clone)]
pub struct ImageBuilder {
    git: Git,
    make: Make,
    target: String,
}

impl ImageBuilder {
    pub fn new(git: Git, make: Make, target: impl Into<String>) -> Self {
        Self {
            git,
            make,
            target: target.into(),
        }
    }

    /// Select the component's branch, then build its image
    #[instrument(skip(self, spec), fields(component = %spec.component))]
    pub async fn build_image(&self, spec: &ComponentSpec) -> Result<Option<ImageName>, HarnessError> {
        if !spec.path.is_dir() {
            return Err(HarnessError::MissingSource {
                component: spec.component,
                path: spec.path.clone(),
            });
        }

        self.git.select_branch(&spec.path, spec.branch.as_deref()).await?;
        self.make.build(&spec.path, &self.target).await?;

        Ok(spec.image.clone())
    }

    /// Build every spec in order, stopping at the first failure
    pub async fn build_all(&self, specs: &[&ComponentSpec]) -> Result<Vec<ImageName>, HarnessError> {
        let mut images = Vec::with_capacity(specs.len());
        for spec in specs {
            if let Some(image) = self.build_image(spec).await? {
                images.push(image);
            }
        }
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::CommandOutput;
    use crate::domain::Component;
    use crate::fakes::RecordingRunner;
    use tempfile::TempDir;

    fn spec_in(dir: &TempDir, component: Component, branch: Option<&str>) -> ComponentSpec {
        let path = dir.path().join(component.key());
        std::fs::create_dir_all(&path).unwrap();
        ComponentSpec {
            component,
            path,
            branch: branch.map(str::to_string),
            image: component.image(),
        }
    }

    fn builder(runner: Arc<RecordingRunner>) -> ImageBuilder {
        ImageBuilder::new(Git::new(runner.clone()), Make::new(runner), "image")
    }

    #[tokio::test]
    async fn test_branch_checked_out_before_build() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::succeeding();
        let spec = spec_in(&dir, Component::Node, Some("ipv6"));

        let image = builder(runner.clone()).build_image(&spec).await.unwrap();
        assert_eq!(image, Some(ImageName::new("calicovpp/node:latest")));

        let programs: Vec<String> = runner.calls().iter().map(|c| c.program.clone()).collect();
        assert_eq!(programs, vec!["git", "make"]);
        assert_eq!(runner.calls()[1].args.last().map(String::as_str), Some("image"));
    }

    #[tokio::test]
    async fn test_missing_source_is_not_built() {
        let runner = RecordingRunner::succeeding();
        let spec = ComponentSpec {
            component: Component::CniPlugin,
            path: "/nonexistent/cni-plugin".into(),
            branch: None,
            image: Component::CniPlugin.image(),
        };

        let err = builder(runner.clone()).build_image(&spec).await.unwrap_err();
        assert!(matches!(err, HarnessError::MissingSource { .. }));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_build_failure_is_retried_in_full() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new(|spec| {
            if spec.program == "make" {
                Ok(CommandOutput::failed(2, "make: *** [image] Error 1"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });
        let spec = spec_in(&dir, Component::VppManager, None);
        let builder = builder(runner.clone());

        let first = builder.build_image(&spec).await.unwrap_err();
        let second = builder.build_image(&spec).await.unwrap_err();

        assert!(matches!(first, HarnessError::Build { .. }));
        assert!(second.to_string().contains("Error 1"));
        assert_eq!(runner.calls_to("make").len(), 2);
    }

    #[tokio::test]
    async fn test_build_all_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let node_path = dir.path().join(Component::Node.key());
        let runner = RecordingRunner::new(move |spec| {
            if spec.program == "make" && spec.args.contains(&node_path.display().to_string()) {
                Ok(CommandOutput::failed(2, "node build broke"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });
        let cni = spec_in(&dir, Component::CniPlugin, None);
        let node = spec_in(&dir, Component::Node, None);
        let vpp = spec_in(&dir, Component::VppManager, None);

        let err = builder(runner.clone())
            .build_all(&[&cni, &node, &vpp])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("node build broke"));
        assert_eq!(runner.calls_to("make").len(), 2);
    }
}
