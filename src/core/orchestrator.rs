//! Main orchestrator for a test run.
//!
//! Drives the six stages in order: build images, provision the cluster,
//! push images, deploy the manifest, run the suite, clean up. A setup
//! failure stops the run before tests; once the cluster is up, cleanup
//! runs no matter how the later stages end.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::git::Git;
use crate::adapters::make::{ImageBuilder, Make};
use crate::adapters::vagrant::Vagrant;
use crate::adapters::{CommandRunner, Kubectl};
use crate::config::HarnessConfig;
use crate::domain::{ClusterHandle, DeploymentTarget, ImageName, PollCondition, RunResult, Stage};
use crate::suite::{Suite, SuiteReport, TestContext};

use super::error::HarnessError;
use super::pipeline::{ClusterLease, StageRunner};
use super::poller::{PodInspector, ReadinessPoller, ReadyPod};
use super::run_log::RunLog;

/// Per-invocation switches
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Run the provisioner's destroy target during cleanup
    pub destroy_cluster: bool,
}

/// Main test-run orchestrator
pub struct Orchestrator {
    config: HarnessConfig,
    runner: Arc<dyn CommandRunner>,
    /// Overrides the kubectl-backed inspector used by the poller
    inspector: Option<Arc<dyn PodInspector>>,
    suite: Suite,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(config: HarnessConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            inspector: None,
            suite: Suite::standard(),
            options: RunOptions::default(),
        }
    }

    pub fn with_suite(mut self, suite: Suite) -> Self {
        self.suite = suite;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn PodInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn suite(&self) -> &Suite {
        &self.suite
    }

    fn image_builder(&self) -> ImageBuilder {
        let tools = &self.config.tools;
        let git = Git::with_binary_path(self.runner.clone(), &tools.git);
        let make = Make::with_binary_path(self.runner.clone(), &tools.make).with_timeout(self.config.command_timeout);
        ImageBuilder::new(git, make, &self.config.build_target)
    }

    fn vagrant(&self) -> Vagrant {
        Vagrant::new(self.runner.clone(), &self.config.tools, self.config.cluster.clone())
            .with_timeout(self.config.command_timeout)
    }

    fn kubectl(&self, cluster: &ClusterHandle) -> Kubectl {
        Kubectl::with_binary_path(self.runner.clone(), &self.config.tools.kubectl)
            .with_kubeconfig(cluster.kubeconfig.clone())
    }

    fn poller(&self, kubectl: &Kubectl) -> ReadinessPoller {
        let inspector: Arc<dyn PodInspector> = match self.inspector {
            Some(ref inspector) => inspector.clone(),
            None => Arc::new(kubectl.clone()),
        };
        ReadinessPoller::new(inspector, self.config.readiness.clone())
    }

    /// The deployment manifest resolved against the node source tree
    pub fn deployment_target(&self, cluster: &ClusterHandle) -> DeploymentTarget {
        DeploymentTarget::new(cluster.clone(), &self.config.node.path, &self.config.manifest)
    }

    /// Handle to a cluster provisioned by an earlier invocation
    pub fn existing_cluster(&self) -> ClusterHandle {
        ClusterHandle::new(self.config.vagrant.path.clone()).with_kubeconfig(self.config.cluster.kubeconfig.clone())
    }

    /// Images the build stage produces, in push order
    pub fn expected_images(&self) -> Vec<ImageName> {
        self.config
            .image_components()
            .iter()
            .filter_map(|spec| spec.image.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Individual stages
    // -----------------------------------------------------------------------

    pub async fn build_images(&self) -> Result<Vec<ImageName>, HarnessError> {
        self.image_builder().build_all(&self.config.image_components()).await
    }

    pub async fn provision_cluster(&self) -> Result<ClusterHandle, HarnessError> {
        self.vagrant().provision_cluster(&self.config.vagrant).await
    }

    pub async fn push_images(&self, cluster: &ClusterHandle, images: &[ImageName]) -> Result<(), HarnessError> {
        self.vagrant().push_images(cluster, images).await
    }

    pub async fn deploy(&self, cluster: &ClusterHandle) -> Result<(), HarnessError> {
        self.kubectl(cluster).apply_manifest(&self.deployment_target(cluster)).await
    }

    pub async fn teardown(&self, cluster: &ClusterHandle) -> Result<(), HarnessError> {
        self.kubectl(cluster).delete_manifest(&self.deployment_target(cluster)).await
    }

    pub async fn destroy_cluster(&self, cluster: &ClusterHandle) -> Result<(), HarnessError> {
        self.vagrant().destroy_cluster(cluster).await
    }

    /// Run the suite against a deployed cluster
    pub async fn run_tests(&self, cluster: &ClusterHandle, cancel: &CancellationToken) -> SuiteReport {
        let kubectl = self.kubectl(cluster);
        let ctx = TestContext {
            poller: self.poller(&kubectl),
            kubectl,
            cancel: cancel.clone(),
        };
        self.suite.run(Arc::new(ctx)).await
    }

    /// One readiness wait against a deployed cluster
    pub async fn wait_for_pod(
        &self,
        cluster: &ClusterHandle,
        cancel: &CancellationToken,
        condition: &PollCondition,
    ) -> Result<ReadyPod, HarnessError> {
        self.poller(&self.kubectl(cluster)).wait_for_pod(cancel, condition).await
    }

    // -----------------------------------------------------------------------
    // Full run
    // -----------------------------------------------------------------------

    /// Execute every stage and report the result.
    ///
    /// Only readiness waits observe `cancel`; a stage already running its
    /// external command is left to finish.
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, cancel: &CancellationToken) -> RunResult {
        let run_id = Uuid::new_v4();
        let mut result = RunResult::new(run_id);
        let stages = StageRunner::new(run_id, self.open_log(run_id).await);

        stages.run_started().await;
        self.run_stages(&stages, cancel, &mut result).await;
        result.finish();
        stages.run_finished(&result).await;

        result
    }

    async fn open_log(&self, run_id: Uuid) -> Option<RunLog> {
        let dir = self.config.results_dir.as_ref()?;
        match RunLog::open(dir, run_id).await {
            Ok(log) => {
                info!(events = %log.events_path().display(), "Recording run log");
                Some(log)
            }
            Err(e) => {
                warn!(error = %e, "Run log unavailable, continuing without it");
                None
            }
        }
    }

    async fn run_stages(&self, stages: &StageRunner, cancel: &CancellationToken, result: &mut RunResult) {
        let Some(images) = stages.stage(result, Stage::BuildImages, self.build_images()).await else {
            return;
        };
        let Some(cluster) = stages.stage(result, Stage::ProvisionCluster, self.provision_cluster()).await else {
            return;
        };

        let lease = ClusterLease::acquire(cluster);
        let guarded = lease
            .guard(self.exercise(stages, cancel, lease.cluster(), &images, result))
            .await;
        if guarded.panicked() {
            warn!("Run panicked after provisioning, cleaning up before unwinding");
        }
        self.cleanup(stages, lease, result).await;
        guarded.resume();
    }

    /// Everything that happens on a provisioned cluster before cleanup
    async fn exercise(
        &self,
        stages: &StageRunner,
        cancel: &CancellationToken,
        cluster: &ClusterHandle,
        images: &[ImageName],
        result: &mut RunResult,
    ) {
        if stages
            .stage(result, Stage::PushImages, self.push_images(cluster, images))
            .await
            .is_none()
        {
            return;
        }
        if stages
            .stage(result, Stage::DeployManifest, self.deploy(cluster))
            .await
            .is_none()
        {
            return;
        }

        let started = stages.start(Stage::RunTests).await;
        let report = self.run_tests(cluster, cancel).await;
        if report.passed() {
            stages.complete(result, Stage::RunTests, started).await;
        } else {
            let message = format!(
                "{} failed, {} errored of {} cases",
                report.failed_count(),
                report.errored_count(),
                report.cases.len()
            );
            stages.fail(result, Stage::RunTests, started, message).await;
        }
        result.suite = Some(report);
    }

    /// Delete the deployment and optionally destroy the cluster. Problems
    /// are recorded as warnings and never change the verdict.
    async fn cleanup(&self, stages: &StageRunner, lease: ClusterLease, result: &mut RunResult) {
        let cluster = lease.release();
        let started = stages.start(Stage::Cleanup).await;
        let before = result.cleanup_warnings.len();

        if let Err(e) = self.teardown(&cluster).await {
            stages.cleanup_warning(result, "delete deployment manifest", e).await;
        }

        if self.options.destroy_cluster {
            if let Err(e) = self.destroy_cluster(&cluster).await {
                stages.cleanup_warning(result, "destroy cluster", e).await;
            }
        }

        let warnings = &result.cleanup_warnings[before..];
        if warnings.is_empty() {
            stages.complete(result, Stage::Cleanup, started).await;
        } else {
            let message = warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>().join("; ");
            stages.fail(result, Stage::Cleanup, started, message).await;
        }
    }
}
