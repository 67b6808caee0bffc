//! Handles to the provisioned cluster and what gets deployed onto it.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::time::{Duration, Instant};

/// Addresses a cluster brought up by the provisioning project.
///
/// The project directory is enough to drive its own tooling (image loads,
/// teardown). `kubeconfig` is passed to kubectl when set; otherwise kubectl
/// falls back to its own discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterHandle {
    pub project: PathBuf,
    pub kubeconfig: Option<PathBuf>,
}

impl ClusterHandle {
    pub fn new(project: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            kubeconfig: None,
        }
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }
}

/// A manifest applied to (or deleted from) a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentTarget {
    pub cluster: ClusterHandle,
    pub manifest: PathBuf,
}

impl DeploymentTarget {
    /// Resolve `manifest` against `base` unless it is already absolute
    pub fn new(cluster: ClusterHandle, base: &Path, manifest: &Path) -> Self {
        let manifest = if manifest.is_absolute() {
            manifest.to_path_buf()
        } else {
            base.join(manifest)
        };
        Self { cluster, manifest }
    }
}

/// Which pod to wait for, and until when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCondition {
    pub namespace: String,
    pub pod: String,
    pub deadline: Instant,
}

impl PollCondition {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>, deadline: Instant) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            deadline,
        }
    }

    /// Condition expiring `timeout` from now
    pub fn within(namespace: impl Into<String>, pod: impl Into<String>, timeout: Duration) -> Self {
        Self::new(namespace, pod, Instant::now() + timeout)
    }

    /// Time left before the deadline (zero once it has passed)
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
