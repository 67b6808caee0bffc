//! Cluster API access through `kubectl`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::{run_checked, CommandRunner, CommandSpec};
use crate::core::error::{HarnessError, ManifestOp};
use crate::core::poller::{PodInspector, PodObservation};
use crate::domain::DeploymentTarget;

/// Label used in errors for manifests piped on stdin
const STDIN_MANIFEST: &str = "-";

#[derive(Clone)]
pub struct Kubectl {
    binary: String,
    kubeconfig: Option<PathBuf>,
    runner: Arc<dyn CommandRunner>,
}

impl Kubectl {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_binary_path(runner, "kubectl")
    }

    pub fn with_binary_path(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            kubeconfig: None,
            runner,
        }
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    fn command(&self) -> CommandSpec {
        let spec = CommandSpec::new(&self.binary);
        match self.kubeconfig {
            Some(ref path) => spec.arg("--kubeconfig").arg(path.display().to_string()),
            None => spec,
        }
    }

    async fn manifest_op(&self, op: ManifestOp, spec: CommandSpec, label: String) -> Result<(), HarnessError> {
        let output = run_checked(self.runner.as_ref(), &spec)
            .await
            .map_err(|output| HarnessError::Manifest {
                op,
                path: label,
                output,
            })?;
        debug!(output = %output.combined.trim(), "kubectl {} done", op);
        Ok(())
    }

    /// `kubectl apply -f <manifest>` against the target's cluster
    #[instrument(skip(self, target), fields(manifest = %target.manifest.display()))]
    pub async fn apply_manifest(&self, target: &DeploymentTarget) -> Result<(), HarnessError> {
        self.for_target(target).file_op(ManifestOp::Apply, target).await
    }

    /// `kubectl delete -f <manifest>`; callable whether or not apply ever succeeded
    #[instrument(skip(self, target), fields(manifest = %target.manifest.display()))]
    pub async fn delete_manifest(&self, target: &DeploymentTarget) -> Result<(), HarnessError> {
        self.for_target(target).file_op(ManifestOp::Delete, target).await
    }

    fn for_target(&self, target: &DeploymentTarget) -> Self {
        match target.cluster.kubeconfig {
            Some(ref path) => self.clone().with_kubeconfig(Some(path.clone())),
            None => self.clone(),
        }
    }

    async fn file_op(&self, op: ManifestOp, target: &DeploymentTarget) -> Result<(), HarnessError> {
        let path = target.manifest.display().to_string();
        info!("kubectl {} -f {}", op, path);
        let spec = self.command().args([op.to_string(), "-f".to_string(), path.clone()]);
        self.manifest_op(op, spec, path).await
    }

    /// Apply an inline manifest piped through stdin
    pub async fn apply_yaml(&self, yaml: &str) -> Result<(), HarnessError> {
        let spec = self.command().args(["apply", "-f", STDIN_MANIFEST]).stdin(yaml);
        self.manifest_op(ManifestOp::Apply, spec, STDIN_MANIFEST.to_string())
            .await
    }

    /// Delete an inline manifest piped through stdin
    pub async fn delete_yaml(&self, yaml: &str) -> Result<(), HarnessError> {
        let spec = self.command().args(["delete", "-f", STDIN_MANIFEST]).stdin(yaml);
        self.manifest_op(ManifestOp::Delete, spec, STDIN_MANIFEST.to_string())
            .await
    }

    /// Fetch a pod's status; `Ok(None)` when the API says it does not exist
    pub async fn get_pod(&self, namespace: &str, pod: &str) -> Result<Option<PodStatus>, HarnessError> {
        let spec = self
            .command()
            .args(["get", "pod", pod, "-n", namespace, "-o", "json"]);

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| HarnessError::Query { detail: e.to_string() })?;

        if !output.success() {
            if output.combined.contains("(NotFound)") {
                return Ok(None);
            }
            return Err(HarnessError::Query {
                detail: format!("`{}` failed: {}", spec, output.combined.trim()),
            });
        }

        let parsed: PodJson = serde_json::from_str(&output.stdout).map_err(|e| HarnessError::Query {
            detail: format!("unparseable pod JSON: {}", e),
        })?;
        Ok(Some(parsed.status))
    }

    /// Run a command in the pod's first container, returning its stdout
    pub async fn exec(&self, namespace: &str, pod: &str, command: &[&str]) -> Result<String, String> {
        let spec = self
            .command()
            .args(["exec", "-n", namespace, pod, "--"])
            .args(command.iter().copied());
        run_checked(self.runner.as_ref(), &spec)
            .await
            .map(|output| output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct PodJson {
    #[serde(default)]
    status: PodStatus,
}

/// The subset of a pod's status the readiness check needs
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default, rename = "podIP")]
    pub pod_ip: Option<String>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub state: ContainerState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerState {
    #[serde(default)]
    pub running: Option<serde_json::Value>,
}

impl PodStatus {
    /// The pod IP if phase, containers and address are all in place,
    /// otherwise the first unmet condition
    pub fn assigned_ip(&self) -> Result<&str, String> {
        match self.phase.as_deref() {
            Some("Running") => {}
            Some(phase) => return Err(format!("phase is {}", phase)),
            None => return Err("phase not reported".to_string()),
        }

        if !self.container_statuses.iter().any(|c| c.state.running.is_some()) {
            return Err("no running container".to_string());
        }

        match self.pod_ip.as_deref() {
            Some(ip) if !ip.is_empty() => Ok(ip),
            _ => Err("no pod IP assigned".to_string()),
        }
    }
}

/// Whether `ip -o addr show` output lists `ip` on some interface
fn has_address(addr_output: &str, ip: &str) -> bool {
    addr_output.lines().any(|line| {
        line.split_whitespace()
            .any(|field| field.split('/').next() == Some(ip))
    })
}

fn default_route(route_output: &str) -> Option<&str> {
    route_output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("default"))
}

#[async_trait]
impl PodInspector for Kubectl {
    async fn observe(&self, namespace: &str, pod: &str) -> Result<PodObservation, HarnessError> {
        let status = match self.get_pod(namespace, pod).await? {
            Some(status) => status,
            None => return Ok(PodObservation::NotFound),
        };

        let ip = match status.assigned_ip() {
            Ok(ip) => ip.to_string(),
            Err(reason) => return Ok(PodObservation::NotReady { reason }),
        };

        let addrs = match self.exec(namespace, pod, &["ip", "-o", "addr", "show"]).await {
            Ok(out) => out,
            Err(e) => return Ok(PodObservation::NotReady { reason: format!("address check failed: {}", e) }),
        };
        if !has_address(&addrs, &ip) {
            return Ok(PodObservation::NotReady {
                reason: format!("no interface carries pod IP {}", ip),
            });
        }

        let routes = match self.exec(namespace, pod, &["ip", "route", "show", "default"]).await {
            Ok(out) => out,
            Err(e) => return Ok(PodObservation::NotReady { reason: format!("route check failed: {}", e) }),
        };
        match default_route(&routes) {
            Some(route) => Ok(PodObservation::Ready {
                ip,
                route: route.to_string(),
            }),
            None => Ok(PodObservation::NotReady {
                reason: "no default route".to_string(),
            }),
        }
    }
}
