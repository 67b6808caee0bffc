//! CNI connectivity check: a fresh pod gets an interface, an IP address
//! and a default route.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{TestCase, TestContext};
use crate::core::error::HarnessError;
use crate::core::poller::ReadyPod;
use crate::domain::PollCondition;

pub const POD_NAMESPACE: &str = "default";
pub const POD_NAME: &str = "cni-test";

/// Single-container pod with no network policy attached
pub const SINGLE_POD_SPEC: &str = r#"apiVersion: v1
kind: Pod
metadata:
  name: cni-test
  namespace: default
spec:
  containers:
  - name: main
    image: calicovpp/netshoot:latest
    command: ["bash"]
    args: ["-c", "sleep 36000"]
"#;

/// Applies a pod (twice, to check that apply is idempotent), waits for it
/// to become network-ready, then deletes it.
pub struct PodConnectivity {
    manifest: String,
    namespace: String,
    pod: String,
}

impl Default for PodConnectivity {
    fn default() -> Self {
        Self::new(SINGLE_POD_SPEC, POD_NAMESPACE, POD_NAME)
    }
}

impl PodConnectivity {
    pub fn new(manifest: impl Into<String>, namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            manifest: manifest.into(),
            namespace: namespace.into(),
            pod: pod.into(),
        }
    }

    /// Second apply plus the readiness wait; the pod exists by now
    async fn reapply_and_wait(&self, ctx: &TestContext) -> Result<ReadyPod, HarnessError> {
        ctx.kubectl.apply_yaml(&self.manifest).await?;

        let condition = PollCondition::within(&self.namespace, &self.pod, ctx.poller.policy().timeout());
        ctx.poller.wait_for_pod(&ctx.cancel, &condition).await
    }
}

#[async_trait]
impl TestCase for PodConnectivity {
    fn name(&self) -> &str {
        "cni-pod-connectivity"
    }

    async fn run(&self, ctx: &TestContext) -> Result<(), HarnessError> {
        // Nothing to delete until the first apply succeeds
        ctx.kubectl.apply_yaml(&self.manifest).await?;

        let outcome = self.reapply_and_wait(ctx).await;
        let deleted = ctx.kubectl.delete_yaml(&self.manifest).await;
        if let Err(ref e) = deleted {
            warn!(error = %e, "Failed to delete test pod");
        }

        let ready = outcome?;
        info!(ip = %ready.ip, route = %ready.route, "Pod is network-ready");
        deleted
    }
}
