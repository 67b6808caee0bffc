//! Error taxonomy for the test pipeline.
//!
//! Every variant that stems from an external tool embeds that tool's
//! combined output so a failed run can be diagnosed from the log alone.

use std::fmt;
use std::path::PathBuf;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::domain::{Component, ImageName, Stage};

/// Direction of a manifest operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestOp {
    Apply,
    Delete,
}

impl fmt::Display for ManifestOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => f.write_str("apply"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to check out branch '{branch}' in {}: {}", path.display(), output.trim())]
    BranchCheckout {
        path: PathBuf,
        branch: String,
        output: String,
    },

    #[error("build of target '{target}' failed in {}: {}", path.display(), output.trim())]
    Build {
        path: PathBuf,
        target: String,
        output: String,
    },

    #[error("cluster provisioning failed: {}", output.trim())]
    Provision { output: String },

    #[error("failed to load image {image} into the cluster: {}", output.trim())]
    Push { image: ImageName, output: String },

    #[error("kubectl {op} -f {path} failed: {}", output.trim())]
    Manifest {
        op: ManifestOp,
        path: String,
        output: String,
    },

    #[error("pod {namespace}/{pod} not found")]
    PodNotFound { namespace: String, pod: String },

    #[error("pod {namespace}/{pod} never became ready: {reason}")]
    PodNotReady {
        namespace: String,
        pod: String,
        reason: String,
    },

    #[error("timed out waiting for pod {namespace}/{pod}")]
    Timeout { namespace: String, pod: String },

    #[error("source tree for {component} not found at {}", path.display())]
    MissingSource { component: Component, path: PathBuf },

    #[error("cluster query failed: {detail}")]
    Query { detail: String },
}

impl HarnessError {
    /// Whether this error came out of the readiness poller
    pub fn is_readiness(&self) -> bool {
        matches!(
            self,
            Self::PodNotFound { .. } | Self::PodNotReady { .. } | Self::Timeout { .. }
        )
    }
}

/// The first fatal error from the setup stages
#[derive(Debug, Serialize)]
pub struct SetupFailure {
    pub stage: Stage,
    #[serde(serialize_with = "serialize_display")]
    pub error: HarnessError,
}

impl fmt::Display for SetupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// A teardown problem: logged and recorded, never fatal
#[derive(Debug, Serialize)]
pub struct CleanupWarning {
    pub action: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: HarnessError,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.action, self.error)
    }
}

fn serialize_display<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
