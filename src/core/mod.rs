//! Core orchestration logic.
//!
//! This module contains:
//! - Error: failure taxonomy, setup failures and cleanup warnings
//! - Pipeline: stage runner and the cluster lease
//! - Poller: readiness polling for test pods
//! - RunLog: append-only per-run event log
//! - Orchestrator: main execution engine

pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod poller;
pub mod run_log;

// Re-export commonly used types
pub use error::{CleanupWarning, HarnessError, ManifestOp, SetupFailure};
pub use orchestrator::{Orchestrator, RunOptions};
pub use pipeline::{ClusterLease, Guarded, StageRunner};
pub use poller::{PodInspector, PodObservation, PollPolicy, ReadinessPoller, ReadyPod};
pub use run_log::RunLog;
