//! calicovpp-e2e - end-to-end test driver for Calico/VPP
//!
//! Builds the networking stack's images from local checkouts, brings up a
//! vagrant-based Kubernetes cluster, loads the images, deploys the stack
//! and runs functional checks against it.
//!
//! # Architecture
//!
//! A run is a fixed sequence of stages:
//! - Setup (build, provision, push, deploy): the first failure aborts
//! - Tests: each case is isolated from its siblings
//! - Cleanup: runs whenever the cluster came up, never changes the verdict
//!
//! # Modules
//!
//! - `adapters`: External tools (git, make, the vagrant project, kubectl)
//! - `core`: Orchestration logic (stages, readiness polling, run log)
//! - `domain`: Data structures (components, cluster handles, run results)
//! - `suite`: Functional test cases
//! - `config`: Environment and file configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Full run, tearing the cluster down afterwards
//! calicovpp-e2e run --destroy-cluster
//!
//! # Re-run the tests against a cluster that is already up
//! calicovpp-e2e test --case cni-pod-connectivity
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod fakes;
pub mod suite;

// Re-export main types at crate root for convenience
pub use config::HarnessConfig;
pub use core::{HarnessError, Orchestrator, RunOptions};
pub use domain::{RunResult, RunState, Stage};
pub use suite::{Suite, SuiteReport, TestCase};
