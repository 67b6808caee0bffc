//! Domain types for the test driver.
//!
//! This module contains the records handed between stages:
//! - Component: source trees and the images they produce
//! - Cluster: handles to the provisioned cluster and its deployments
//! - Run: stage list and the aggregate run result
//! - Events: entries of the per-run event log

pub mod cluster;
pub mod component;
pub mod events;
pub mod run;

pub use cluster::{ClusterHandle, DeploymentTarget, PollCondition};
pub use component::{Component, ComponentSpec, ImageName};
pub use events::{EventType, StageEvent};
pub use run::{RunResult, RunState, Stage, StageRecord, StageStatus};
