//! Pipeline stages and the aggregate result of a test run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::error::{CleanupWarning, SetupFailure};
use crate::suite::SuiteReport;

/// The six stages of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BuildImages,
    ProvisionCluster,
    PushImages,
    DeployManifest,
    RunTests,
    Cleanup,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::BuildImages,
        Stage::ProvisionCluster,
        Stage::PushImages,
        Stage::DeployManifest,
        Stage::RunTests,
        Stage::Cleanup,
    ];

    /// Stages whose failure aborts the run before tests
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::BuildImages | Self::ProvisionCluster | Self::PushImages | Self::DeployManifest
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BuildImages => "build_images",
            Self::ProvisionCluster => "provision_cluster",
            Self::PushImages => "push_images",
            Self::DeployManifest => "deploy_manifest",
            Self::RunTests => "run_tests",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

/// Outcome of one stage within a run
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Overall verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Passed,
    TestsFailed,
    SetupFailed,
}

/// Everything a finished run reports
#[derive(Debug, Serialize)]
pub struct RunResult {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageRecord>,
    pub setup_failure: Option<SetupFailure>,
    pub suite: Option<SuiteReport>,
    pub cleanup_warnings: Vec<CleanupWarning>,
}

impl Default for RunResult {
    fn default() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl RunResult {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            completed_at: None,
            stages: Vec::new(),
            setup_failure: None,
            suite: None,
            cleanup_warnings: Vec::new(),
        }
    }

    pub fn record(&mut self, record: StageRecord) {
        self.stages.push(record);
    }

    /// Record of `stage`, if it got that far
    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Mark every stage without a record as skipped, put the records in
    /// pipeline order and stamp completion
    pub fn finish(&mut self) {
        for stage in Stage::ALL {
            if self.stage(stage).is_none() {
                self.stages.push(StageRecord {
                    stage,
                    status: StageStatus::Skipped,
                    duration_ms: 0,
                    error: None,
                });
            }
        }
        self.stages
            .sort_by_key(|r| Stage::ALL.iter().position(|s| *s == r.stage));
        self.completed_at = Some(Utc::now());
    }

    /// The verdict comes from setup and the suite only; cleanup never changes it
    pub fn state(&self) -> RunState {
        if self.setup_failure.is_some() {
            return RunState::SetupFailed;
        }
        match &self.suite {
            Some(report) if report.passed() => RunState::Passed,
            _ => RunState::TestsFailed,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.state() {
            RunState::Passed => 0,
            RunState::TestsFailed | RunState::SetupFailed => 1,
        }
    }
}
