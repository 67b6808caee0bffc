//! Stage execution and the cluster lease.
//!
//! [`StageRunner`] times each stage, records its outcome on the
//! [`RunResult`] and mirrors every transition into the run log.
//! [`ClusterLease`] scopes the work done against a provisioned cluster so
//! the release step runs however that work ends, panics included.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use futures::FutureExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::error::{CleanupWarning, HarnessError, SetupFailure};
use super::run_log::RunLog;
use crate::domain::{ClusterHandle, EventType, RunResult, Stage, StageEvent, StageRecord, StageStatus};

/// Records stage outcomes and writes them to the optional run log
pub struct StageRunner {
    run_id: Uuid,
    log: Option<RunLog>,
}

impl StageRunner {
    pub fn new(run_id: Uuid, log: Option<RunLog>) -> Self {
        Self { run_id, log }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn log(&self) -> Option<&RunLog> {
        self.log.as_ref()
    }

    /// Append to the run log. Log IO problems never affect the run.
    async fn emit(&self, event: StageEvent) {
        if let Some(ref log) = self.log {
            if let Err(e) = log.append(&event).await {
                warn!(error = %e, "Failed to append to run log");
            }
        }
    }

    pub async fn run_started(&self) {
        info!(run_id = %self.run_id, "Run started");
        self.emit(StageEvent::new(self.run_id, None, EventType::RunStarted, "Run started".to_string()))
            .await;
    }

    /// Log the verdict and write `report.json`
    pub async fn run_finished(&self, result: &RunResult) {
        let summary = format!("Run finished: {:?}, exit code {}", result.state(), result.exit_code());
        info!(run_id = %self.run_id, state = ?result.state(), "Run finished");
        self.emit(StageEvent::new(self.run_id, None, EventType::RunFinished, summary))
            .await;

        if let Some(ref log) = self.log {
            match log.write_report(result).await {
                Ok(path) => info!(report = %path.display(), "Run report written"),
                Err(e) => warn!(error = %e, "Failed to write run report"),
            }
        }
    }

    pub async fn start(&self, stage: Stage) -> Instant {
        info!(%stage, "Stage started");
        self.emit(StageEvent::new(
            self.run_id,
            Some(stage.to_string()),
            EventType::StageStarted,
            format!("{} started", stage),
        ))
        .await;
        Instant::now()
    }

    pub async fn complete(&self, result: &mut RunResult, stage: Stage, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(%stage, duration_ms, "Stage completed");
        self.emit(
            StageEvent::new(
                self.run_id,
                Some(stage.to_string()),
                EventType::StageCompleted,
                format!("{} completed in {}ms", stage, duration_ms),
            )
            .with_duration(duration_ms),
        )
        .await;

        result.record(StageRecord {
            stage,
            status: StageStatus::Completed,
            duration_ms,
            error: None,
        });
    }

    pub async fn fail(&self, result: &mut RunResult, stage: Stage, started: Instant, message: String) {
        let duration_ms = started.elapsed().as_millis() as u64;
        error!(%stage, duration_ms, error = %message, "Stage failed");
        self.emit(
            StageEvent::new(
                self.run_id,
                Some(stage.to_string()),
                EventType::StageFailed,
                format!("{} failed", stage),
            )
            .with_duration(duration_ms)
            .with_error(message.clone()),
        )
        .await;

        result.record(StageRecord {
            stage,
            status: StageStatus::Failed,
            duration_ms,
            error: Some(message),
        });
    }

    /// Run one fallible stage.
    ///
    /// On failure the stage is recorded as failed and, for a setup stage,
    /// the error becomes the run's [`SetupFailure`]. `None` tells the
    /// caller to stop.
    pub async fn stage<T, F>(&self, result: &mut RunResult, stage: Stage, work: F) -> Option<T>
    where
        F: Future<Output = Result<T, HarnessError>>,
    {
        let started = self.start(stage).await;

        match work.await {
            Ok(value) => {
                self.complete(result, stage, started).await;
                Some(value)
            }
            Err(e) => {
                self.fail(result, stage, started, e.to_string()).await;
                if stage.is_setup() && result.setup_failure.is_none() {
                    result.setup_failure = Some(SetupFailure { stage, error: e });
                }
                None
            }
        }
    }

    /// Record a non-fatal teardown problem
    pub async fn cleanup_warning(&self, result: &mut RunResult, action: &str, error: HarnessError) {
        warn!(action, error = %error, "Cleanup step failed");
        self.emit(
            StageEvent::new(
                self.run_id,
                Some(Stage::Cleanup.to_string()),
                EventType::CleanupWarning,
                format!("{} failed", action),
            )
            .with_error(error.to_string()),
        )
        .await;

        result.cleanup_warnings.push(CleanupWarning {
            action: action.to_string(),
            error,
        });
    }
}

/// A provisioned cluster that must be released once the run is done with it.
///
/// Work against the cluster goes through [`ClusterLease::guard`], which
/// holds back any panic until the caller has released the lease.
#[must_use = "a provisioned cluster must be released"]
#[derive(Debug)]
pub struct ClusterLease {
    cluster: ClusterHandle,
}

impl ClusterLease {
    pub fn acquire(cluster: ClusterHandle) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &ClusterHandle {
        &self.cluster
    }

    /// Drive `body` to completion, catching a panic instead of unwinding
    pub async fn guard<T, F>(&self, body: F) -> Guarded<T>
    where
        F: Future<Output = T>,
    {
        Guarded(AssertUnwindSafe(body).catch_unwind().await)
    }

    /// Give up the lease for release
    pub fn release(self) -> ClusterHandle {
        self.cluster
    }
}

/// Outcome of guarded work: a value, or a panic held until [`Guarded::resume`]
pub struct Guarded<T>(std::thread::Result<T>);

impl<T> Guarded<T> {
    pub fn panicked(&self) -> bool {
        self.0.is_err()
    }

    /// The value, or re-raise the held panic
    pub fn resume(self) -> T {
        match self.0 {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}
