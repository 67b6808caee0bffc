//! Append-only run log with file-based persistence.
//!
//! Each run gets `<results_dir>/<run-id>/` holding `events.jsonl` (one
//! [`StageEvent`] per line, appended as stages start and finish) and
//! `report.json` (the final [`RunResult`]).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{RunResult, StageEvent};

/// File-based run log using JSONL format
pub struct RunLog {
    run_dir: PathBuf,
    events_path: PathBuf,
}

impl RunLog {
    /// Create or open the log for a run under `base_dir`
    pub async fn open(base_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = base_dir.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let events_path = run_dir.join("events.jsonl");
        Ok(Self { run_dir, events_path })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub fn report_path(&self) -> PathBuf {
        self.run_dir.join("report.json")
    }

    /// Append an event to the log
    pub async fn append(&self, event: &StageEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<StageEvent>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: StageEvent =
                serde_json::from_str(&line).with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Write the final result as pretty JSON next to the events
    pub async fn write_report(&self, result: &RunResult) -> Result<PathBuf> {
        let path = self.report_path();
        let json = serde_json::to_string_pretty(result).context("Failed to serialize run report")?;

        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write report: {}", path.display()))?;

        Ok(path)
    }

    /// Events of an existing run; errors if the run directory is missing
    pub async fn replay_run(base_dir: &Path, run_id: Uuid) -> Result<Vec<StageEvent>> {
        let run_dir = base_dir.join(run_id.to_string());
        if !run_dir.is_dir() {
            anyhow::bail!("No run {} under {}", run_id, base_dir.display());
        }

        let log = Self {
            events_path: run_dir.join("events.jsonl"),
            run_dir,
        };
        log.replay().await
    }

    /// All run IDs under `base_dir`
    pub async fn list_runs(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_replay_in_order() {
        let temp = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let log = RunLog::open(temp.path(), run_id).await.unwrap();

        for stage in ["build_images", "provision_cluster", "push_images"] {
            let event = StageEvent::new(
                run_id,
                Some(stage.to_string()),
                EventType::StageStarted,
                format!("{} started", stage),
            );
            log.append(&event).await.unwrap();
        }

        let events = log.replay().await.unwrap();
        let stages: Vec<_> = events.iter().filter_map(|e| e.stage.as_deref()).collect();
        assert_eq!(stages, vec!["build_images", "provision_cluster", "push_images"]);
    }

    #[tokio::test]
    async fn test_replay_of_fresh_log_is_empty() {
        let temp = TempDir::new().unwrap();
        let log = RunLog::open(temp.path(), Uuid::new_v4()).await.unwrap();
        assert!(log.replay().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_run_and_list() {
        let temp = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let log = RunLog::open(temp.path(), run_id).await.unwrap();
        log.append(&StageEvent::new(run_id, None, EventType::RunStarted, "Run started".to_string()))
            .await
            .unwrap();

        let events = RunLog::replay_run(temp.path(), run_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::RunStarted);

        assert_eq!(RunLog::list_runs(temp.path()).await.unwrap(), vec![run_id]);
        assert!(RunLog::replay_run(temp.path(), Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_write_report() {
        let temp = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let log = RunLog::open(temp.path(), run_id).await.unwrap();

        let mut result = RunResult::new(run_id);
        result.finish();
        let path = log.write_report(&result).await.unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["id"], run_id.to_string());
        assert_eq!(json["stages"].as_array().unwrap().len(), 6);
    }
}
