//! Stage events recorded in a run's append-only log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single entry in `events.jsonl`.
///
/// Replaying a run's events in order gives the stage-by-stage history
/// of that run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Stage name (None for run-level events)
    pub stage: Option<String>,

    pub event_type: EventType,

    /// Human-readable summary
    pub summary: String,

    /// Time taken in milliseconds (for finished stages)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,
}

impl StageEvent {
    pub fn new(run_id: Uuid, stage: Option<String>, event_type: EventType, summary: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            stage,
            event_type,
            summary,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    StageStarted,
    StageCompleted,
    StageFailed,
    CleanupWarning,
    RunFinished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let run_id = Uuid::new_v4();
        let event = StageEvent::new(
            run_id,
            Some("push_images".to_string()),
            EventType::StageFailed,
            "push_images failed".to_string(),
        )
        .with_duration(42)
        .with_error("load-image exited 2".to_string());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "stage_failed");
        assert_eq!(json["stage"], "push_images");
        assert_eq!(json["duration_ms"], 42);

        let back: StageEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.run_id, run_id);
        assert_eq!(back.error.as_deref(), Some("load-image exited 2"));
    }
}
