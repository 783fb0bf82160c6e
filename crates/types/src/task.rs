//! Tasks and observations: side-effect records produced by hooks and
//! intelligence channels, persisted at the end of a successful pipeline run.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use switchboard_common::{new_id, now_ms};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

/// A unit of follow-up work requested from within the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_channel_id: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Task {
    pub fn new(room_id: impl Into<String>, payload: Value) -> Self {
        let now = now_ms();
        Self {
            id: new_id("task"),
            room_id: room_id.into(),
            source_channel_id: None,
            payload,
            status: TaskStatus::Pending,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    pub fn with_source(mut self, channel_id: impl Into<String>) -> Self {
        self.source_channel_id = Some(channel_id.into());
        self
    }
}

/// An append-only note recorded from within the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_channel_id: Option<String>,
    pub payload: Value,
    pub created_at_ms: u64,
}

impl Observation {
    pub fn new(room_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: new_id("obs"),
            room_id: room_id.into(),
            source_channel_id: None,
            payload,
            created_at_ms: now_ms(),
        }
    }

    pub fn with_source(mut self, channel_id: impl Into<String>) -> Self {
        self.source_channel_id = Some(channel_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn new_tasks_are_pending() {
        let task = Task::new("room_1", json!({"kind": "follow_up"}));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.id.starts_with("task_"));
    }

    #[test]
    fn observation_roundtrips() {
        let obs = Observation::new("room_1", json!({"note": "x"})).with_source("llm-1");
        let json = serde_json::to_string(&obs).unwrap();
        let back: Observation = serde_json::from_str(&json).unwrap();
        assert_eq!(obs, back);
    }
}
