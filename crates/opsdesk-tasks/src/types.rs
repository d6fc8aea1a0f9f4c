use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};

/// Task template carried in a recurrence's `owner_context`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub project_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
}

impl TaskSpec {
    /// Extract a task template from an owner context blob.
    ///
    /// Unknown keys are ignored; a missing or blank `title` is an error.
    pub fn from_context(context: &serde_json::Value) -> Result<Self> {
        let spec: TaskSpec = serde_json::from_value(context.clone())
            .map_err(|e| TaskError::InvalidContext(e.to_string()))?;
        if spec.title.trim().is_empty() {
            return Err(TaskError::InvalidContext("title must not be empty".to_string()));
        }
        Ok(spec)
    }
}

/// A task created for one occurrence of a recurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// UUIDv7 primary key.
    pub id: String,
    pub recurrence_id: String,
    /// The occurrence slot this task was created for.
    pub occurrence_at: DateTime<Utc>,
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One row of the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub definition_id: String,
    pub definition_name: String,
    pub scheduled_for: DateTime<Utc>,
    pub executed_at: DateTime<Utc>,
    pub next_occurrence: DateTime<Utc>,
    pub record_kind: String,
    pub record_id: String,
    /// `"catch_up"` or `"timer"`.
    pub source: String,
}
