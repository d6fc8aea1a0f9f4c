use thiserror::Error;

/// Errors that can occur during task and activity-log operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The requested task does not exist in the database.
    #[error("task not found: {id}")]
    NotFound { id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A recurrence's owner context cannot be turned into a task.
    ///
    /// Expected shape: `{ "title": ..., "project_id"?, "description"?, "assignee"? }`
    #[error("invalid task context: {0}")]
    InvalidContext(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;
