use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur within the recurrence scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A caller passed something outside the accepted domain, e.g. an
    /// unknown frequency class or a malformed timestamp.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No live (non-deleted) definition with the given ID exists.
    #[error("Recurrence definition not found: {id}")]
    DefinitionNotFound { id: String },

    /// The materializer rejected or failed to produce the occurrence's record.
    /// Recurrence state is left untouched so the occurrence is retried.
    #[error("Materialization failed for {id}: {source}")]
    Materialize {
        id: String,
        #[source]
        source: MaterializeError,
    },

    /// An execution did not move `next_occurrence` forward. Fatal for the
    /// definition: continuing would loop forever.
    #[error("No forward progress for {id}: next occurrence {next} is not after {previous}")]
    NoProgress {
        id: String,
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    /// The operation would exceed a configured limit (e.g. catch-up run cap).
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// The audit sink could not record an event.
    #[error("Audit sink error: {0}")]
    Audit(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Internal-consistency failures after which a definition must not be
    /// scheduled again until an operator intervenes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedulerError::NoProgress { .. })
    }
}

/// Failure reported by a [`crate::executor::Materializer`].
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct MaterializeError {
    pub reason: String,
}

impl MaterializeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
