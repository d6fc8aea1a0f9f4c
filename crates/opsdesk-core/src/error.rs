use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsdeskError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OpsdeskError {
    /// Short error code string returned to HTTP clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            OpsdeskError::Config(_) => "CONFIG_ERROR",
            OpsdeskError::BadRequest(_) => "BAD_REQUEST",
            OpsdeskError::NotFound { .. } => "NOT_FOUND",
            OpsdeskError::Database(_) => "DATABASE_ERROR",
            OpsdeskError::Scheduler(_) => "SCHEDULER_ERROR",
            OpsdeskError::Serialization(_) => "SERIALIZATION_ERROR",
            OpsdeskError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, OpsdeskError>;
