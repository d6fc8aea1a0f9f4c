//! `opsdesk-tasks` — the tasks recurrences materialize into, plus the
//! activity log that records every execution.

pub mod activity;
pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use activity::ActivityLog;
pub use error::{Result, TaskError};
pub use manager::TaskManager;
pub use types::{ActivityEntry, Task, TaskSpec};
