//! `opsdesk-core` — configuration and the shared error type used by every
//! opsdesk crate.

pub mod config;
pub mod error;

pub use config::{OpsdeskConfig, SchedulePolicy, SchedulerConfig};
pub use error::{OpsdeskError, Result};
