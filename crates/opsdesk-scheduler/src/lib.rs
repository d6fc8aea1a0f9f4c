//! `opsdesk-scheduler` — recurring job scheduling with SQLite persistence.
//!
//! # Overview
//!
//! Recurrence definitions live in the SQLite `recurrences` table. At startup
//! the [`engine::RecurrenceScheduler`] replays every occurrence missed while
//! the process was down, then arms one in-process timer per active
//! definition. Each firing materializes a business record, advances the
//! definition along its anchor grid and re-arms the timer.
//!
//! # Components
//!
//! | Module     | Role                                                   |
//! |------------|--------------------------------------------------------|
//! | `schedule` | Pure next-occurrence arithmetic (weekly/monthly/yearly) |
//! | `registry` | At most one live Tokio timer per definition ID         |
//! | `executor` | Guarded single execution: materialize, persist, audit  |
//! | `catchup`  | Drains a definition's backlog at boot                  |
//! | `engine`   | Lifecycle hooks tying the pieces together              |
//! | `store`    | `ScheduleStore` trait and its SQLite implementation    |

pub mod catchup;
pub mod clock;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use catchup::{CatchUpRunner, DrainReport};
pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{InitReport, RecurrenceScheduler};
pub use error::{MaterializeError, Result, SchedulerError};
pub use executor::{AuditSink, FanoutAuditSink, Materializer, OccurrenceExecutor, TracingAuditSink};
pub use registry::{TimerInfo, TimerRegistry, TimerTicket};
pub use store::{ScheduleStore, SqliteScheduleStore};
pub use types::{
    AuditEvent, BusinessRecord, Frequency, NewRecurrence, Occurrence, RecurrenceDefinition,
    RecurrencePatch, RunOutcome, RunSource, SkipReason,
};
