use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// How often a recurrence definition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Same weekday and time-of-day as the anchor, every 7 days.
    Weekly,
    /// Same day-of-month and time-of-day as the anchor, clamped to the last
    /// day of shorter months.
    Monthly,
    /// Same month, day and time-of-day as the anchor (Feb 29 clamps to Feb 28).
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            other => Err(SchedulerError::InvalidArgument(format!(
                "unknown frequency class: {other}"
            ))),
        }
    }
}

/// A persisted recurrence definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceDefinition {
    /// UUIDv7 string, also the timer registry key.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Fixes time-of-day, weekday and day-of-month for every occurrence.
    pub anchor_time: DateTime<Utc>,
    pub frequency: Frequency,
    pub is_active: bool,
    /// Most recently completed occurrence, if any ran yet.
    pub last_occurrence: Option<DateTime<Utc>>,
    /// Next due occurrence. Equal to `anchor_time` until the first run.
    pub next_occurrence: DateTime<Utc>,
    pub is_deleted: bool,
    /// Opaque reference handed to the materializer.
    pub owner_context: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurrenceDefinition {
    /// Active and not soft-deleted: the only state in which a definition is
    /// caught up or holds a live timer.
    pub fn is_schedulable(&self) -> bool {
        self.is_active && !self.is_deleted
    }

    /// Due at `now` (and schedulable).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_schedulable() && self.next_occurrence <= now
    }
}

/// Fields accepted when creating a definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecurrence {
    pub name: String,
    pub anchor_time: DateTime<Utc>,
    pub frequency: Frequency,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub owner_context: serde_json::Value,
}

fn default_active() -> bool {
    true
}

/// Partial edit of a definition. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecurrencePatch {
    pub name: Option<String>,
    pub anchor_time: Option<DateTime<Utc>>,
    pub frequency: Option<Frequency>,
    pub is_active: Option<bool>,
    pub owner_context: Option<serde_json::Value>,
}

impl RecurrencePatch {
    /// True when the edit changes the recurrence grid itself.
    pub fn changes_grid(&self) -> bool {
        self.anchor_time.is_some() || self.frequency.is_some()
    }
}

/// One due firing of a definition, as handed to the materializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occurrence {
    pub definition_id: String,
    pub owner_context: serde_json::Value,
    /// The slot being materialized (the definition's `next_occurrence`).
    pub scheduled_for: DateTime<Utc>,
}

/// Reference to the business record a materializer produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRecord {
    /// Record type, e.g. `"task"`.
    pub kind: String,
    pub id: String,
}

/// What triggered an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    /// Boot-time backlog drain.
    CatchUp,
    /// A live timer fired.
    Timer,
}

impl std::fmt::Display for RunSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunSource::CatchUp => f.write_str("catch_up"),
            RunSource::Timer => f.write_str("timer"),
        }
    }
}

/// Emitted after every successful execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub definition_id: String,
    pub definition_name: String,
    pub scheduled_for: DateTime<Utc>,
    /// Wall-clock instant the execution happened.
    pub executed_at: DateTime<Utc>,
    pub next_occurrence: DateTime<Utc>,
    pub record: BusinessRecord,
    pub source: RunSource,
}

/// Why the executor declined to run a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Inactive,
    Deleted,
    NotDue,
    /// The definition's grid was edited while the occurrence ran; the run's
    /// progress was discarded in favour of the edit.
    Superseded,
}

/// Result of one executor invocation.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Executed {
        definition: RecurrenceDefinition,
        record: BusinessRecord,
    },
    Skipped {
        definition: RecurrenceDefinition,
        reason: SkipReason,
    },
}

impl RunOutcome {
    pub fn definition(&self) -> &RecurrenceDefinition {
        match self {
            RunOutcome::Executed { definition, .. } | RunOutcome::Skipped { definition, .. } => {
                definition
            }
        }
    }

    pub fn into_definition(self) -> RecurrenceDefinition {
        match self {
            RunOutcome::Executed { definition, .. } | RunOutcome::Skipped { definition, .. } => {
                definition
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_parses_known_classes() {
        assert_eq!("weekly".parse::<Frequency>().unwrap(), Frequency::Weekly);
        assert_eq!("yearly".parse::<Frequency>().unwrap(), Frequency::Yearly);
    }

    #[test]
    fn unknown_frequency_is_invalid_argument() {
        let err = "daily".parse::<Frequency>().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument(_)));
    }

    #[test]
    fn new_recurrence_defaults_to_active() {
        let input: NewRecurrence = serde_json::from_str(
            r#"{"name":"payroll","anchor_time":"2026-01-05T09:00:00Z","frequency":"weekly"}"#,
        )
        .unwrap();
        assert!(input.is_active);
        assert!(input.owner_context.is_null());
    }
}
