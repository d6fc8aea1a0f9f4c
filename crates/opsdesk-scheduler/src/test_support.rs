//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use opsdesk_core::{SchedulePolicy, SchedulerConfig};
use rusqlite::Connection;

use crate::{
    catchup::CatchUpRunner,
    clock::{Clock, FixedClock},
    engine::RecurrenceScheduler,
    error::{MaterializeError, Result, SchedulerError},
    executor::{AuditSink, Materializer, OccurrenceExecutor},
    store::SqliteScheduleStore,
    types::{AuditEvent, BusinessRecord, Frequency, Occurrence, RecurrenceDefinition, RunSource},
};

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// Active weekly definition that has never run.
pub fn weekly_fixture(anchor: DateTime<Utc>) -> RecurrenceDefinition {
    RecurrenceDefinition {
        id: uuid::Uuid::new_v4().to_string(),
        name: "weekly fixture".to_string(),
        anchor_time: anchor,
        frequency: Frequency::Weekly,
        is_active: true,
        last_occurrence: None,
        next_occurrence: anchor,
        is_deleted: false,
        owner_context: serde_json::json!({ "title": "fixture" }),
        created_at: anchor,
        updated_at: anchor,
    }
}

/// Records every call; fails the next N calls on request. While the gate is
/// held, calls block after being recorded.
#[derive(Default)]
pub struct RecordingMaterializer {
    calls: Mutex<Vec<DateTime<Utc>>>,
    failures_left: AtomicUsize,
    gate: tokio::sync::Mutex<()>,
}

impl RecordingMaterializer {
    pub async fn hold(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<DateTime<Utc>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Materializer for RecordingMaterializer {
    async fn materialize(
        &self,
        occurrence: &Occurrence,
    ) -> std::result::Result<BusinessRecord, MaterializeError> {
        self.calls.lock().unwrap().push(occurrence.scheduled_for);
        drop(self.gate.lock().await);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MaterializeError::new("downstream unavailable"));
        }
        Ok(BusinessRecord {
            kind: "fixture".to_string(),
            id: format!("{}@{}", occurrence.definition_id, occurrence.scheduled_for),
        })
    }

    fn validate(&self, owner_context: &serde_json::Value) -> std::result::Result<(), MaterializeError> {
        if owner_context.get("title").is_none() {
            return Err(MaterializeError::new("missing title"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
    failing: AtomicBool,
}

impl RecordingAudit {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::Audit("sink offline".to_string()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub clock: Arc<FixedClock>,
    pub store: Arc<SqliteScheduleStore>,
    pub materializer: Arc<RecordingMaterializer>,
    pub audit: Arc<RecordingAudit>,
    pub policy: SchedulePolicy,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_policy(now, SchedulePolicy::FixedGrid)
    }

    pub fn with_policy(now: DateTime<Utc>, policy: SchedulePolicy) -> Self {
        Self {
            clock: Arc::new(FixedClock::new(now)),
            store: Arc::new(
                SqliteScheduleStore::new(Connection::open_in_memory().unwrap()).unwrap(),
            ),
            materializer: Arc::new(RecordingMaterializer::default()),
            audit: Arc::new(RecordingAudit::default()),
            policy,
        }
    }

    /// Persist `definition` verbatim and hand it back.
    pub fn seed(&self, definition: RecurrenceDefinition) -> RecurrenceDefinition {
        self.store.import(&definition).unwrap();
        definition
    }

    pub fn executor(&self) -> OccurrenceExecutor {
        OccurrenceExecutor::new(
            self.store.clone(),
            self.materializer.clone(),
            self.audit.clone(),
            self.clock.clone(),
            self.policy,
        )
    }

    pub fn catch_up(&self, max_runs: u32) -> CatchUpRunner {
        CatchUpRunner::new(self.executor(), self.clock.clone(), max_runs)
    }

    pub fn scheduler(&self) -> RecurrenceScheduler {
        let config = SchedulerConfig {
            policy: self.policy,
            ..SchedulerConfig::default()
        };
        RecurrenceScheduler::new(
            config,
            self.store.clone(),
            self.materializer.clone(),
            self.audit.clone(),
            self.clock.clone(),
        )
    }

    pub fn sample_event(&self) -> AuditEvent {
        let now = self.clock.now();
        AuditEvent {
            definition_id: "rec-1".to_string(),
            definition_name: "sample".to_string(),
            scheduled_for: now,
            executed_at: now,
            next_occurrence: now,
            record: BusinessRecord {
                kind: "fixture".to_string(),
                id: "r-1".to_string(),
            },
            source: RunSource::Timer,
        }
    }
}
