use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use opsdesk_core::SchedulerConfig;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    catchup::CatchUpRunner,
    clock::Clock,
    error::{Result, SchedulerError},
    executor::{AuditSink, Materializer, OccurrenceExecutor},
    registry::{TimerInfo, TimerRegistry, TimerTicket},
    store::ScheduleStore,
    types::{RecurrenceDefinition, RunSource},
};

type FireFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Summary of a boot-time [`RecurrenceScheduler::initialize`] pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct InitReport {
    /// Active, non-deleted definitions loaded from the store.
    pub loaded: usize,
    /// Occurrences executed by catch-up across all definitions.
    pub caught_up: u32,
    /// Live timers registered.
    pub scheduled: usize,
    /// Definitions whose catch-up failed.
    pub failed: Vec<String>,
}

/// Keeps live timers in step with persisted recurrence definitions.
///
/// Owns the timer registry, runs boot-time catch-up and exposes the
/// lifecycle hooks the CRUD layer calls after every store mutation. Clones
/// share the same state.
#[derive(Clone)]
pub struct RecurrenceScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ScheduleStore>,
    materializer: Arc<dyn Materializer>,
    executor: OccurrenceExecutor,
    catch_up: CatchUpRunner,
    registry: TimerRegistry,
    clock: Arc<dyn Clock>,
    /// Serializes executions per definition, from store re-read to reschedule.
    run_locks: DashMap<String, Arc<Mutex<()>>>,
    retry_delay: TimeDelta,
}

impl RecurrenceScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn ScheduleStore>,
        materializer: Arc<dyn Materializer>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let executor = OccurrenceExecutor::new(
            Arc::clone(&store),
            Arc::clone(&materializer),
            audit,
            Arc::clone(&clock),
            config.policy,
        );
        let catch_up =
            CatchUpRunner::new(executor.clone(), Arc::clone(&clock), config.max_catch_up_runs);
        let retry_secs = i64::try_from(config.retry_delay_secs).unwrap_or(i64::MAX);
        Self {
            inner: Arc::new(Inner {
                store,
                materializer,
                executor,
                catch_up,
                registry: TimerRegistry::new(Arc::clone(&clock)),
                clock,
                run_locks: DashMap::new(),
                retry_delay: TimeDelta::try_seconds(retry_secs).unwrap_or(TimeDelta::MAX),
            }),
        }
    }

    /// Load every active definition, drain its backlog, then arm its timer.
    ///
    /// Called once at process start. A failure in one definition is logged
    /// and recorded in the report; it never stops the others. Only a failure
    /// to load the definitions at all is returned as an error.
    pub async fn initialize(&self) -> Result<InitReport> {
        let definitions = self.inner.store.load_active()?;
        info!(
            count = definitions.len(),
            policy = %self.inner.executor.policy(),
            "recurrence scheduler starting"
        );

        let mut report = InitReport {
            loaded: definitions.len(),
            ..InitReport::default()
        };
        for definition in definitions {
            let id = definition.id.clone();
            let lock = self.run_lock(&id);
            let _guard = lock.lock().await;

            match self.inner.catch_up.drain(definition).await {
                Ok(drained) => {
                    report.caught_up += drained.runs;
                    if drained.definition.is_schedulable() {
                        self.schedule(&id, drained.definition.next_occurrence);
                        report.scheduled += 1;
                    }
                }
                Err(e) => {
                    error!(definition_id = %id, "catch-up failed: {e}");
                    report.failed.push(id.clone());
                    if e.is_fatal() {
                        error!(definition_id = %id, "definition left unscheduled");
                    } else if self.schedule_retry(&id) {
                        report.scheduled += 1;
                    }
                }
            }
        }

        info!(
            caught_up = report.caught_up,
            scheduled = report.scheduled,
            failed = report.failed.len(),
            "recurrence scheduler ready"
        );
        Ok(report)
    }

    /// Check an owner context against the materializer before it is stored.
    ///
    /// A context that fails here would fail every occurrence and be retried
    /// forever, so the CRUD layer rejects it up front.
    pub fn validate_context(&self, owner_context: &serde_json::Value) -> Result<()> {
        self.inner
            .materializer
            .validate(owner_context)
            .map_err(|e| SchedulerError::InvalidArgument(format!("owner_context: {e}")))
    }

    /// A definition was persisted for the first time.
    pub fn on_created(&self, definition: &RecurrenceDefinition) {
        if !definition.is_schedulable() {
            debug!(definition_id = %definition.id, "created inactive; no timer");
            return;
        }
        self.schedule(&definition.id, definition.next_occurrence);
    }

    /// A definition was edited, deactivated or reactivated.
    pub fn on_updated(&self, definition: &RecurrenceDefinition) {
        self.inner.registry.unregister(&definition.id);
        self.on_created(definition);
    }

    /// A definition was soft-deleted.
    pub fn on_deleted(&self, id: &str) {
        self.inner.registry.unregister(id);
        self.inner.run_locks.remove(id);
    }

    pub fn list_active_timer_ids(&self) -> BTreeSet<String> {
        self.inner.registry.registered_ids()
    }

    /// Registered timers with their fire times, soonest first.
    pub fn timers(&self) -> Vec<TimerInfo> {
        self.inner.registry.snapshot()
    }

    /// Cancel every pending timer. Runs already in flight finish on their own.
    pub fn shutdown(&self) {
        let count = self.inner.registry.len();
        self.inner.registry.clear();
        info!(count, "recurrence timers cancelled");
    }

    // --- private helpers ---------------------------------------------------

    fn run_lock(&self, id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.inner.run_locks.entry(id.to_string()).or_default().value())
    }

    fn schedule(&self, id: &str, fire_at: DateTime<Utc>) {
        let this = self.clone();
        self.inner
            .registry
            .register(id, fire_at, move |ticket| this.fire(ticket));
    }

    fn reschedule(&self, ticket: &TimerTicket, fire_at: DateTime<Utc>) {
        let this = self.clone();
        if self
            .inner
            .registry
            .reschedule(ticket, fire_at, move |t| this.fire(t))
            .is_none()
        {
            debug!(definition_id = %ticket.id, "registration changed during run; not rescheduling");
        }
    }

    fn retry_at(&self, next_occurrence: DateTime<Utc>) -> DateTime<Utc> {
        let earliest = self
            .inner
            .clock
            .now()
            .checked_add_signed(self.inner.retry_delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        next_occurrence.max(earliest)
    }

    /// Arm a delayed retry for a definition whose catch-up failed.
    fn schedule_retry(&self, id: &str) -> bool {
        match self.inner.store.get(id) {
            Ok(Some(definition)) if definition.is_schedulable() => {
                let at = self.retry_at(definition.next_occurrence);
                warn!(definition_id = %id, retry_at = %at, "occurrence will be retried");
                self.schedule(id, at);
                true
            }
            Ok(_) => false,
            Err(e) => {
                error!(definition_id = %id, "cannot re-read definition for retry: {e}");
                false
            }
        }
    }

    /// Timer callback: re-read, execute, reschedule.
    fn fire(self, ticket: TimerTicket) -> FireFuture {
        Box::pin(async move {
            let lock = self.run_lock(&ticket.id);
            let _guard = lock.lock().await;

            // The timer may predate an edit; always act on the stored state.
            let definition = match self.inner.store.get(&ticket.id) {
                Ok(Some(d)) => d,
                Ok(None) => {
                    warn!(definition_id = %ticket.id, "timer fired for unknown definition");
                    return;
                }
                Err(e) => {
                    error!(definition_id = %ticket.id, "cannot load definition: {e}");
                    let at = self.retry_at(self.inner.clock.now());
                    self.reschedule(&ticket, at);
                    return;
                }
            };
            if !definition.is_schedulable() {
                debug!(definition_id = %ticket.id, "definition no longer schedulable");
                return;
            }

            match self.inner.executor.run(definition, RunSource::Timer).await {
                Ok(outcome) => {
                    let next = outcome.definition().next_occurrence;
                    self.reschedule(&ticket, next);
                }
                Err(e) if e.is_fatal() => {
                    error!(definition_id = %ticket.id, "occurrence failed fatally: {e}");
                }
                Err(e) => {
                    let at = self.retry_at(self.inner.clock.now());
                    warn!(definition_id = %ticket.id, retry_at = %at, "occurrence failed: {e}");
                    self.reschedule(&ticket, at);
                }
            }
        })
    }
}
