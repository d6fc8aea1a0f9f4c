use std::sync::Arc;

use async_trait::async_trait;
use opsdesk_core::SchedulePolicy;
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    error::{MaterializeError, Result, SchedulerError},
    schedule::advance,
    store::ScheduleStore,
    types::{
        AuditEvent, BusinessRecord, Occurrence, RecurrenceDefinition, RunOutcome, RunSource,
        SkipReason,
    },
};

/// Produces the concrete business record for one occurrence.
///
/// May be invoked more than once for the same occurrence (after a crash
/// between materialization and persistence), so implementations should be
/// idempotent on `(definition_id, scheduled_for)`.
#[async_trait]
pub trait Materializer: Send + Sync {
    async fn materialize(
        &self,
        occurrence: &Occurrence,
    ) -> std::result::Result<BusinessRecord, MaterializeError>;

    /// Reject an owner context that could never be materialized, before a
    /// definition carrying it is stored.
    fn validate(&self, _owner_context: &serde_json::Value) -> std::result::Result<(), MaterializeError> {
        Ok(())
    }
}

/// Best-effort receiver of execution audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        info!(
            target: "audit",
            definition_id = %event.definition_id,
            definition = %event.definition_name,
            scheduled_for = %event.scheduled_for,
            executed_at = %event.executed_at,
            next = %event.next_occurrence,
            record_kind = %event.record.kind,
            record_id = %event.record.id,
            source = %event.source,
            "occurrence executed"
        );
        Ok(())
    }
}

/// Delivers each event to every inner sink; one failing sink does not stop
/// the others.
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        let failures: Vec<String> = self
            .sinks
            .iter()
            .filter_map(|sink| sink.record(event).err().map(|e| e.to_string()))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::Audit(failures.join("; ")))
        }
    }
}

/// The guarded unit of work run whenever a definition fires, from a live
/// timer or from catch-up.
#[derive(Clone)]
pub struct OccurrenceExecutor {
    store: Arc<dyn ScheduleStore>,
    materializer: Arc<dyn Materializer>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    policy: SchedulePolicy,
}

impl OccurrenceExecutor {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        materializer: Arc<dyn Materializer>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        policy: SchedulePolicy,
    ) -> Self {
        Self {
            store,
            materializer,
            audit,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    /// Execute `definition`'s due occurrence and advance its recurrence state.
    ///
    /// Returns the definition unchanged (as `Skipped`) when it is inactive,
    /// deleted or not yet due. On materializer failure nothing is persisted,
    /// so the same occurrence is attempted again later. If the grid was
    /// edited while the materializer ran, the stored (edited) definition is
    /// returned as `Skipped` with [`SkipReason::Superseded`].
    pub async fn run(
        &self,
        definition: RecurrenceDefinition,
        source: RunSource,
    ) -> Result<RunOutcome> {
        let now = self.clock.now();
        let skip = if definition.is_deleted {
            Some(SkipReason::Deleted)
        } else if !definition.is_active {
            Some(SkipReason::Inactive)
        } else if now < definition.next_occurrence {
            Some(SkipReason::NotDue)
        } else {
            None
        };
        if let Some(reason) = skip {
            debug!(definition_id = %definition.id, ?reason, %source, "occurrence skipped");
            return Ok(RunOutcome::Skipped { definition, reason });
        }

        let occurrence = Occurrence {
            definition_id: definition.id.clone(),
            owner_context: definition.owner_context.clone(),
            scheduled_for: definition.next_occurrence,
        };
        let record = self
            .materializer
            .materialize(&occurrence)
            .await
            .map_err(|source| SchedulerError::Materialize {
                id: definition.id.clone(),
                source,
            })?;

        let (last, next) = advance(self.policy, &definition, now);
        if !self.store.persist_progress(&definition, last, next)? {
            let current = self.store.get(&definition.id)?.unwrap_or(definition);
            return Ok(RunOutcome::Skipped {
                definition: current,
                reason: SkipReason::Superseded,
            });
        }

        let mut updated = definition;
        updated.last_occurrence = Some(last);
        updated.next_occurrence = next;
        updated.updated_at = now;

        info!(
            definition_id = %updated.id,
            scheduled_for = %occurrence.scheduled_for,
            next = %next,
            record_id = %record.id,
            %source,
            "occurrence executed"
        );

        let event = AuditEvent {
            definition_id: updated.id.clone(),
            definition_name: updated.name.clone(),
            scheduled_for: occurrence.scheduled_for,
            executed_at: now,
            next_occurrence: next,
            record: record.clone(),
            source,
        };
        if let Err(e) = self.audit.record(&event) {
            warn!(definition_id = %updated.id, "audit event dropped: {e}");
        }

        Ok(RunOutcome::Executed {
            definition: updated,
            record,
        })
    }
}
