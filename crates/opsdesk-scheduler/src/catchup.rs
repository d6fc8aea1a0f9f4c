use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    clock::Clock,
    error::{Result, SchedulerError},
    executor::OccurrenceExecutor,
    types::{RecurrenceDefinition, RunOutcome, RunSource},
};

/// Result of draining one definition's backlog.
#[derive(Debug, Clone)]
pub struct DrainReport {
    /// The definition as it stands after the last successful execution.
    pub definition: RecurrenceDefinition,
    /// Number of occurrences executed.
    pub runs: u32,
}

/// Executes every occurrence of a definition that fell due while the
/// process was down.
#[derive(Clone)]
pub struct CatchUpRunner {
    executor: OccurrenceExecutor,
    clock: Arc<dyn Clock>,
    max_runs: u32,
}

impl CatchUpRunner {
    pub fn new(executor: OccurrenceExecutor, clock: Arc<dyn Clock>, max_runs: u32) -> Self {
        Self {
            executor,
            clock,
            max_runs,
        }
    }

    /// Run `definition` repeatedly while it is active and due.
    ///
    /// Each iteration works on the definition value returned by the previous
    /// one; the store is never re-queried mid-loop. Runs already performed
    /// stay persisted if a later iteration fails.
    pub async fn drain(&self, mut definition: RecurrenceDefinition) -> Result<DrainReport> {
        let mut runs = 0u32;
        while definition.is_due(self.clock.now()) {
            if runs >= self.max_runs {
                return Err(SchedulerError::LimitExceeded(format!(
                    "catch-up for {} stopped after {runs} runs with next occurrence {} still due",
                    definition.id, definition.next_occurrence
                )));
            }

            let previous = definition.next_occurrence;
            match self.executor.run(definition, RunSource::CatchUp).await? {
                RunOutcome::Executed {
                    definition: updated,
                    ..
                } => {
                    ensure_progress(&updated.id, previous, updated.next_occurrence)?;
                    runs += 1;
                    definition = updated;
                }
                RunOutcome::Skipped {
                    definition: unchanged,
                    reason,
                } => {
                    debug!(definition_id = %unchanged.id, ?reason, "catch-up stopped early");
                    definition = unchanged;
                    break;
                }
            }
        }

        if runs > 0 {
            info!(
                definition_id = %definition.id,
                runs,
                next = %definition.next_occurrence,
                "catch-up complete"
            );
        }
        Ok(DrainReport { definition, runs })
    }
}

/// Each execution must move `next_occurrence` strictly forward.
pub fn ensure_progress(id: &str, previous: DateTime<Utc>, next: DateTime<Utc>) -> Result<()> {
    if next <= previous {
        return Err(SchedulerError::NoProgress {
            id: id.to_string(),
            previous,
            next,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScheduleStore;
    use crate::test_support::{at, weekly_fixture, Harness};
    use opsdesk_core::SchedulePolicy;

    #[tokio::test]
    async fn drains_every_missed_week() {
        // Wednesday; the definition last ran five weeks ago.
        let h = Harness::new(at(2026, 10, 21, 12, 0));
        let mut def = weekly_fixture(at(2026, 1, 5, 9, 0));
        def.last_occurrence = Some(at(2026, 9, 14, 9, 0));
        def.next_occurrence = at(2026, 9, 21, 9, 0);
        let def = h.seed(def);

        let report = h.catch_up(1000).drain(def.clone()).await.unwrap();
        assert_eq!(report.runs, 5);
        assert_eq!(report.definition.next_occurrence, at(2026, 10, 26, 9, 0));
        assert!(report.definition.next_occurrence > h.clock.now());
        assert_eq!(
            h.materializer.calls(),
            vec![
                at(2026, 9, 21, 9, 0),
                at(2026, 9, 28, 9, 0),
                at(2026, 10, 5, 9, 0),
                at(2026, 10, 12, 9, 0),
                at(2026, 10, 19, 9, 0),
            ]
        );
        let stored = h.store.get(&def.id).unwrap().unwrap();
        assert_eq!(stored.last_occurrence, Some(at(2026, 10, 19, 9, 0)));
    }

    #[tokio::test]
    async fn nothing_due_means_no_runs() {
        let h = Harness::new(at(2026, 10, 1, 0, 0));
        let def = h.seed(weekly_fixture(at(2026, 10, 5, 9, 0)));
        let report = h.catch_up(1000).drain(def.clone()).await.unwrap();
        assert_eq!(report.runs, 0);
        assert_eq!(report.definition, def);
    }

    #[tokio::test]
    async fn inactive_definition_is_not_caught_up() {
        let h = Harness::new(at(2026, 10, 21, 0, 0));
        let mut def = weekly_fixture(at(2026, 1, 5, 9, 0));
        def.is_active = false;
        let def = h.seed(def);
        let report = h.catch_up(1000).drain(def).await.unwrap();
        assert_eq!(report.runs, 0);
        assert!(h.materializer.calls().is_empty());
    }

    #[tokio::test]
    async fn failure_stops_drain_and_is_retried_next_time() {
        let h = Harness::new(at(2026, 10, 21, 12, 0));
        let mut def = weekly_fixture(at(2026, 1, 5, 9, 0));
        def.next_occurrence = at(2026, 10, 12, 9, 0);
        let def = h.seed(def);
        h.materializer.fail_next(1);

        let err = h.catch_up(1000).drain(def.clone()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Materialize { .. }));
        let stored = h.store.get(&def.id).unwrap().unwrap();
        assert_eq!(stored.next_occurrence, at(2026, 10, 12, 9, 0));
        assert!(stored.last_occurrence.is_none());

        let report = h.catch_up(1000).drain(stored).await.unwrap();
        assert_eq!(report.runs, 2);
        assert_eq!(
            h.materializer.calls(),
            vec![
                at(2026, 10, 12, 9, 0),
                at(2026, 10, 12, 9, 0),
                at(2026, 10, 19, 9, 0),
            ]
        );
    }

    #[tokio::test]
    async fn run_cap_is_enforced() {
        let h = Harness::new(at(2026, 10, 21, 12, 0));
        let def = h.seed(weekly_fixture(at(2026, 1, 5, 9, 0)));

        let err = h.catch_up(3).drain(def.clone()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::LimitExceeded(_)));
        let stored = h.store.get(&def.id).unwrap().unwrap();
        assert_eq!(stored.next_occurrence, at(2026, 1, 26, 9, 0));
    }

    #[tokio::test]
    async fn drift_forward_collapses_backlog_into_one_run() {
        let h = Harness::with_policy(at(2026, 10, 21, 12, 0), SchedulePolicy::DriftForward);
        let mut def = weekly_fixture(at(2026, 1, 5, 9, 0));
        def.next_occurrence = at(2026, 9, 21, 9, 0);
        let def = h.seed(def);

        let report = h.catch_up(1000).drain(def).await.unwrap();
        assert_eq!(report.runs, 1);
        assert_eq!(report.definition.next_occurrence, at(2026, 10, 28, 12, 0));
    }

    #[test]
    fn non_advancing_step_is_fatal() {
        let t = at(2026, 10, 5, 9, 0);
        let err = ensure_progress("rec-1", t, t).unwrap_err();
        assert!(err.is_fatal());
        assert!(ensure_progress("rec-1", t, t + chrono::Duration::seconds(1)).is_ok());
    }
}
