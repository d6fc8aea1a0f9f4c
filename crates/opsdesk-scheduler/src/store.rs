use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    schedule::resume_point,
    types::{Frequency, NewRecurrence, RecurrenceDefinition, RecurrencePatch},
};

/// Durable home of recurrence definitions, as seen by the scheduler core.
///
/// The core only reads definitions and advances their recurrence fields;
/// creation, edits and deletion belong to the CRUD layer.
pub trait ScheduleStore: Send + Sync {
    /// Every active, non-deleted definition, soonest first.
    fn load_active(&self) -> Result<Vec<RecurrenceDefinition>>;

    /// Read one definition by ID, including soft-deleted rows so callers can
    /// observe the deletion.
    fn get(&self, id: &str) -> Result<Option<RecurrenceDefinition>>;

    /// Atomically store both recurrence fields after a successful run.
    ///
    /// Compare-and-set against `read`, the definition the run was computed
    /// from: if its grid (`anchor_time`, `frequency`, `next_occurrence`) was
    /// edited in the meantime nothing is written and `Ok(false)` is returned.
    /// A deleted or unknown row is `DefinitionNotFound`.
    fn persist_progress(
        &self,
        read: &RecurrenceDefinition,
        last_occurrence: DateTime<Utc>,
        next_occurrence: DateTime<Utc>,
    ) -> Result<bool>;
}

const COLUMNS: &str = "id, name, anchor_time, frequency, is_active, last_occurrence,
     next_occurrence, is_deleted, owner_context, created_at, updated_at";

/// SQLite-backed [`ScheduleStore`] that also serves the CRUD layer.
///
/// Wraps a single connection in a `Mutex`; every operation is one short
/// statement (or a read-then-write under the same lock), so contention stays low.
pub struct SqliteScheduleStore {
    db: Mutex<Connection>,
}

impl SqliteScheduleStore {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Persist a new definition. Its first occurrence is the anchor itself.
    #[instrument(skip(self, input), fields(name = %input.name, frequency = %input.frequency))]
    pub fn create(&self, input: NewRecurrence) -> Result<RecurrenceDefinition> {
        if input.name.trim().is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "name must not be empty".to_string(),
            ));
        }
        let now = Utc::now();
        let definition = RecurrenceDefinition {
            id: Uuid::now_v7().to_string(),
            name: input.name,
            anchor_time: input.anchor_time,
            frequency: input.frequency,
            is_active: input.is_active,
            last_occurrence: None,
            next_occurrence: input.anchor_time,
            is_deleted: false,
            owner_context: input.owner_context,
            created_at: now,
            updated_at: now,
        };
        self.write(&self.lock(), &definition, false)?;
        info!(definition_id = %definition.id, "recurrence created");
        Ok(definition)
    }

    /// Apply a partial edit to a live definition.
    ///
    /// Changing the anchor or frequency moves `next_occurrence` to the new
    /// grid's resume point; toggling `is_active` leaves it alone.
    #[instrument(skip(self, patch), fields(id = %id))]
    pub fn update(&self, id: &str, patch: RecurrencePatch) -> Result<RecurrenceDefinition> {
        let db = self.lock();
        let mut definition = select_one(&db, id)?
            .filter(|d| !d.is_deleted)
            .ok_or_else(|| SchedulerError::DefinitionNotFound { id: id.to_string() })?;

        if let Some(name) = patch.name.clone() {
            if name.trim().is_empty() {
                return Err(SchedulerError::InvalidArgument(
                    "name must not be empty".to_string(),
                ));
            }
            definition.name = name;
        }
        if let Some(anchor) = patch.anchor_time {
            definition.anchor_time = anchor;
        }
        if let Some(frequency) = patch.frequency {
            definition.frequency = frequency;
        }
        if let Some(active) = patch.is_active {
            definition.is_active = active;
        }
        if let Some(ctx) = patch.owner_context.clone() {
            definition.owner_context = ctx;
        }
        if patch.changes_grid() {
            definition.next_occurrence = resume_point(
                definition.anchor_time,
                definition.frequency,
                definition.last_occurrence,
            );
        }
        definition.updated_at = Utc::now();

        self.write(&db, &definition, true)?;
        info!(definition_id = %id, active = definition.is_active, "recurrence updated");
        Ok(definition)
    }

    /// Flag a definition as deleted. The row is kept for history.
    #[instrument(skip(self), fields(id = %id))]
    pub fn soft_delete(&self, id: &str) -> Result<()> {
        let n = self.lock().execute(
            "UPDATE recurrences SET is_deleted = 1, updated_at = ?1
             WHERE id = ?2 AND is_deleted = 0",
            rusqlite::params![ts(Utc::now()), id],
        )?;
        if n == 0 {
            return Err(SchedulerError::DefinitionNotFound { id: id.to_string() });
        }
        info!(definition_id = %id, "recurrence soft-deleted");
        Ok(())
    }

    /// All non-deleted definitions ordered by creation time.
    pub fn list(&self) -> Result<Vec<RecurrenceDefinition>> {
        let db = self.lock();
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM recurrences WHERE is_deleted = 0 ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map([], row_to_definition)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Insert or overwrite a definition verbatim (imports and fixtures).
    pub fn import(&self, definition: &RecurrenceDefinition) -> Result<()> {
        self.write(&self.lock(), definition, true)
    }

    // --- private helpers ---------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, db: &Connection, d: &RecurrenceDefinition, replace: bool) -> Result<()> {
        let verb = if replace {
            "INSERT OR REPLACE"
        } else {
            "INSERT"
        };
        db.execute(
            &format!(
                "{verb} INTO recurrences ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            rusqlite::params![
                d.id,
                d.name,
                ts(d.anchor_time),
                d.frequency.as_str(),
                d.is_active,
                d.last_occurrence.map(ts),
                ts(d.next_occurrence),
                d.is_deleted,
                serde_json::to_string(&d.owner_context)?,
                ts(d.created_at),
                ts(d.updated_at),
            ],
        )?;
        Ok(())
    }
}

impl ScheduleStore for SqliteScheduleStore {
    fn load_active(&self) -> Result<Vec<RecurrenceDefinition>> {
        let db = self.lock();
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM recurrences
             WHERE is_deleted = 0 AND is_active = 1
             ORDER BY next_occurrence, id"
        ))?;
        let definitions = stmt
            .query_map([], row_to_definition)?
            // One corrupt row must not keep the rest from being scheduled.
            .filter_map(|r| match r {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("skipping unreadable recurrence row: {e}");
                    None
                }
            })
            .collect();
        Ok(definitions)
    }

    #[instrument(skip(self), fields(id = %id))]
    fn get(&self, id: &str) -> Result<Option<RecurrenceDefinition>> {
        select_one(&self.lock(), id)
    }

    #[instrument(skip(self, read), fields(id = %read.id, %last_occurrence, %next_occurrence))]
    fn persist_progress(
        &self,
        read: &RecurrenceDefinition,
        last_occurrence: DateTime<Utc>,
        next_occurrence: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.lock();
        let n = db.execute(
            "UPDATE recurrences
             SET last_occurrence = ?1, next_occurrence = ?2, updated_at = ?3
             WHERE id = ?4 AND is_deleted = 0
               AND anchor_time = ?5 AND frequency = ?6 AND next_occurrence = ?7",
            rusqlite::params![
                ts(last_occurrence),
                ts(next_occurrence),
                ts(Utc::now()),
                read.id,
                ts(read.anchor_time),
                read.frequency.as_str(),
                ts(read.next_occurrence),
            ],
        )?;
        if n > 0 {
            return Ok(true);
        }
        match select_one(&db, &read.id)? {
            Some(current) if !current.is_deleted => {
                warn!(definition_id = %read.id, "recurrence grid changed during run; progress not stored");
                Ok(false)
            }
            _ => Err(SchedulerError::DefinitionNotFound {
                id: read.id.clone(),
            }),
        }
    }
}

fn select_one(db: &Connection, id: &str) -> Result<Option<RecurrenceDefinition>> {
    let definition = db
        .query_row(
            &format!("SELECT {COLUMNS} FROM recurrences WHERE id = ?1"),
            [id],
            row_to_definition,
        )
        .optional()?;
    Ok(definition)
}

/// Fixed-width RFC 3339 so lexical order in SQLite matches time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Map a SQLite row to a `RecurrenceDefinition`.
fn row_to_definition(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecurrenceDefinition> {
    let frequency: String = row.get(3)?;
    let frequency: Frequency = frequency
        .parse()
        .map_err(|e: SchedulerError| {
            rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
        })?;
    let owner_context: String = row.get(8)?;
    let owner_context = serde_json::from_str(&owner_context)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    let last_occurrence = row
        .get::<_, Option<String>>(5)?
        .map(|raw| parse_ts(5, &raw))
        .transpose()?;

    Ok(RecurrenceDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        anchor_time: parse_ts(2, &row.get::<_, String>(2)?)?,
        frequency,
        is_active: row.get(4)?,
        last_occurrence,
        next_occurrence: parse_ts(6, &row.get::<_, String>(6)?)?,
        is_deleted: row.get(7)?,
        owner_context,
        created_at: parse_ts(9, &row.get::<_, String>(9)?)?,
        updated_at: parse_ts(10, &row.get::<_, String>(10)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn store() -> SqliteScheduleStore {
        SqliteScheduleStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn weekly(name: &str) -> NewRecurrence {
        NewRecurrence {
            name: name.to_string(),
            anchor_time: Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap(),
            frequency: Frequency::Weekly,
            is_active: true,
            owner_context: json!({ "title": "Timesheet review" }),
        }
    }

    #[test]
    fn create_starts_at_anchor_and_reads_back() {
        let store = store();
        let created = store.create(weekly("timesheets")).unwrap();
        assert_eq!(created.next_occurrence, created.anchor_time);
        assert!(created.last_occurrence.is_none());

        let fetched = store.get(&created.id).unwrap().expect("row exists");
        assert_eq!(fetched.owner_context, json!({ "title": "Timesheet review" }));
        assert_eq!(fetched.next_occurrence, created.next_occurrence);
        assert_eq!(fetched.frequency, Frequency::Weekly);
    }

    #[test]
    fn create_rejects_blank_name() {
        let err = store().create(weekly("  ")).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument(_)));
    }

    #[test]
    fn load_active_excludes_inactive_and_deleted() {
        let store = store();
        let keep = store.create(weekly("keep")).unwrap();
        let paused = store.create(weekly("paused")).unwrap();
        let gone = store.create(weekly("gone")).unwrap();
        store
            .update(
                &paused.id,
                RecurrencePatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        store.soft_delete(&gone.id).unwrap();

        let ids: Vec<String> = store.load_active().unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![keep.id]);
        assert_eq!(store.list().unwrap().len(), 2);
        assert!(store.get(&gone.id).unwrap().unwrap().is_deleted);
    }

    #[test]
    fn persist_progress_updates_both_fields() {
        let store = store();
        let d = store.create(weekly("x")).unwrap();
        let last = d.anchor_time;
        let next = d.anchor_time + chrono::Duration::weeks(1);
        assert!(store.persist_progress(&d, last, next).unwrap());
        let after = store.get(&d.id).unwrap().unwrap();
        assert_eq!(after.last_occurrence, Some(last));
        assert_eq!(after.next_occurrence, next);
    }

    #[test]
    fn persist_progress_from_stale_read_writes_nothing() {
        let store = store();
        let read = store.create(weekly("x")).unwrap();
        let moved = Utc.with_ymd_and_hms(2026, 10, 25, 9, 0, 0).unwrap();
        store
            .update(
                &read.id,
                RecurrencePatch {
                    anchor_time: Some(moved),
                    frequency: Some(Frequency::Monthly),
                    ..Default::default()
                },
            )
            .unwrap();

        let stored = store
            .persist_progress(&read, read.anchor_time, read.anchor_time + chrono::Duration::weeks(1))
            .unwrap();
        assert!(!stored);
        let after = store.get(&read.id).unwrap().unwrap();
        assert_eq!(after.next_occurrence, moved);
        assert_eq!(after.last_occurrence, None);
    }

    #[test]
    fn persist_progress_on_deleted_row_is_not_found() {
        let store = store();
        let d = store.create(weekly("x")).unwrap();
        store.soft_delete(&d.id).unwrap();
        let err = store
            .persist_progress(&d, d.anchor_time, d.anchor_time)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DefinitionNotFound { .. }));
        assert!(matches!(
            store.soft_delete(&d.id).unwrap_err(),
            SchedulerError::DefinitionNotFound { .. }
        ));
    }

    #[test]
    fn grid_edit_moves_next_occurrence_to_resume_point() {
        let store = store();
        let d = store.create(weekly("x")).unwrap();
        let last = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        store
            .persist_progress(&d, last, last + chrono::Duration::weeks(1))
            .unwrap();

        let updated = store
            .update(
                &d.id,
                RecurrencePatch {
                    frequency: Some(Frequency::Monthly),
                    ..Default::default()
                },
            )
            .unwrap();
        // Monthly grid anchored on Jan 5: first slot after Mar 2 is Mar 5.
        assert_eq!(
            updated.next_occurrence,
            Utc.with_ymd_and_hms(2026, 3, 5, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn corrupt_row_is_skipped_on_load() {
        let store = store();
        let good = store.create(weekly("good")).unwrap();
        let bad = store.create(weekly("bad")).unwrap();
        store
            .lock()
            .execute(
                "UPDATE recurrences SET frequency = 'hourly' WHERE id = ?1",
                [&bad.id],
            )
            .unwrap();
        let loaded = store.load_active().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, good.id);
    }
}
