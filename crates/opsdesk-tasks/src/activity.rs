use std::sync::{Mutex, MutexGuard};

use opsdesk_scheduler::{AuditEvent, AuditSink, SchedulerError};
use rusqlite::Connection;

use crate::error::Result;
use crate::manager::{parse_ts, ts};
use crate::types::ActivityEntry;

/// Durable audit trail of recurrence executions, stored in `activity_log`.
pub struct ActivityLog {
    db: Mutex<Connection>,
}

impl ActivityLog {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    pub fn append(&self, event: &AuditEvent) -> Result<i64> {
        let db = self.lock();
        db.execute(
            "INSERT INTO activity_log
             (definition_id, definition_name, scheduled_for, executed_at,
              next_occurrence, record_kind, record_id, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                event.definition_id,
                event.definition_name,
                ts(event.scheduled_for),
                ts(event.executed_at),
                ts(event.next_occurrence),
                event.record.kind,
                event.record.id,
                event.source.to_string(),
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Most recent entries for one definition, newest first.
    pub fn for_definition(&self, definition_id: &str, limit: usize) -> Result<Vec<ActivityEntry>> {
        let db = self.lock();
        let mut stmt = db.prepare(
            "SELECT id, definition_id, definition_name, scheduled_for, executed_at,
                    next_occurrence, record_kind, record_id, source
             FROM activity_log
             WHERE definition_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(rusqlite::params![definition_id, limit], row_to_entry)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AuditSink for ActivityLog {
    fn record(&self, event: &AuditEvent) -> opsdesk_scheduler::Result<()> {
        self.append(event)
            .map(|_| ())
            .map_err(|e| SchedulerError::Audit(e.to_string()))
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityEntry> {
    Ok(ActivityEntry {
        id: row.get(0)?,
        definition_id: row.get(1)?,
        definition_name: row.get(2)?,
        scheduled_for: parse_ts(3, &row.get::<_, String>(3)?)?,
        executed_at: parse_ts(4, &row.get::<_, String>(4)?)?,
        next_occurrence: parse_ts(5, &row.get::<_, String>(5)?)?,
        record_kind: row.get(6)?,
        record_id: row.get(7)?,
        source: row.get(8)?,
    })
}
