use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use opsdesk_scheduler::{BusinessRecord, MaterializeError, Materializer, Occurrence};
use rusqlite::{types::Type, Connection, OptionalExtension};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{Result, TaskError};
use crate::types::{Task, TaskSpec};

const COLUMNS: &str = "id, recurrence_id, occurrence_at, project_id, title, description,
     assignee, created_at";

/// Thread-safe manager for persisted tasks.
///
/// Wraps a single SQLite connection in a `Mutex`. The gateway hands it its
/// own connection to the shared database file.
pub struct TaskManager {
    db: Mutex<Connection>,
}

impl TaskManager {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Create the task for one occurrence, or return the one that already
    /// exists for the same `(recurrence_id, occurrence_at)`.
    ///
    /// The boolean is `true` when a new row was written.
    #[instrument(skip(self, spec), fields(recurrence_id = %recurrence_id, %occurrence_at))]
    pub fn insert_occurrence(
        &self,
        recurrence_id: &str,
        occurrence_at: DateTime<Utc>,
        spec: &TaskSpec,
    ) -> Result<(Task, bool)> {
        let db = self.lock();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO tasks
             (id, recurrence_id, occurrence_at, project_id, title, description, assignee, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                Uuid::now_v7().to_string(),
                recurrence_id,
                ts(occurrence_at),
                spec.project_id,
                spec.title,
                spec.description,
                spec.assignee,
                ts(Utc::now()),
            ],
        )?;

        // Read back; a replayed occurrence hits the existing row.
        let task = db.query_row(
            &format!(
                "SELECT {COLUMNS} FROM tasks WHERE recurrence_id = ?1 AND occurrence_at = ?2"
            ),
            rusqlite::params![recurrence_id, ts(occurrence_at)],
            row_to_task,
        )?;
        if inserted == 0 {
            debug!(task_id = %task.id, "occurrence already materialized");
        }
        Ok((task, inserted > 0))
    }

    /// Retrieve a task by ID.
    pub fn get(&self, id: &str) -> Result<Task> {
        self.lock()
            .query_row(
                &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"),
                rusqlite::params![id],
                row_to_task,
            )
            .optional()?
            .ok_or_else(|| TaskError::NotFound { id: id.to_string() })
    }

    /// List tasks newest occurrence first, optionally for one recurrence.
    pub fn list(&self, recurrence_id: Option<&str>, limit: usize) -> Result<Vec<Task>> {
        let db = self.lock();
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM tasks
             WHERE ?1 IS NULL OR recurrence_id = ?1
             ORDER BY occurrence_at DESC, id DESC
             LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(rusqlite::params![recurrence_id, limit], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Materializer for TaskManager {
    async fn materialize(
        &self,
        occurrence: &Occurrence,
    ) -> std::result::Result<BusinessRecord, MaterializeError> {
        let spec = TaskSpec::from_context(&occurrence.owner_context)
            .map_err(|e| MaterializeError::new(e.to_string()))?;
        let (task, created) = self
            .insert_occurrence(&occurrence.definition_id, occurrence.scheduled_for, &spec)
            .map_err(|e| MaterializeError::new(e.to_string()))?;
        if created {
            info!(task_id = %task.id, recurrence_id = %task.recurrence_id, title = %task.title, "task created");
        }
        Ok(BusinessRecord {
            kind: "task".to_string(),
            id: task.id,
        })
    }

    fn validate(&self, owner_context: &serde_json::Value) -> std::result::Result<(), MaterializeError> {
        TaskSpec::from_context(owner_context)
            .map(|_| ())
            .map_err(|e| MaterializeError::new(e.to_string()))
    }
}

pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Map a SQLite row to a `Task`.
fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        recurrence_id: row.get(1)?,
        occurrence_at: parse_ts(2, &row.get::<_, String>(2)?)?,
        project_id: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        assignee: row.get(6)?,
        created_at: parse_ts(7, &row.get::<_, String>(7)?)?,
    })
}
