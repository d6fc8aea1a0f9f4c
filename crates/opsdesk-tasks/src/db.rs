use rusqlite::Connection;

use crate::error::Result;

/// Initialise the tasks and activity-log tables and their indexes.
///
/// Safe to call on every startup: uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            id            TEXT PRIMARY KEY,
            recurrence_id TEXT NOT NULL,
            occurrence_at TEXT NOT NULL,
            project_id    TEXT,
            title         TEXT NOT NULL,
            description   TEXT,
            assignee      TEXT,
            created_at    TEXT NOT NULL,
            UNIQUE (recurrence_id, occurrence_at)
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_tasks_project
            ON tasks(project_id, occurrence_at);

        CREATE TABLE IF NOT EXISTS activity_log (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            definition_id   TEXT NOT NULL,
            definition_name TEXT NOT NULL,
            scheduled_for   TEXT NOT NULL,
            executed_at     TEXT NOT NULL,
            next_occurrence TEXT NOT NULL,
            record_kind     TEXT NOT NULL,
            record_id       TEXT NOT NULL,
            source          TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_activity_definition
            ON activity_log(definition_id, id DESC);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('tasks', 'activity_log')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 2);
    }
}
