use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `recurrences` table (idempotent) and an index matching the
/// boot-time load query, which filters on the flags and orders by due time.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS recurrences (
            id               TEXT    NOT NULL PRIMARY KEY,
            name             TEXT    NOT NULL,
            anchor_time      TEXT    NOT NULL,   -- RFC 3339 UTC
            frequency        TEXT    NOT NULL,   -- weekly | monthly | yearly
            is_active        INTEGER NOT NULL DEFAULT 1,
            last_occurrence  TEXT,               -- RFC 3339 or NULL
            next_occurrence  TEXT    NOT NULL,   -- RFC 3339 UTC
            is_deleted       INTEGER NOT NULL DEFAULT 0,
            owner_context    TEXT    NOT NULL,   -- opaque JSON payload
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_recurrences_due
            ON recurrences (is_deleted, is_active, next_occurrence);
        ",
    )?;
    Ok(())
}
