use rusqlite::Connection;

use crate::error::Result;

/// Initialise every keel table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_topology_tables(conn)?;
    create_backup_setting_table(conn)?;
    create_backup_table(conn)?;
    create_pipeline_tables(conn)?;
    Ok(())
}

fn create_topology_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS environment (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            creator_id  INTEGER NOT NULL,
            created_ts  INTEGER NOT NULL,
            name        TEXT    NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS instance (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            creator_id      INTEGER NOT NULL,
            created_ts      INTEGER NOT NULL,
            environment_id  INTEGER NOT NULL REFERENCES environment (id),
            name            TEXT    NOT NULL,
            host            TEXT    NOT NULL
        );
        CREATE TABLE IF NOT EXISTS db (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            creator_id   INTEGER NOT NULL,
            created_ts   INTEGER NOT NULL,
            instance_id  INTEGER NOT NULL REFERENCES instance (id),
            name         TEXT    NOT NULL,
            UNIQUE (instance_id, name)
        );",
    )?;
    Ok(())
}

/// One schedule per database; `(hour, day_of_week)` is the polling key.
fn create_backup_setting_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS backup_setting (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            creator_id     INTEGER NOT NULL,
            created_ts     INTEGER NOT NULL,
            updater_id     INTEGER NOT NULL,
            updated_ts     INTEGER NOT NULL,
            database_id    INTEGER NOT NULL UNIQUE REFERENCES db (id),
            enabled        INTEGER NOT NULL DEFAULT 0,
            hour           INTEGER NOT NULL CHECK (hour >= 0 AND hour <= 23),
            day_of_week    INTEGER NOT NULL CHECK (day_of_week >= 0 AND day_of_week <= 6),
            path_template  TEXT    NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_backup_setting_slot
            ON backup_setting (hour, day_of_week);",
    )?;
    Ok(())
}

/// `UNIQUE (database_id, name)` is the idempotency guard for automatic backups.
fn create_backup_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS backup (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            creator_id       INTEGER NOT NULL,
            created_ts       INTEGER NOT NULL,
            updater_id       INTEGER NOT NULL,
            updated_ts       INTEGER NOT NULL,
            database_id      INTEGER NOT NULL REFERENCES db (id),
            name             TEXT    NOT NULL,
            status           TEXT    NOT NULL,
            type             TEXT    NOT NULL,
            storage_backend  TEXT    NOT NULL,
            path             TEXT    NOT NULL,
            comment          TEXT    NOT NULL DEFAULT '',
            UNIQUE (database_id, name)
        );
        CREATE INDEX IF NOT EXISTS idx_backup_status
            ON backup (status, created_ts);",
    )?;
    Ok(())
}

fn create_pipeline_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS pipeline (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            creator_id  INTEGER NOT NULL,
            created_ts  INTEGER NOT NULL,
            updater_id  INTEGER NOT NULL,
            updated_ts  INTEGER NOT NULL,
            name        TEXT    NOT NULL
        );
        CREATE TABLE IF NOT EXISTS stage (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            creator_id      INTEGER NOT NULL,
            created_ts      INTEGER NOT NULL,
            updater_id      INTEGER NOT NULL,
            updated_ts      INTEGER NOT NULL,
            pipeline_id     INTEGER NOT NULL REFERENCES pipeline (id),
            environment_id  INTEGER NOT NULL REFERENCES environment (id),
            name            TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_stage_pipeline ON stage (pipeline_id);
        CREATE TABLE IF NOT EXISTS task (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            creator_id   INTEGER NOT NULL,
            created_ts   INTEGER NOT NULL,
            updater_id   INTEGER NOT NULL,
            updated_ts   INTEGER NOT NULL,
            pipeline_id  INTEGER NOT NULL REFERENCES pipeline (id),
            stage_id     INTEGER NOT NULL REFERENCES stage (id),
            instance_id  INTEGER NOT NULL REFERENCES instance (id),
            database_id  INTEGER REFERENCES db (id),
            name         TEXT    NOT NULL,
            status       TEXT    NOT NULL,
            type         TEXT    NOT NULL,
            payload      TEXT    NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_task_pipeline ON task (pipeline_id);
        CREATE INDEX IF NOT EXISTS idx_task_status ON task (status);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_task_backup ON task (
            (CASE WHEN json_valid(payload) THEN json_extract(payload, '$.backupId') END)
        ) WHERE type = 'bb.task.database.backup';",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('environment', 'instance', 'db', 'backup_setting',
                              'backup', 'pipeline', 'stage', 'task')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 8);
    }
}
