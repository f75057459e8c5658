//! Backup settings and backup records.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::{map_insert_error, Result, StoreError};
use crate::filter::Filter;
use crate::types::{
    Backup, BackupClaim, BackupCreate, BackupFind, BackupPatch, BackupSetting, BackupSettingMatch,
    BackupSettingUpsert,
};

const BACKUP_SETTING_COLUMNS: &str = "id, creator_id, created_ts, updater_id, updated_ts,
     database_id, enabled, hour, day_of_week, path_template";

const BACKUP_COLUMNS: &str = "id, creator_id, created_ts, updater_id, updated_ts,
     database_id, name, status, type, storage_backend, path, comment";

/// Create or replace the schedule for one database.
pub fn upsert_backup_setting(
    conn: &Connection,
    upsert: &BackupSettingUpsert,
) -> Result<BackupSetting> {
    if upsert.hour > 23 {
        return Err(StoreError::InvalidArgument(format!(
            "hour must be within 0..=23, got {}",
            upsert.hour
        )));
    }
    if upsert.day_of_week > 6 {
        return Err(StoreError::InvalidArgument(format!(
            "day_of_week must be within 0..=6, got {}",
            upsert.day_of_week
        )));
    }

    let now = Utc::now().timestamp();
    let sql = format!(
        "INSERT INTO backup_setting
            (creator_id, created_ts, updater_id, updated_ts,
             database_id, enabled, hour, day_of_week, path_template)
         VALUES (?1, ?2, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (database_id) DO UPDATE SET
            updater_id    = excluded.updater_id,
            updated_ts    = excluded.updated_ts,
            enabled       = excluded.enabled,
            hour          = excluded.hour,
            day_of_week   = excluded.day_of_week,
            path_template = excluded.path_template
         RETURNING {BACKUP_SETTING_COLUMNS}"
    );
    let setting = conn.query_row(
        &sql,
        params![
            upsert.updater_id,
            now,
            upsert.database_id,
            upsert.enabled,
            upsert.hour,
            upsert.day_of_week,
            upsert.path_template.as_deref().unwrap_or_default(),
        ],
        row_to_backup_setting,
    )?;
    Ok(setting)
}

/// Enabled settings scheduled for exactly this (hour, weekday) slot.
pub fn find_backup_settings(
    conn: &Connection,
    matching: &BackupSettingMatch,
) -> Result<Vec<BackupSetting>> {
    let sql = format!(
        "SELECT {BACKUP_SETTING_COLUMNS}
         FROM backup_setting
         WHERE enabled = 1 AND hour = ?1 AND day_of_week = ?2
         ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![matching.hour, matching.day_of_week],
        row_to_backup_setting,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Insert a backup. A second backup with the same `(database_id, name)`
/// fails with `AlreadyExists`.
pub fn create_backup(conn: &Connection, create: &BackupCreate) -> Result<Backup> {
    let now = Utc::now().timestamp();
    let sql = format!(
        "INSERT INTO backup
            (creator_id, created_ts, updater_id, updated_ts, database_id,
             name, status, type, storage_backend, path, comment)
         VALUES (?1, ?2, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         RETURNING {BACKUP_COLUMNS}"
    );
    conn.query_row(
        &sql,
        params![
            create.creator_id,
            now,
            create.database_id,
            create.name,
            create.status,
            create.backup_type,
            create.storage_backend,
            create.path,
            create.comment,
        ],
        row_to_backup,
    )
    .map_err(|e| {
        map_insert_error(e, "backup", || {
            format!("{} for database {}", create.name, create.database_id)
        })
    })
}

pub fn find_backups(conn: &Connection, find: &BackupFind) -> Result<Vec<Backup>> {
    let mut filter = Filter::new();
    filter.eq("id = ?", find.id);
    filter.eq("database_id = ?", find.database_id);
    filter.eq("name = ?", find.name.clone());
    filter.eq("status = ?", find.status);
    filter.eq("type = ?", find.backup_type);
    filter.eq("created_ts < ?", find.created_before);
    filter.eq("updated_ts < ?", find.updated_before);

    let sql = format!(
        "SELECT {BACKUP_COLUMNS} FROM backup WHERE {} ORDER BY id",
        filter.sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(filter.params(), row_to_backup)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Apply the present fields of `patch`. Returns the row after the update.
pub fn patch_backup(conn: &Connection, patch: &BackupPatch) -> Result<Backup> {
    let now = Utc::now().timestamp();
    let sql = format!(
        "UPDATE backup SET
            updater_id = ?1,
            updated_ts = ?2,
            status     = COALESCE(?3, status),
            comment    = COALESCE(?4, comment)
         WHERE id = ?5
         RETURNING {BACKUP_COLUMNS}"
    );
    match conn.query_row(
        &sql,
        params![patch.updater_id, now, patch.status, patch.comment, patch.id],
        row_to_backup,
    ) {
        Ok(backup) => Ok(backup),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(StoreError::not_found("backup", format!("id {}", patch.id)))
        }
        Err(e) => Err(StoreError::Database(e)),
    }
}

/// Compare-and-set on `updated_ts`. Returns `false` when the backup left
/// `PENDING_CREATE` or someone else touched it since it was read.
///
/// A successful claim always advances `updated_ts`, so two claimants holding
/// the same snapshot cannot both win.
pub fn claim_backup(conn: &Connection, claim: &BackupClaim) -> Result<bool> {
    let now = Utc::now().timestamp();
    let changed = conn.execute(
        "UPDATE backup SET
            updater_id = ?1,
            updated_ts = MAX(?2, updated_ts + 1)
         WHERE id = ?3 AND status = 'PENDING_CREATE' AND updated_ts = ?4",
        params![claim.updater_id, now, claim.id, claim.expected_updated_ts],
    )?;
    Ok(changed == 1)
}

fn row_to_backup_setting(row: &rusqlite::Row<'_>) -> rusqlite::Result<BackupSetting> {
    let template: String = row.get(9)?;
    Ok(BackupSetting {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        updater_id: row.get(3)?,
        updated_ts: row.get(4)?,
        database_id: row.get(5)?,
        enabled: row.get(6)?,
        hour: row.get(7)?,
        day_of_week: row.get(8)?,
        path_template: (!template.is_empty()).then_some(template),
    })
}

fn row_to_backup(row: &rusqlite::Row<'_>) -> rusqlite::Result<Backup> {
    Ok(Backup {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        updater_id: row.get(3)?,
        updated_ts: row.get(4)?,
        database_id: row.get(5)?,
        name: row.get(6)?,
        status: row.get(7)?,
        backup_type: row.get(8)?,
        storage_backend: row.get(9)?,
        path: row.get(10)?,
        comment: row.get(11)?,
    })
}
