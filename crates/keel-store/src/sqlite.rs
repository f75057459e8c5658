use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use tracing::{debug, instrument, warn};

use crate::backup;
use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::pipeline;
use crate::store::EntityStore;
use crate::topology;
use crate::types::*;

/// SQLite-backed [`EntityStore`].
///
/// Wraps a single connection in a `Mutex`; every operation runs in its own
/// transaction while holding the lock, so concurrent callers are serialised
/// and the `UNIQUE` constraints decide races deterministically.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) a database file with WAL and foreign keys enabled.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::new(conn)
    }

    // --- seeding / configuration surface ----------------------------------

    pub fn create_environment(&self, create: &EnvironmentCreate) -> Result<Environment> {
        self.write(|tx| topology::create_environment(tx, create))
    }

    pub fn create_instance(&self, create: &InstanceCreate) -> Result<Instance> {
        self.write(|tx| topology::create_instance(tx, create))
    }

    pub fn create_database(&self, create: &DatabaseCreate) -> Result<Database> {
        self.write(|tx| topology::create_database(tx, create))
    }

    #[instrument(skip(self, upsert), fields(database_id = upsert.database_id))]
    pub fn upsert_backup_setting(&self, upsert: &BackupSettingUpsert) -> Result<BackupSetting> {
        let setting = self.write(|tx| backup::upsert_backup_setting(tx, upsert))?;
        debug!(
            hour = setting.hour,
            day_of_week = setting.day_of_week,
            enabled = setting.enabled,
            "backup setting saved"
        );
        Ok(setting)
    }

    // --- single-row lookups ----------------------------------------------

    /// Exactly one backup matching `find`; `NotFound` when none does.
    pub fn find_backup(&self, find: &BackupFind) -> Result<Backup> {
        let list = self.read(|conn| backup::find_backups(conn, find))?;
        first_of("backup", || format!("{find:?}"), list)
    }

    pub fn find_pipeline(&self, find: &PipelineFind) -> Result<Pipeline> {
        let list = self.find_pipelines(find)?;
        first_of("pipeline", || format!("{find:?}"), list)
    }

    pub fn find_task(&self, find: &TaskFind) -> Result<Task> {
        let list = self.read(|conn| pipeline::find_tasks(conn, find))?;
        first_of("task", || format!("{find:?}"), list)
    }

    /// Status changes are checked against the task lifecycle.
    #[instrument(skip(self, patch), fields(task_id = patch.id))]
    pub fn patch_task(&self, patch: &TaskPatch) -> Result<Task> {
        self.write(|tx| pipeline::patch_task(tx, patch))
    }

    // --- private helpers -----------------------------------------------------

    /// A poisoned lock only means another caller panicked mid-operation; the
    /// aborted transaction was rolled back on drop, so the connection is usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn();
        f(&conn)
    }

    fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

impl EntityStore for SqliteStore {
    fn find_backup_settings(&self, matching: &BackupSettingMatch) -> Result<Vec<BackupSetting>> {
        self.read(|conn| backup::find_backup_settings(conn, matching))
    }

    fn compose_database(&self, database_id: i64) -> Result<Database> {
        self.read(|conn| topology::compose_database(conn, database_id))
    }

    fn create_backup(&self, create: &BackupCreate) -> Result<Backup> {
        self.write(|tx| backup::create_backup(tx, create))
    }

    fn find_backups(&self, find: &BackupFind) -> Result<Vec<Backup>> {
        self.read(|conn| backup::find_backups(conn, find))
    }

    fn patch_backup(&self, patch: &BackupPatch) -> Result<Backup> {
        self.write(|tx| backup::patch_backup(tx, patch))
    }

    fn claim_backup(&self, claim: &BackupClaim) -> Result<bool> {
        self.write(|tx| backup::claim_backup(tx, claim))
    }

    fn create_pipeline(&self, create: &PipelineCreate) -> Result<Pipeline> {
        self.write(|tx| pipeline::create_pipeline(tx, create))
    }

    fn find_pipelines(&self, find: &PipelineFind) -> Result<Vec<Pipeline>> {
        self.read(|conn| pipeline::find_pipelines(conn, find))
    }

    fn create_stage(&self, create: &StageCreate) -> Result<Stage> {
        self.write(|tx| pipeline::create_stage(tx, create))
    }

    fn find_stages(&self, find: &StageFind) -> Result<Vec<Stage>> {
        self.read(|conn| pipeline::find_stages(conn, find))
    }

    fn create_task(&self, create: &TaskCreate) -> Result<Task> {
        self.write(|tx| pipeline::create_task(tx, create))
    }

    fn find_tasks(&self, find: &TaskFind) -> Result<Vec<Task>> {
        self.read(|conn| pipeline::find_tasks(conn, find))
    }
}

/// `findOne` semantics: the first row, `NotFound` when empty, and a warning
/// when the filter was not selective enough.
fn first_of<T>(entity: &'static str, detail: impl FnOnce() -> String, list: Vec<T>) -> Result<T> {
    let count = list.len();
    let mut rows = list.into_iter();
    match rows.next() {
        None => Err(StoreError::not_found(entity, detail())),
        Some(first) => {
            if count > 1 {
                warn!(entity, count, "found multiple rows, expected 1");
            }
            Ok(first)
        }
    }
}
