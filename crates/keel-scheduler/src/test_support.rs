//! Fixtures shared by the unit tests of this crate.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use keel_store::*;

use crate::resolver::DueBackup;

/// An in-memory store with one `prod` environment and one instance.
pub(crate) struct Seeded {
    pub store: Arc<SqliteStore>,
    pub environment: Environment,
    pub instance: Instance,
}

impl Seeded {
    pub fn new() -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let environment = store
            .create_environment(&EnvironmentCreate {
                creator_id: 1,
                name: "prod".into(),
            })
            .unwrap();
        let instance = store
            .create_instance(&InstanceCreate {
                creator_id: 1,
                environment_id: environment.id,
                name: "pg-main".into(),
                host: "10.0.0.1".into(),
            })
            .unwrap();
        Self {
            store,
            environment,
            instance,
        }
    }

    pub fn add_database(&self, name: &str) -> Database {
        self.store
            .create_database(&DatabaseCreate {
                creator_id: 1,
                instance_id: self.instance.id,
                name: name.into(),
            })
            .unwrap()
    }

    pub fn schedule(
        &self,
        database_id: i64,
        hour: u32,
        day_of_week: u32,
        path_template: Option<&str>,
    ) -> BackupSetting {
        self.store
            .upsert_backup_setting(&BackupSettingUpsert {
                updater_id: 1,
                database_id,
                enabled: true,
                hour,
                day_of_week,
                path_template: path_template.map(String::from),
            })
            .unwrap()
    }

    /// (backups, pipelines, stages, tasks)
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.store.find_backups(&BackupFind::default()).unwrap().len(),
            self.store
                .find_pipelines(&PipelineFind::default())
                .unwrap()
                .len(),
            self.store.find_stages(&StageFind::default()).unwrap().len(),
            self.store.find_tasks(&TaskFind::default()).unwrap().len(),
        )
    }
}

pub(crate) fn due_for(seeded: &Seeded, database_id: i64) -> DueBackup {
    let database = seeded.store.compose_database(database_id).unwrap();
    let setting = seeded
        .store
        .find_backup_settings(&BackupSettingMatch {
            hour: 3,
            day_of_week: 2,
        })
        .unwrap()
        .into_iter()
        .find(|s| s.database_id == database_id)
        .unwrap();
    DueBackup { setting, database }
}

/// Failures to inject into a [`FaultyStore`].
#[derive(Default)]
pub(crate) struct Faults {
    /// `compose_database` reports these databases as gone.
    pub missing_databases: HashSet<i64>,
    /// `create_backup` fails with an internal error for these databases.
    pub backup_fails_for: HashSet<i64>,
    /// `create_backup` panics for these databases.
    pub backup_panics_for: HashSet<i64>,
    /// `create_stage` fails with an internal error.
    pub fail_stage: AtomicBool,
    /// `find_backup_settings` fails with an internal error.
    pub fail_settings_query: AtomicBool,
    /// Number of upcoming `find_backup_settings` calls that panic.
    pub settings_panics: AtomicUsize,
    /// `create_backup` blocks this long before touching the store.
    pub backup_delay: Option<Duration>,
    /// Every `find_tasks` call waits here before touching the store.
    pub tasks_barrier: Option<Barrier>,
    /// `find_tasks` always comes back empty.
    pub hide_tasks: AtomicBool,
}

/// Delegates to a real store, injecting the configured [`Faults`].
pub(crate) struct FaultyStore {
    inner: Arc<SqliteStore>,
    pub faults: Faults,
    pub settings_calls: AtomicUsize,
    in_flight: AtomicUsize,
    /// Highest number of `create_backup` calls seen running at once.
    pub max_in_flight: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<SqliteStore>, faults: Faults) -> Self {
        Self {
            inner,
            faults,
            settings_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

fn internal() -> StoreError {
    StoreError::Database(rusqlite::Error::InvalidQuery)
}

impl EntityStore for FaultyStore {
    fn find_backup_settings(&self, matching: &BackupSettingMatch) -> Result<Vec<BackupSetting>> {
        self.settings_calls.fetch_add(1, Ordering::SeqCst);
        let panics = &self.faults.settings_panics;
        if panics
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("injected panic in find_backup_settings");
        }
        if self.faults.fail_settings_query.load(Ordering::SeqCst) {
            return Err(internal());
        }
        self.inner.find_backup_settings(matching)
    }

    fn compose_database(&self, database_id: i64) -> Result<Database> {
        if self.faults.missing_databases.contains(&database_id) {
            return Err(StoreError::NotFound {
                entity: "database",
                detail: format!("id {database_id}"),
            });
        }
        self.inner.compose_database(database_id)
    }

    fn create_backup(&self, create: &BackupCreate) -> Result<Backup> {
        if self.faults.backup_panics_for.contains(&create.database_id) {
            panic!("injected panic in create_backup");
        }
        if self.faults.backup_fails_for.contains(&create.database_id) {
            return Err(internal());
        }
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.faults.backup_delay {
            std::thread::sleep(delay);
        }
        let out = self.inner.create_backup(create);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }

    fn find_backups(&self, find: &BackupFind) -> Result<Vec<Backup>> {
        self.inner.find_backups(find)
    }

    fn patch_backup(&self, patch: &BackupPatch) -> Result<Backup> {
        self.inner.patch_backup(patch)
    }

    fn claim_backup(&self, claim: &BackupClaim) -> Result<bool> {
        self.inner.claim_backup(claim)
    }

    fn create_pipeline(&self, create: &PipelineCreate) -> Result<Pipeline> {
        self.inner.create_pipeline(create)
    }

    fn find_pipelines(&self, find: &PipelineFind) -> Result<Vec<Pipeline>> {
        self.inner.find_pipelines(find)
    }

    fn find_stages(&self, find: &StageFind) -> Result<Vec<Stage>> {
        self.inner.find_stages(find)
    }

    fn create_stage(&self, create: &StageCreate) -> Result<Stage> {
        if self.faults.fail_stage.load(Ordering::SeqCst) {
            return Err(internal());
        }
        self.inner.create_stage(create)
    }

    fn create_task(&self, create: &TaskCreate) -> Result<Task> {
        self.inner.create_task(create)
    }

    fn find_tasks(&self, find: &TaskFind) -> Result<Vec<Task>> {
        if let Some(barrier) = &self.faults.tasks_barrier {
            barrier.wait();
        }
        if self.faults.hide_tasks.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.find_tasks(find)
    }
}
