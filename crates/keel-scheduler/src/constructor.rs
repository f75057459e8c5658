use keel_core::types::{PATH_TEMPLATE_TIME, SYSTEM_BOT_ID};
use keel_store::{
    Backup, BackupCreate, BackupSetting, BackupStatus, BackupType, Database, EntityStore, Pipeline,
    PipelineCreate, PipelineFind, Stage, StageCreate, StageFind, StorageBackend, Task, TaskCreate,
    TaskDatabaseBackupPayload, TaskStatus, TaskType,
};
use tracing::{debug, instrument};

use crate::error::{Result, SchedulerError};
use crate::resolver::DueBackup;

/// Result of one scheduling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The backup and its whole pipeline chain were created.
    Created(PipelineChain),
    /// A backup with this key already exists; nothing was created.
    AlreadyScheduled,
}

/// Ids of the rows created for one backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineChain {
    pub backup_id: i64,
    pub pipeline_id: i64,
    pub stage_id: i64,
    pub task_id: i64,
}

/// Destination path for a backup taken in the bucket starting at `bucket_epoch`.
///
/// A non-empty template has every `{{TIME}}` replaced by the epoch and is
/// otherwise left untouched; without one the path is
/// `{environment}-{database}-{epoch}.sql`.
pub fn backup_path(setting: &BackupSetting, database: &Database, bucket_epoch: i64) -> String {
    match setting.path_template.as_deref() {
        Some(template) if !template.is_empty() => {
            template.replace(PATH_TEMPLATE_TIME, &bucket_epoch.to_string())
        }
        _ => format!(
            "{}-{}-{}.sql",
            database.instance.environment.name, database.name, bucket_epoch
        ),
    }
}

/// Create the automatic backup for `due` and the pipeline that executes it.
///
/// Each step is its own store transaction. An `AlreadyExists` on the backup
/// insert means another attempt owns this bucket and ends the attempt
/// successfully before any pipeline row is written. A failure after the
/// backup insert leaves the backup in `PENDING_CREATE` for the reconciler.
#[instrument(
    skip(store, due),
    fields(
        backup_setting_id = due.setting.id,
        database_id = due.database.id,
    )
)]
pub fn schedule_backup_task(
    store: &dyn EntityStore,
    due: &DueBackup,
    backup_key: &str,
    bucket_epoch: i64,
) -> Result<ScheduleOutcome> {
    let database = &due.database;
    let create = BackupCreate {
        creator_id: SYSTEM_BOT_ID,
        database_id: database.id,
        name: backup_key.to_string(),
        status: BackupStatus::PendingCreate,
        backup_type: BackupType::Automatic,
        storage_backend: StorageBackend::Local,
        path: backup_path(&due.setting, database, bucket_epoch),
        comment: format!(
            "Automatic backup for database {} at {}",
            database.name, bucket_epoch
        ),
    };

    let backup = match store.create_backup(&create) {
        Ok(backup) => backup,
        Err(e) if e.is_already_exists() => {
            debug!("automatic backup already exists");
            return Ok(ScheduleOutcome::AlreadyScheduled);
        }
        Err(e) => return Err(SchedulerError::create("backup")(e)),
    };

    let chain = create_pipeline_chain(store, database, &backup)?;
    Ok(ScheduleOutcome::Created(chain))
}

/// Pipeline, stage and task for an existing backup, all named after it.
pub(crate) fn create_pipeline_chain(
    store: &dyn EntityStore,
    database: &Database,
    backup: &Backup,
) -> Result<PipelineChain> {
    let pipeline = new_pipeline(store, backup)?;
    let stage = new_stage(store, database, backup, pipeline.id)?;
    let task = new_backup_task(store, database, backup, &stage)?;
    Ok(PipelineChain {
        backup_id: backup.id,
        pipeline_id: pipeline.id,
        stage_id: stage.id,
        task_id: task.id,
    })
}

/// Like [`create_pipeline_chain`], but picks up the pipeline and stage an
/// interrupted attempt already wrote and only creates what is missing.
pub(crate) fn complete_pipeline_chain(
    store: &dyn EntityStore,
    database: &Database,
    backup: &Backup,
) -> Result<PipelineChain> {
    let existing = store
        .find_pipelines(&PipelineFind {
            name: Some(backup.name.clone()),
            ..Default::default()
        })
        .map_err(SchedulerError::create("pipeline"))?;
    let pipeline = match existing.into_iter().next() {
        Some(pipeline) => {
            debug!(pipeline_id = pipeline.id, "reusing pipeline");
            pipeline
        }
        None => new_pipeline(store, backup)?,
    };

    let existing = store
        .find_stages(&StageFind {
            pipeline_id: Some(pipeline.id),
            ..Default::default()
        })
        .map_err(SchedulerError::create("stage"))?;
    let stage = match existing.into_iter().next() {
        Some(stage) => {
            debug!(stage_id = stage.id, "reusing stage");
            stage
        }
        None => new_stage(store, database, backup, pipeline.id)?,
    };

    let task = new_backup_task(store, database, backup, &stage)?;
    Ok(PipelineChain {
        backup_id: backup.id,
        pipeline_id: pipeline.id,
        stage_id: stage.id,
        task_id: task.id,
    })
}

fn new_pipeline(store: &dyn EntityStore, backup: &Backup) -> Result<Pipeline> {
    store
        .create_pipeline(&PipelineCreate {
            creator_id: SYSTEM_BOT_ID,
            name: backup.name.clone(),
        })
        .map_err(SchedulerError::create("pipeline"))
}

fn new_stage(
    store: &dyn EntityStore,
    database: &Database,
    backup: &Backup,
    pipeline_id: i64,
) -> Result<Stage> {
    store
        .create_stage(&StageCreate {
            creator_id: SYSTEM_BOT_ID,
            pipeline_id,
            environment_id: database.instance.environment_id,
            name: backup.name.clone(),
        })
        .map_err(SchedulerError::create("stage"))
}

/// `AlreadyExists` means the backup already has its task.
fn new_backup_task(
    store: &dyn EntityStore,
    database: &Database,
    backup: &Backup,
    stage: &Stage,
) -> Result<Task> {
    let payload = serde_json::to_string(&TaskDatabaseBackupPayload {
        backup_id: backup.id,
    })?;
    store
        .create_task(&TaskCreate {
            creator_id: SYSTEM_BOT_ID,
            pipeline_id: stage.pipeline_id,
            stage_id: stage.id,
            instance_id: database.instance_id,
            database_id: Some(database.id),
            name: backup.name.clone(),
            status: TaskStatus::Pending,
            task_type: TaskType::DatabaseBackup,
            payload,
        })
        .map_err(SchedulerError::create("task"))
}
