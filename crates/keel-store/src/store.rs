use crate::error::Result;
use crate::types::{
    Backup, BackupClaim, BackupCreate, BackupFind, BackupPatch, BackupSetting, BackupSettingMatch,
    Database, Pipeline, PipelineCreate, PipelineFind, Stage, StageCreate, StageFind, Task,
    TaskCreate, TaskFind,
};

/// The store operations the backup runner depends on.
///
/// Implementations must be `Send + Sync`: one instance is shared by the
/// runner loop and every concurrently running scheduling attempt. Each call
/// is an independent transaction; nothing spans two calls.
pub trait EntityStore: Send + Sync {
    /// Enabled backup settings due at the given (hour, weekday) slot.
    fn find_backup_settings(&self, matching: &BackupSettingMatch) -> Result<Vec<BackupSetting>>;

    /// Database with its instance and environment, or `NotFound`.
    fn compose_database(&self, database_id: i64) -> Result<Database>;

    /// Fails with `AlreadyExists` when `(database_id, name)` is taken.
    fn create_backup(&self, create: &BackupCreate) -> Result<Backup>;

    fn find_backups(&self, find: &BackupFind) -> Result<Vec<Backup>>;

    fn patch_backup(&self, patch: &BackupPatch) -> Result<Backup>;

    /// `true` when this caller won the backup; see [`BackupClaim`].
    fn claim_backup(&self, claim: &BackupClaim) -> Result<bool>;

    fn create_pipeline(&self, create: &PipelineCreate) -> Result<Pipeline>;

    fn find_pipelines(&self, find: &PipelineFind) -> Result<Vec<Pipeline>>;

    fn create_stage(&self, create: &StageCreate) -> Result<Stage>;

    fn find_stages(&self, find: &StageFind) -> Result<Vec<Stage>>;

    /// Fails with `AlreadyExists` when the backup in a backup task's payload
    /// already has a task.
    fn create_task(&self, create: &TaskCreate) -> Result<Task>;

    fn find_tasks(&self, find: &TaskFind) -> Result<Vec<Task>>;
}
