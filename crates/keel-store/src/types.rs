use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Implements `Display`, `FromStr` and the rusqlite conversions for a
/// string-tagged enum, so the same spelling is used in logs, JSON and rows.
macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $tag:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $tag,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($tag => Ok($ty::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($ty))),
                }
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

/// Lifecycle of a backup record. Transitions past `PendingCreate` are
/// driven by the backup executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    PendingCreate,
    Done,
    Failed,
}

string_enum!(BackupStatus {
    PendingCreate => "PENDING_CREATE",
    Done => "DONE",
    Failed => "FAILED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupType {
    Automatic,
    Manual,
}

string_enum!(BackupType {
    Automatic => "AUTOMATIC",
    Manual => "MANUAL",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageBackend {
    Local,
}

string_enum!(StorageBackend {
    Local => "LOCAL",
});

/// Execution state of a task.
///
/// ```text
/// PENDING ──► RUNNING ──► DONE
///                 │
///                 └─────► FAILED ──► PENDING (retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

string_enum!(TaskStatus {
    Pending => "PENDING",
    Running => "RUNNING",
    Done => "DONE",
    Failed => "FAILED",
});

impl TaskStatus {
    /// Whether the executor may move a task from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Running, Done) | (Running, Failed) | (Failed, Pending)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "bb.task.general")]
    General,
    #[serde(rename = "bb.task.database.backup")]
    DatabaseBackup,
}

string_enum!(TaskType {
    General => "bb.task.general",
    DatabaseBackup => "bb.task.database.backup",
});

/// Payload carried by a `bb.task.database.backup` task. It is the only link
/// between the generic pipeline rows and the backup they execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDatabaseBackupPayload {
    #[serde(rename = "backupId")]
    pub backup_id: i64,
}

// --- topology ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub environment_id: i64,
    pub name: String,
    pub host: String,
    pub environment: Environment,
}

/// A database together with the instance hosting it and that instance's
/// environment, as composed by [`crate::EntityStore::compose_database`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub id: i64,
    pub instance_id: i64,
    pub name: String,
    pub instance: Instance,
}

#[derive(Debug, Clone)]
pub struct EnvironmentCreate {
    pub creator_id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct InstanceCreate {
    pub creator_id: i64,
    pub environment_id: i64,
    pub name: String,
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseCreate {
    pub creator_id: i64,
    pub instance_id: i64,
    pub name: String,
}

// --- backup settings ---------------------------------------------------------

/// Recurring weekly backup schedule attached to one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSetting {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub updater_id: i64,
    pub updated_ts: i64,
    pub database_id: i64,
    pub enabled: bool,
    /// Hour of day, UTC, 0..=23.
    pub hour: u32,
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: u32,
    /// Destination path with a `{{TIME}}` placeholder, if customised.
    pub path_template: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BackupSettingUpsert {
    pub updater_id: i64,
    pub database_id: i64,
    pub enabled: bool,
    pub hour: u32,
    pub day_of_week: u32,
    pub path_template: Option<String>,
}

/// Selects the enabled settings due at one (hour, weekday) slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupSettingMatch {
    pub hour: u32,
    pub day_of_week: u32,
}

// --- backups -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub updater_id: i64,
    pub updated_ts: i64,
    pub database_id: i64,
    /// Unique per database.
    pub name: String,
    pub status: BackupStatus,
    pub backup_type: BackupType,
    pub storage_backend: StorageBackend,
    pub path: String,
    pub comment: String,
}

#[derive(Debug, Clone)]
pub struct BackupCreate {
    pub creator_id: i64,
    pub database_id: i64,
    pub name: String,
    pub status: BackupStatus,
    pub backup_type: BackupType,
    pub storage_backend: StorageBackend,
    pub path: String,
    pub comment: String,
}

#[derive(Debug, Clone, Default)]
pub struct BackupFind {
    pub id: Option<i64>,
    pub database_id: Option<i64>,
    pub name: Option<String>,
    pub status: Option<BackupStatus>,
    pub backup_type: Option<BackupType>,
    /// Only rows with `created_ts` strictly below this Unix timestamp.
    pub created_before: Option<i64>,
    /// Only rows with `updated_ts` strictly below this Unix timestamp.
    pub updated_before: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BackupPatch {
    pub id: i64,
    pub updater_id: i64,
    pub status: Option<BackupStatus>,
    pub comment: Option<String>,
}

/// Take ownership of a `PENDING_CREATE` backup for repair. The claim only
/// lands while `updated_ts` still equals `expected_updated_ts`.
#[derive(Debug, Clone)]
pub struct BackupClaim {
    pub id: i64,
    pub updater_id: i64,
    pub expected_updated_ts: i64,
}

// --- pipeline / stage / task -------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub updater_id: i64,
    pub updated_ts: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct PipelineCreate {
    pub creator_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineFind {
    pub id: Option<i64>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub updater_id: i64,
    pub updated_ts: i64,
    pub pipeline_id: i64,
    pub environment_id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct StageCreate {
    pub creator_id: i64,
    pub pipeline_id: i64,
    pub environment_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct StageFind {
    pub id: Option<i64>,
    pub pipeline_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub updater_id: i64,
    pub updated_ts: i64,
    pub pipeline_id: i64,
    pub stage_id: i64,
    pub instance_id: i64,
    pub database_id: Option<i64>,
    pub name: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
    /// Opaque JSON, interpreted according to `task_type`.
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct TaskCreate {
    pub creator_id: i64,
    pub pipeline_id: i64,
    pub stage_id: i64,
    pub instance_id: i64,
    pub database_id: Option<i64>,
    pub name: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
    pub payload: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFind {
    pub id: Option<i64>,
    pub pipeline_id: Option<i64>,
    pub stage_id: Option<i64>,
    pub database_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    /// Matches the `backupId` field of a database-backup payload.
    pub backup_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TaskPatch {
    pub id: i64,
    pub updater_id: i64,
    pub status: Option<TaskStatus>,
}
