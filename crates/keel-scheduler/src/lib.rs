//! `keel-scheduler`: the automatic backup scheduler.
//!
//! Once per tick the [`BackupRunner`] truncates the clock to the UTC hour,
//! asks the store which backup settings are due in that [`TimeBucket`], and
//! launches one scheduling attempt per match. An attempt writes, in this
//! order and each in its own transaction:
//!
//! 1. a `Backup` named `auto-backup-{bucket_epoch}-{database_id}`,
//! 2. a `Pipeline`, 3. a `Stage`, 4. a `Task` of type
//!    `bb.task.database.backup` whose payload points at the backup.
//!
//! The backup name is the idempotency key: the store rejects a second row with
//! the same `(database_id, name)`, and the attempt that loses treats that as
//! success. Chains interrupted after step 1 are finished (or failed) later by
//! [`reconcile_orphans`].

pub mod bucket;
pub mod constructor;
pub mod engine;
pub mod error;
pub mod reconcile;
pub mod resolver;

#[cfg(test)]
mod test_support;

pub use bucket::{backup_key, TimeBucket};
pub use constructor::{backup_path, schedule_backup_task, PipelineChain, ScheduleOutcome};
pub use engine::{BackupRunner, RunnerConfig, RunnerHandle, TickReport};
pub use error::{Result, SchedulerError};
pub use reconcile::{reconcile_orphans, ReconcileReport};
pub use resolver::{resolve_due, DueBackup, Resolution};
