use chrono::{DateTime, Utc};
use keel_core::types::SYSTEM_BOT_ID;
use keel_store::{
    Backup, BackupClaim, BackupFind, BackupPatch, BackupStatus, BackupType, EntityStore, TaskFind,
    TaskType,
};
use tracing::{debug, info, warn};

use crate::constructor::complete_pipeline_chain;
use crate::error::{Result, SchedulerError};

/// What one reconciliation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Backups whose pipeline chain was finished by this pass.
    pub completed: Vec<i64>,
    /// Backups marked `FAILED` because their database no longer resolves.
    pub failed: Vec<i64>,
}

/// Finish the chain for automatic backups left in `PENDING_CREATE` without a
/// task, for example after a crash between the backup insert and the task
/// insert.
///
/// Only backups created and last touched more than `grace` before `now` are
/// considered, so an attempt still in flight is never raced. `now` must come
/// from the wall clock the store stamps rows with.
///
/// Each backup is claimed before it is repaired. The claim bumps `updated_ts`,
/// which hides the backup from other passes for another `grace`, and of two
/// passes holding the same snapshot only one claim lands. The store's one
/// task per backup rule backs this up if a claim ever goes stale mid-repair.
/// A pipeline or stage the interrupted attempt already wrote is reused.
///
/// A backup whose database can no longer be composed is marked `FAILED`.
/// Per-backup errors are logged and the pass moves on; only the initial
/// listing can fail the whole pass.
pub fn reconcile_orphans(
    store: &dyn EntityStore,
    now: DateTime<Utc>,
    grace: std::time::Duration,
) -> Result<ReconcileReport> {
    let grace = i64::try_from(grace.as_secs()).unwrap_or(i64::MAX);
    let cutoff = now.timestamp().saturating_sub(grace);
    let pending = store.find_backups(&BackupFind {
        status: Some(BackupStatus::PendingCreate),
        backup_type: Some(BackupType::Automatic),
        created_before: Some(cutoff),
        updated_before: Some(cutoff),
        ..Default::default()
    })?;

    let mut report = ReconcileReport::default();
    for backup in pending {
        match reconcile_one(store, &backup) {
            Ok(Some(Repair::Completed)) => report.completed.push(backup.id),
            Ok(Some(Repair::Failed)) => report.failed.push(backup.id),
            Ok(None) => {}
            Err(e) => warn!(
                backup_id = backup.id,
                database_id = backup.database_id,
                error = %e,
                "failed to reconcile orphaned backup"
            ),
        }
    }

    if !report.completed.is_empty() || !report.failed.is_empty() {
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            "reconciled orphaned automatic backups"
        );
    }
    Ok(report)
}

enum Repair {
    Completed,
    Failed,
}

fn reconcile_one(store: &dyn EntityStore, backup: &Backup) -> Result<Option<Repair>> {
    let tasks = store.find_tasks(&TaskFind {
        task_type: Some(TaskType::DatabaseBackup),
        backup_id: Some(backup.id),
        ..Default::default()
    })?;
    if !tasks.is_empty() {
        return Ok(None);
    }

    let claimed = store.claim_backup(&BackupClaim {
        id: backup.id,
        updater_id: SYSTEM_BOT_ID,
        expected_updated_ts: backup.updated_ts,
    })?;
    if !claimed {
        debug!(backup_id = backup.id, "orphaned backup claimed elsewhere");
        return Ok(None);
    }

    match store.compose_database(backup.database_id) {
        Ok(database) => match complete_pipeline_chain(store, &database, backup) {
            Ok(_) => Ok(Some(Repair::Completed)),
            Err(SchedulerError::Create {
                step: "task",
                ref source,
            }) if source.is_already_exists() => {
                debug!(backup_id = backup.id, "orphaned backup already has its task");
                Ok(None)
            }
            Err(e) => Err(e),
        },
        Err(e) if e.is_not_found() => {
            store.patch_backup(&BackupPatch {
                id: backup.id,
                updater_id: SYSTEM_BOT_ID,
                status: Some(BackupStatus::Failed),
                comment: Some(format!("{}; database no longer exists", backup.comment)),
            })?;
            warn!(
                backup_id = backup.id,
                database_id = backup.database_id,
                "marked orphaned backup failed"
            );
            Ok(Some(Repair::Failed))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructor::{schedule_backup_task, ScheduleOutcome};
    use crate::test_support::{due_for, Faults, FaultyStore, Seeded};
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    const EPOCH: i64 = 1_709_607_600;
    const GRACE: Duration = Duration::from_secs(900);

    /// Leaves a `PENDING_CREATE` backup with a pipeline but no stage or task.
    fn orphan(seeded: &Seeded, name: &str) -> (i64, i64) {
        let db = seeded.add_database(name);
        seeded.schedule(db.id, 3, 2, None);
        let due = due_for(seeded, db.id);
        let faulty = FaultyStore::new(
            Arc::clone(&seeded.store),
            Faults {
                fail_stage: true.into(),
                ..Default::default()
            },
        );
        let key = format!("auto-backup-{EPOCH}-{}", db.id);
        assert!(schedule_backup_task(&faulty, &due, &key, EPOCH).is_err());
        let backup = seeded
            .store
            .find_backup(&BackupFind {
                name: Some(key),
                ..Default::default()
            })
            .unwrap();
        (db.id, backup.id)
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::hours(1)
    }

    #[test]
    fn completes_the_chain_for_an_orphan() {
        let seeded = Seeded::new();
        let (_, backup_id) = orphan(&seeded, "orders");

        let report = reconcile_orphans(seeded.store.as_ref(), later(), GRACE).unwrap();
        assert_eq!(report.completed, vec![backup_id]);
        assert!(report.failed.is_empty());
        // The pipeline the interrupted attempt wrote is reused.
        assert_eq!(seeded.counts(), (1, 1, 1, 1));

        let tasks = seeded
            .store
            .find_tasks(&TaskFind {
                backup_id: Some(backup_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_type, TaskType::DatabaseBackup);

        // A second pass finds nothing left to do.
        let again = reconcile_orphans(seeded.store.as_ref(), later(), GRACE).unwrap();
        assert_eq!(again, ReconcileReport::default());
    }

    #[test]
    fn young_orphans_are_left_alone() {
        let seeded = Seeded::new();
        orphan(&seeded, "orders");

        let report = reconcile_orphans(seeded.store.as_ref(), Utc::now(), GRACE).unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(seeded.counts(), (1, 1, 0, 0));
    }

    #[test]
    fn healthy_backups_are_untouched() {
        let seeded = Seeded::new();
        let db = seeded.add_database("orders");
        seeded.schedule(db.id, 3, 2, None);
        let due = due_for(&seeded, db.id);
        let outcome =
            schedule_backup_task(seeded.store.as_ref(), &due, "auto-backup-1-1", EPOCH).unwrap();
        assert!(matches!(outcome, ScheduleOutcome::Created(_)));

        let report = reconcile_orphans(seeded.store.as_ref(), later(), GRACE).unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(seeded.counts(), (1, 1, 1, 1));
    }

    #[test]
    fn orphan_of_a_vanished_database_is_failed() {
        let seeded = Seeded::new();
        let (db_id, backup_id) = orphan(&seeded, "orders");
        let faulty = FaultyStore::new(
            Arc::clone(&seeded.store),
            Faults {
                missing_databases: [db_id].into(),
                ..Default::default()
            },
        );

        let report = reconcile_orphans(&faulty, later(), GRACE).unwrap();
        assert_eq!(report.failed, vec![backup_id]);

        let backup = seeded
            .store
            .find_backup(&BackupFind {
                id: Some(backup_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(backup.status, BackupStatus::Failed);
        assert_eq!(backup.updater_id, SYSTEM_BOT_ID);
    }

    #[test]
    fn one_bad_orphan_does_not_stop_the_pass() {
        let seeded = Seeded::new();
        let (_, first) = orphan(&seeded, "orders");
        let (_, second) = orphan(&seeded, "users");
        let faulty = FaultyStore::new(Arc::clone(&seeded.store), Faults::default());
        faulty.faults.fail_stage.store(true, Ordering::SeqCst);

        let report = reconcile_orphans(&faulty, later(), GRACE).unwrap();
        assert!(report.completed.is_empty());

        faulty.faults.fail_stage.store(false, Ordering::SeqCst);
        let report = reconcile_orphans(&faulty, later(), GRACE).unwrap();
        assert_eq!(report.completed, vec![first, second]);
        assert_eq!(seeded.counts(), (2, 2, 2, 2));
    }

    #[test]
    fn claimed_orphans_wait_out_the_grace_period() {
        let seeded = Seeded::new();
        let (_, backup_id) = orphan(&seeded, "orders");
        let backup = seeded
            .store
            .find_backup(&BackupFind {
                id: Some(backup_id),
                ..Default::default()
            })
            .unwrap();
        // Old enough by `created_ts`, so only the claim can hold it back.
        let at = DateTime::<Utc>::from_timestamp(backup.created_ts + 1, 0).unwrap();
        let faulty = FaultyStore::new(Arc::clone(&seeded.store), Faults::default());

        faulty.faults.fail_stage.store(true, Ordering::SeqCst);
        reconcile_orphans(&faulty, at, Duration::ZERO).unwrap();
        let claimed = seeded
            .store
            .find_backup(&BackupFind {
                id: Some(backup_id),
                ..Default::default()
            })
            .unwrap();
        assert!(claimed.updated_ts > backup.updated_ts);
        assert_eq!(claimed.updater_id, SYSTEM_BOT_ID);

        faulty.faults.fail_stage.store(false, Ordering::SeqCst);
        let report = reconcile_orphans(&faulty, at, Duration::ZERO).unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(seeded.counts(), (1, 1, 0, 0));
    }

    #[test]
    fn concurrent_passes_repair_an_orphan_once() {
        let seeded = Seeded::new();
        let (_, backup_id) = orphan(&seeded, "orders");
        // Both passes see the orphan without a task before either repairs it.
        let faulty = Arc::new(FaultyStore::new(
            Arc::clone(&seeded.store),
            Faults {
                tasks_barrier: Some(Barrier::new(2)),
                ..Default::default()
            },
        ));

        let passes: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&faulty);
                std::thread::spawn(move || reconcile_orphans(store.as_ref(), later(), GRACE))
            })
            .collect();
        let completed: Vec<i64> = passes
            .into_iter()
            .flat_map(|pass| pass.join().unwrap().unwrap().completed)
            .collect();

        assert_eq!(completed, vec![backup_id]);
        assert_eq!(seeded.counts(), (1, 1, 1, 1));
    }

    #[test]
    fn existing_task_counts_as_repaired() {
        let seeded = Seeded::new();
        let db = seeded.add_database("orders");
        seeded.schedule(db.id, 3, 2, None);
        let due = due_for(&seeded, db.id);
        schedule_backup_task(seeded.store.as_ref(), &due, "auto-backup-1-1", EPOCH).unwrap();
        // A lookup that misses the task lets the repair reach the insert.
        let faulty = FaultyStore::new(
            Arc::clone(&seeded.store),
            Faults {
                hide_tasks: true.into(),
                ..Default::default()
            },
        );

        let report = reconcile_orphans(&faulty, later(), GRACE).unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(seeded.counts(), (1, 1, 1, 1));
    }
}
