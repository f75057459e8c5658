use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use keel_core::config::SchedulerConfig;
use keel_store::EntityStore;
use tokio::sync::{watch, Semaphore};
use tokio::task::{self, JoinHandle};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::bucket::TimeBucket;
use crate::constructor::{schedule_backup_task, ScheduleOutcome};
use crate::reconcile::reconcile_orphans;
use crate::resolver::{resolve_due, DueBackup};

/// Runtime knobs of a [`BackupRunner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub interval: Duration,
    pub max_concurrency: usize,
    pub reconcile: bool,
    pub reconcile_grace: Duration,
}

impl From<&SchedulerConfig> for RunnerConfig {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            interval: cfg.interval(),
            max_concurrency: cfg.max_concurrency,
            reconcile: cfg.reconcile,
            reconcile_grace: cfg.reconcile_grace(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

/// What one tick did. Attempts are only launched, not awaited, so this says
/// nothing about whether they succeeded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub bucket_epoch: i64,
    /// Settings matched in the bucket with a resolvable database.
    pub due: usize,
    /// Scheduling attempts launched.
    pub spawned: usize,
    /// The settings query failed or panicked; nothing was launched.
    pub resolution_failed: bool,
}

/// Periodic automatic-backup scheduler.
///
/// Every tick resolves the settings due in the current hour and launches one
/// scheduling attempt per match. Attempts run on the blocking pool, bounded by
/// a semaphore of `max_concurrency` permits, and are tracked so shutdown can
/// wait for them.
pub struct BackupRunner {
    store: Arc<dyn EntityStore>,
    config: RunnerConfig,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    clock: fn() -> DateTime<Utc>,
}

/// Returned by [`BackupRunner::start`].
pub struct RunnerHandle {
    join: JoinHandle<()>,
}

impl RunnerHandle {
    /// Wait for the loop to stop and every in-flight attempt to finish.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            error!(error = %e, "backup runner task failed");
        }
    }
}

impl BackupRunner {
    pub fn new(store: Arc<dyn EntityStore>, config: RunnerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            store,
            config,
            permits,
            tracker: TaskTracker::new(),
            clock: Utc::now,
        }
    }

    /// Replace the clock the loop reads to pick each tick's bucket.
    ///
    /// Meant for tests. Reconciliation keeps reading the wall clock, since
    /// it compares against the timestamps the store writes.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the loop. It stops starting ticks once `shutdown` flips to
    /// `true` (or its sender is dropped) and then drains in-flight attempts.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> RunnerHandle {
        RunnerHandle {
            join: tokio::spawn(self.run(shutdown)),
        }
    }

    /// Main loop: tick, sleep `interval`, repeat until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_concurrency = self.config.max_concurrency,
            "backup runner started"
        );

        while !*shutdown.borrow() {
            let tick = AssertUnwindSafe(async {
                let now = (self.clock)();
                self.tick_at(now).await
            })
            .catch_unwind();
            if let Err(panic) = tick.await {
                error!(panic = %panic_message(&*panic), "backup runner tick panicked");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("shutdown sender dropped, stopping backup runner");
                        break;
                    }
                }
            }
        }

        info!(in_flight = self.tracker.len(), "backup runner shutting down");
        self.tracker.close();
        self.tracker.wait().await;
        info!("backup runner stopped");
    }

    /// Run one tick in the bucket containing `now`.
    ///
    /// Resolution and reconciliation are awaited; scheduling attempts are
    /// launched and left running. Reconciliation measures its grace period
    /// against the wall clock, not `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let bucket = TimeBucket::containing(now);
        let mut report = TickReport {
            bucket_epoch: bucket.epoch(),
            ..Default::default()
        };

        let store = Arc::clone(&self.store);
        match task::spawn_blocking(move || resolve_due(store.as_ref(), now)).await {
            Ok(Ok(resolution)) => {
                report.due = resolution.due.len();
                for due in resolution.due {
                    self.spawn_attempt(due, bucket);
                    report.spawned += 1;
                }
            }
            Ok(Err(e)) => {
                error!(
                    bucket_epoch = report.bucket_epoch,
                    error = %e,
                    "failed to resolve due backups"
                );
                report.resolution_failed = true;
            }
            Err(e) => {
                error!(
                    bucket_epoch = report.bucket_epoch,
                    panic = %join_error_message(e),
                    "backup resolution panicked"
                );
                report.resolution_failed = true;
            }
        }

        if self.config.reconcile {
            self.reconcile(Utc::now()).await;
        }

        debug!(
            bucket_epoch = report.bucket_epoch,
            due = report.due,
            spawned = report.spawned,
            "tick finished"
        );
        report
    }

    /// Wait until every attempt launched so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    fn spawn_attempt(&self, due: DueBackup, bucket: TimeBucket) {
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);
        let backup_key = bucket.backup_key(due.database.id);
        let bucket_epoch = bucket.epoch();

        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let backup_setting_id = due.setting.id;
            let database_id = due.database.id;

            let attempt = task::spawn_blocking(move || {
                schedule_backup_task(store.as_ref(), &due, &backup_key, bucket_epoch)
            });
            match attempt.await {
                Ok(Ok(ScheduleOutcome::Created(chain))) => info!(
                    backup_setting_id,
                    database_id,
                    backup_id = chain.backup_id,
                    pipeline_id = chain.pipeline_id,
                    task_id = chain.task_id,
                    "scheduled automatic backup"
                ),
                Ok(Ok(ScheduleOutcome::AlreadyScheduled)) => debug!(
                    backup_setting_id,
                    database_id, "automatic backup already scheduled for this hour"
                ),
                Ok(Err(e)) => error!(
                    backup_setting_id,
                    database_id,
                    error = %e,
                    "failed to schedule automatic backup"
                ),
                Err(e) => error!(
                    backup_setting_id,
                    database_id,
                    panic = %join_error_message(e),
                    "backup scheduling attempt panicked"
                ),
            }
        });
    }

    async fn reconcile(&self, now: DateTime<Utc>) {
        let store = Arc::clone(&self.store);
        let grace = self.config.reconcile_grace;
        match task::spawn_blocking(move || reconcile_orphans(store.as_ref(), now, grace)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to list orphaned backups"),
            Err(e) => error!(panic = %join_error_message(e), "reconciliation panicked"),
        }
    }
}

fn join_error_message(e: task::JoinError) -> String {
    if e.is_panic() {
        panic_message(&*e.into_panic())
    } else {
        e.to_string()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
