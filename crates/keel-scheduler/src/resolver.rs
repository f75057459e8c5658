use chrono::{DateTime, Utc};
use keel_store::{BackupSetting, Database, EntityStore};
use tracing::{debug, warn};

use crate::bucket::TimeBucket;
use crate::error::Result;

/// A backup setting due in the current bucket, with its database topology.
#[derive(Debug, Clone)]
pub struct DueBackup {
    pub setting: BackupSetting,
    pub database: Database,
}

/// Everything a tick needs to fan out: the bucket and what is due in it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub bucket: TimeBucket,
    pub due: Vec<DueBackup>,
}

/// Find every backup setting due in the bucket containing `now`.
///
/// A setting whose database cannot be composed (deleted since the setting was
/// written, or a transient store error) is logged and skipped; the rest are
/// still returned. Only a failure of the settings query itself is an error.
pub fn resolve_due(store: &dyn EntityStore, now: DateTime<Utc>) -> Result<Resolution> {
    let bucket = TimeBucket::containing(now);
    let settings = store.find_backup_settings(&bucket.matcher())?;

    let mut due = Vec::with_capacity(settings.len());
    for setting in settings {
        match store.compose_database(setting.database_id) {
            Ok(database) => due.push(DueBackup { setting, database }),
            Err(e) => {
                warn!(
                    backup_setting_id = setting.id,
                    database_id = setting.database_id,
                    error = %e,
                    "failed to get database for backup setting"
                );
            }
        }
    }

    debug!(
        bucket_epoch = bucket.epoch(),
        hour = bucket.hour(),
        day_of_week = bucket.day_of_week(),
        due = due.len(),
        "resolved due backup settings"
    );
    Ok(Resolution { bucket, due })
}
