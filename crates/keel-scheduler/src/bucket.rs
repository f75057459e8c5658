use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use keel_store::BackupSettingMatch;

/// One UTC hour: the unit of automatic-backup scheduling.
///
/// Every tick inside the same hour maps to the same bucket, so the identity
/// keys derived from it are stable across retries, overlapping ticks and
/// concurrently running runners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBucket {
    start: DateTime<Utc>,
}

impl TimeBucket {
    /// The bucket `now` falls into: `now` truncated to the start of its hour.
    pub fn containing(now: DateTime<Utc>) -> Self {
        let into_hour = Duration::seconds(i64::from(now.minute() * 60 + now.second()))
            + Duration::nanoseconds(i64::from(now.nanosecond()));
        Self {
            start: now - into_hour,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Unix seconds of the bucket start.
    pub fn epoch(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn hour(&self) -> u32 {
        self.start.hour()
    }

    /// 0 = Sunday … 6 = Saturday.
    pub fn day_of_week(&self) -> u32 {
        self.start.weekday().num_days_from_sunday()
    }

    /// Predicate selecting the backup settings due in this bucket.
    pub fn matcher(&self) -> BackupSettingMatch {
        BackupSettingMatch {
            hour: self.hour(),
            day_of_week: self.day_of_week(),
        }
    }

    /// Name of the automatic backup for `database_id` in this bucket.
    pub fn backup_key(&self, database_id: i64) -> String {
        backup_key(self.epoch(), database_id)
    }
}

/// `auto-backup-{bucket_epoch}-{database_id}`.
///
/// The store keeps `(database_id, name)` unique, so two attempts for the same
/// database and bucket collide on this name no matter which process makes
/// them.
pub fn backup_key(bucket_epoch: i64, database_id: i64) -> String {
    format!("auto-backup-{bucket_epoch}-{database_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    #[test]
    fn truncates_to_the_hour() {
        // 2024-03-05 is a Tuesday.
        let bucket = TimeBucket::containing(at(2024, 3, 5, 3, 17, 42));
        assert_eq!(bucket.start(), at(2024, 3, 5, 3, 0, 0));
        assert_eq!(bucket.hour(), 3);
        assert_eq!(bucket.day_of_week(), 2);
        assert_eq!(bucket.epoch(), 1_709_607_600);
    }

    #[test]
    fn sub_second_precision_is_dropped() {
        let now = at(2024, 3, 5, 3, 59, 59) + Duration::milliseconds(999);
        assert_eq!(TimeBucket::containing(now).start(), at(2024, 3, 5, 3, 0, 0));
    }

    #[test]
    fn same_hour_gives_same_key() {
        let a = TimeBucket::containing(at(2024, 3, 5, 3, 0, 0));
        let b = TimeBucket::containing(at(2024, 3, 5, 3, 59, 59));
        assert_eq!(a, b);
        assert_eq!(a.backup_key(42), b.backup_key(42));
    }

    #[test]
    fn different_hour_or_day_gives_different_key() {
        let base = TimeBucket::containing(at(2024, 3, 5, 3, 10, 0));
        let next_hour = TimeBucket::containing(at(2024, 3, 5, 4, 10, 0));
        let next_week = TimeBucket::containing(at(2024, 3, 12, 3, 10, 0));
        assert_ne!(base.backup_key(42), next_hour.backup_key(42));
        assert_ne!(base.backup_key(42), next_week.backup_key(42));
        assert_eq!(base.matcher(), next_week.matcher());
        assert_ne!(base.backup_key(42), base.backup_key(43));
    }

    #[test]
    fn sunday_is_day_zero() {
        // 2024-03-10 is a Sunday.
        let bucket = TimeBucket::containing(at(2024, 3, 10, 23, 30, 0));
        assert_eq!(bucket.matcher().day_of_week, 0);
        assert_eq!(bucket.matcher().hour, 23);
    }

    #[test]
    fn key_format() {
        assert_eq!(backup_key(1_709_607_600, 42), "auto-backup-1709607600-42");
    }
}
