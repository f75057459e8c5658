/// Principal id used as creator/updater for rows written by automation
/// (the backup runner, the reconciler) rather than by a human.
pub const SYSTEM_BOT_ID: i64 = 1;

/// Placeholder substituted with the bucket epoch inside a backup path template.
pub const PATH_TEMPLATE_TIME: &str = "{{TIME}}";
