use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{KeelError, Result};

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;
pub const DEFAULT_RECONCILE_GRACE_SECS: u64 = 15 * 60;

/// Top-level config (keel.toml + KEEL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeelConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Backup runner cadence and resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds slept between two ticks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound on scheduling attempts running at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Age after which a pending automatic backup with no task is repaired.
    #[serde(default = "default_reconcile_grace_secs")]
    pub reconcile_grace_secs: u64,
    /// Run the orphan reconciliation pass on every tick.
    #[serde(default = "bool_true")]
    pub reconcile: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            reconcile_grace_secs: DEFAULT_RECONCILE_GRACE_SECS,
            reconcile: true,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn reconcile_grace(&self) -> Duration {
        Duration::from_secs(self.reconcile_grace_secs)
    }
}

fn bool_true() -> bool {
    true
}
fn default_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}
fn default_reconcile_grace_secs() -> u64 {
    DEFAULT_RECONCILE_GRACE_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.keel/keel.db", home)
}

impl KeelConfig {
    /// Load config from a TOML file with KEEL_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `KEEL_SCHEDULER__INTERVAL_SECS=30`. Falls back to
    /// `~/.keel/keel.toml` when no path is given; a missing file is not an
    /// error, every field has a default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: KeelConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("KEEL_").split("__"))
            .extract()
            .map_err(|e| KeelError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runner cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.interval_secs == 0 {
            return Err(KeelError::Config(
                "scheduler.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(KeelError::Config(
                "scheduler.max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.keel/keel.toml", home)
}
