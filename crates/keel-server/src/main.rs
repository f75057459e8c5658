use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use keel_core::config::KeelConfig;
use keel_scheduler::{BackupRunner, RunnerConfig};
use keel_store::SqliteStore;
use tracing::info;

/// Runs the automatic backup scheduler against the keel metadata database.
#[derive(Debug, Parser)]
#[command(name = "keel-server", version)]
struct Cli {
    /// Config file (falls back to KEEL_CONFIG, then ~/.keel/keel.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "keel_server=info,keel_scheduler=info,keel_store=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > KEEL_CONFIG env > ~/.keel/keel.toml
    let config_path = cli
        .config
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var("KEEL_CONFIG").ok());
    let config = KeelConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        KeelConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = Arc::new(SqliteStore::open(db_path)?);
    info!("database migrations complete");

    let runner = BackupRunner::new(store, RunnerConfig::from(&config.scheduler));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = runner.start(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, waiting for in-flight backups to be scheduled");

    // signal runner to stop, then drain
    let _ = shutdown_tx.send(true);
    handle.join().await;
    Ok(())
}

/// Create the database's parent directory. Failure is only logged; opening
/// the database reports the real error if the directory is truly missing.
fn ensure_parent_dir(path: &str) -> bool {
    let Some(parent) = std::path::Path::new(path).parent() else {
        return true;
    };
    match std::fs::create_dir_all(parent) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                path = %parent.display(),
                error = %e,
                "failed to create database directory"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested/data/keel.db");
        assert!(ensure_parent_dir(db.to_str().unwrap()));
        assert!(dir.path().join("nested/data").is_dir());
    }

    #[test]
    fn parent_dir_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        let db = file.join("keel.db");
        assert!(!ensure_parent_dir(db.to_str().unwrap()));
    }
}
