pub mod migrate;
pub mod up;

use std::path::PathBuf;

use clap::Args;
use devroach::{ConfigError, DevroachError, InstanceError, MigrationSource};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where prisma keeps its generated migrations
pub const DEFAULT_MIGRATIONS: &str = "prisma/migrations/**/*.sql";

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Devroach(#[from] DevroachError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to stop dev database: {0}")]
    Cleanup(#[source] InstanceError),

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

/// Which migration files to apply
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct MigrationArgs {
    /// Root the migration patterns are matched against
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Glob selecting migration files, relative to --dir (repeatable, applied in order)
    #[arg(long = "migrations", value_name = "GLOB", default_value = DEFAULT_MIGRATIONS)]
    pub migrations: Vec<String>,
}

impl MigrationArgs {
    pub fn source(&self) -> MigrationSource {
        MigrationSource::from_dir(self.dir.clone(), self.migrations.iter().cloned())
    }
}

impl Default for MigrationArgs {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            migrations: vec![DEFAULT_MIGRATIONS.to_string()],
        }
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM
pub fn cancel_on_shutdown(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => {
                tracing::info!(target: "devroach::cli", "shutdown signal received");
                token.cancel();
            }
            Err(e) => tracing::warn!(target: "devroach::cli", error = %e, "failed to listen for shutdown signals"),
        }
    })
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
