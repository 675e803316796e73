use devroach::{migrate, Context, DatabaseBackend, DatabasePool, DevroachConfig, DevroachError, PostgresBackend};
use tokio_util::sync::CancellationToken;

use super::{cancel_on_shutdown, CliError, MigrationArgs};

/// Apply migrations to an already running database
pub async fn run(url: &str, args: &MigrationArgs, config: &DevroachConfig) -> Result<(), CliError> {
    let token = CancellationToken::new();
    let watcher = cancel_on_shutdown(token.clone());
    let ctx = Context::new().with_cancellation(token);

    let pool = ctx
        .run(PostgresBackend::new().connect(url, &config.pool))
        .await
        .map_err(DevroachError::from)?
        .map_err(|source| DevroachError::Pool {
            url: url.to_string(),
            source,
        })?;

    let result = migrate(&ctx, &pool, Some(&args.source())).await;
    pool.close().await;
    watcher.abort();

    let applied = result?;
    println!("applied {} migration(s)", applied);
    Ok(())
}
