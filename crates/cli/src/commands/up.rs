use devroach::{CockroachProvisioner, Context, DevroachConfig};
use tokio_util::sync::CancellationToken;

use super::{cancel_on_shutdown, CliError, MigrationArgs};

/// Acquire the dev database, print its URL and hold it until shutdown
pub async fn run(args: &MigrationArgs, config: &DevroachConfig) -> Result<(), CliError> {
    let token = CancellationToken::new();
    let watcher = cancel_on_shutdown(token.clone());
    let ctx = Context::new().with_cancellation(token.clone());

    let provisioner = CockroachProvisioner::from_config(config);
    let source = args.source();

    let (pool, cleanup) = match provisioner.acquire(&ctx, Some(&source)).await {
        Ok(acquired) => acquired,
        Err(e) if e.is_cancellation() => {
            tracing::info!(target: "devroach::cli", "interrupted before the dev database was ready");
            return Ok(());
        }
        Err(e) => {
            watcher.abort();
            return Err(e.into());
        }
    };

    let url = cleanup
        .instance_url()
        .map(str::to_string)
        .unwrap_or_else(|| provisioner.config().url());
    println!("{}", url);

    if cleanup.owns_instance() {
        tracing::info!(target: "devroach::cli", "press Ctrl+C to stop the dev database");
    } else {
        tracing::info!(target: "devroach::cli", "press Ctrl+C to disconnect; the existing database keeps running");
    }

    token.cancelled().await;

    drop(pool);
    cleanup.release().await.map_err(CliError::Cleanup)?;
    Ok(())
}
