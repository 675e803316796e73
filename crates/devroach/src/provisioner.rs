//! Dev database provisioning
//!
//! [`Provisioner::acquire`] reuses a database already listening on the
//! well-known port, or starts one there, opens a pool and applies migrations.
//! Whatever was acquired before a failing step is released before the error
//! is returned.

use crate::backends::{DatabaseBackend, DatabasePool, DatabasePoolConfig, PostgresBackend};
use crate::cleanup::Cleanup;
use crate::config::{DevroachConfig, ProvisionerConfig};
use crate::context::Context;
use crate::error::{DevroachError, DevroachResult};
use crate::instance::{CockroachProvider, InstanceError, InstanceProvider};
use crate::migrations::{migrate, MigrationSource};

/// Provisioner for the default stack: CockroachDB reached through sqlx
pub type CockroachProvisioner = Provisioner<PostgresBackend, CockroachProvider>;

pub struct Provisioner<B, I> {
    backend: B,
    provider: I,
    config: ProvisionerConfig,
    pool_config: DatabasePoolConfig,
}

impl Provisioner<PostgresBackend, CockroachProvider> {
    /// The started node serves the database the well-known URL names
    pub fn from_config(config: &DevroachConfig) -> Self {
        Self::new(
            PostgresBackend::new(),
            CockroachProvider::new(config.cockroach_config()),
            config.provisioner.clone(),
        )
        .with_pool_config(config.pool.clone())
    }
}

impl<B, I> Provisioner<B, I>
where
    B: DatabaseBackend,
    I: InstanceProvider,
{
    pub fn new(backend: B, provider: I, config: ProvisionerConfig) -> Self {
        Self {
            backend,
            provider,
            config,
            pool_config: DatabasePoolConfig::default(),
        }
    }

    /// Settings for the pool handed back to the caller
    pub fn with_pool_config(mut self, pool_config: DatabasePoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn provider(&self) -> &I {
        &self.provider
    }

    /// Get a pool to the shared dev database.
    ///
    /// A database already running at the well-known endpoint is reused as is
    /// and `source` is not applied to it. Otherwise a new instance is started
    /// on that port and migrated. The returned cleanup stops the instance only
    /// when this call started it.
    pub async fn acquire(
        &self,
        ctx: &Context,
        source: Option<&MigrationSource>,
    ) -> DevroachResult<(B::Pool, Cleanup<B::Pool>)> {
        let url = self.config.url();

        if let Some(pool) = self.probe(ctx, &url).await? {
            tracing::info!(target: "devroach", url = %url, "using existing dev database");

            let mut cleanup = Cleanup::new();
            cleanup.push_external(url);
            cleanup.push_pool(pool.clone());
            return Ok((pool, cleanup));
        }

        self.start(ctx, self.config.port, source).await
    }

    /// Start a private instance on a free port and migrate it.
    ///
    /// Nothing is probed or shared, so concurrent callers never collide.
    pub async fn acquire_fresh(
        &self,
        ctx: &Context,
        source: Option<&MigrationSource>,
    ) -> DevroachResult<(B::Pool, Cleanup<B::Pool>)> {
        self.start(ctx, 0, source).await
    }

    /// Look for a live database at `url`; failing to connect or ping means there is none.
    ///
    /// The pool is opened with the caller's settings, since it is the one handed
    /// back on reuse. Only the probe itself is bounded by the probe timeout.
    async fn probe(&self, ctx: &Context, url: &str) -> DevroachResult<Option<B::Pool>> {
        let timeout = self.config.probe_timeout;

        let connect = tokio::time::timeout(timeout, self.backend.connect(url, &self.pool_config));
        let pool = match ctx.run(connect).await? {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => {
                tracing::debug!(target: "devroach", url = %url, error = %e, "no dev database to reuse");
                return Ok(None);
            }
            Err(_) => {
                tracing::debug!(target: "devroach", url = %url, ?timeout, "no dev database answered in time");
                return Ok(None);
            }
        };

        let reason = match ctx.run(tokio::time::timeout(timeout, pool.ping())).await {
            Ok(Ok(Ok(_))) => return Ok(Some(pool)),
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(_)) => format!("no answer within {:?}", timeout),
            Err(interrupted) => {
                pool.close().await;
                return Err(interrupted.into());
            }
        };

        tracing::debug!(target: "devroach", url = %url, error = %reason, "dev database did not answer ping");
        pool.close().await;
        Ok(None)
    }

    async fn start(
        &self,
        ctx: &Context,
        port: u16,
        source: Option<&MigrationSource>,
    ) -> DevroachResult<(B::Pool, Cleanup<B::Pool>)> {
        ctx.check()?;

        let instance = self.provider.start(ctx, port).await.map_err(start_error)?;
        let url = instance.url().to_string();
        tracing::info!(target: "devroach", url = %url, "started dev database");

        let mut cleanup = Cleanup::new();
        cleanup.push_instance(instance);

        let connected = ctx.run(self.backend.connect(&url, &self.pool_config)).await;
        let connected = match connected {
            Ok(Ok(pool)) => Ok(pool),
            Ok(Err(source)) => Err(DevroachError::Pool { url, source }),
            Err(interrupted) => Err(interrupted.into()),
        };
        let pool = match connected {
            Ok(pool) => pool,
            Err(e) => {
                release_after_failure(cleanup).await;
                return Err(e);
            }
        };
        cleanup.push_pool(pool.clone());

        match migrate(ctx, &pool, source).await {
            Ok(applied) => {
                let stats = pool.stats();
                tracing::debug!(
                    target: "devroach",
                    applied,
                    connections = stats.total_connections,
                    idle = stats.idle_connections,
                    "dev database ready"
                );
                Ok((pool, cleanup))
            }
            Err(e) => {
                release_after_failure(cleanup).await;
                Err(e)
            }
        }
    }
}

/// Interruptions keep their own kind instead of reading as a failed start
fn start_error(error: InstanceError) -> DevroachError {
    match error {
        InstanceError::Interrupted(interrupted) => interrupted.into(),
        other => DevroachError::Start(other),
    }
}

async fn release_after_failure<P: DatabasePool>(cleanup: Cleanup<P>) {
    // release logs its own failures; the caller sees the error that caused it
    let _ = cleanup.release().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Interrupted;

    #[test]
    fn test_start_error_keeps_interruption_kind() {
        assert!(matches!(
            start_error(InstanceError::Interrupted(Interrupted::Cancelled)),
            DevroachError::Cancelled
        ));
        assert!(matches!(
            start_error(InstanceError::Interrupted(Interrupted::DeadlineExceeded)),
            DevroachError::DeadlineExceeded
        ));
        assert!(matches!(
            start_error(InstanceError::PortInUse(26257)),
            DevroachError::Start(InstanceError::PortInUse(26257))
        ));
    }

    #[test]
    fn test_from_config_uses_well_known_port() {
        let provisioner = CockroachProvisioner::from_config(&DevroachConfig::default());
        assert_eq!(provisioner.config().port, crate::config::DEFAULT_PORT);
        assert_eq!(provisioner.provider().config().binary, "cockroach");
    }

    #[test]
    fn test_from_config_launches_the_configured_database() {
        let mut config = DevroachConfig::default();
        config.provisioner.database = "app_dev".to_string();

        let provisioner = CockroachProvisioner::from_config(&config);

        assert_eq!(provisioner.provider().config().database, "app_dev");
        assert!(provisioner.config().url().contains("/app_dev?"));
    }
}
