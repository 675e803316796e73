//! # devroach: disposable CockroachDB for development and tests
//!
//! Starts (or reuses) a local in-memory CockroachDB node, opens a connection
//! pool against it and applies versionless SQL migrations before handing the
//! pool to the caller.
//!
//! ```no_run
//! use devroach::{Context, CockroachProvisioner, DevroachConfig, MigrationSource};
//!
//! # async fn example() -> devroach::DevroachResult<()> {
//! let config = DevroachConfig::from_env()?;
//! let provisioner = CockroachProvisioner::from_config(&config);
//! let source = MigrationSource::from_dir(".", ["prisma/migrations/**/*.sql"]);
//!
//! let (pool, cleanup) = provisioner.acquire(&Context::new(), Some(&source)).await?;
//! sqlx::query("SELECT 1").execute(pool.pg_pool()).await.ok();
//! cleanup.release().await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod cleanup;
pub mod config;
pub mod context;
pub mod error;
pub mod instance;
pub mod migrations;
pub mod provisioner;

pub use backends::{
    BackendError, BackendResult, DatabaseBackend, DatabasePool, DatabasePoolConfig, DatabasePoolStats,
    PostgresBackend, PostgresPool,
};
pub use cleanup::Cleanup;
pub use config::{CockroachConfig, ConfigError, DevroachConfig, ProvisionerConfig, DEFAULT_PORT};
pub use context::{Context, Interrupted};
pub use error::{DevroachError, DevroachResult};
pub use instance::{CockroachInstance, CockroachProvider, InstanceError, InstanceHandle, InstanceProvider};
pub use migrations::{apply, load, migrate, DirFs, MemoryFs, MigrationBatch, MigrationFs, MigrationScript, MigrationSource};
pub use provisioner::{CockroachProvisioner, Provisioner};
