//! PostgreSQL Backend Implementation
//!
//! CockroachDB speaks the Postgres wire protocol, so the dev instance is
//! reached through sqlx's Postgres driver.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, Executor, PgPool};

use super::core::*;

/// PostgreSQL database backend implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresBackend;

impl PostgresBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    type Pool = PostgresPool;

    async fn connect(&self, database_url: &str, config: &DatabasePoolConfig) -> BackendResult<PostgresPool> {
        validate_database_url(database_url)?;

        let options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .test_before_acquire(config.test_before_acquire);

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| BackendError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(PostgresPool::new(pool))
    }
}

fn validate_database_url(url: &str) -> BackendResult<()> {
    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
        return Err(BackendError::Connection("Invalid PostgreSQL URL scheme".to_string()));
    }
    Ok(())
}

/// PostgreSQL connection pool implementation
///
/// Cloning is cheap; all clones share the same underlying sqlx pool.
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying sqlx pool, for running application queries
    pub fn pg_pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn into_inner(self) -> PgPool {
        self.pool
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn execute_script(&self, sql: &str) -> BackendResult<()> {
        // A bare &str without bind arguments goes over the simple query protocol,
        // which accepts several statements in one round trip.
        (&self.pool)
            .execute(sql)
            .await
            .map_err(|e| BackendError::Query(e.to_string()))?;
        Ok(())
    }

    async fn ping(&self) -> BackendResult<Duration> {
        let start = Instant::now();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| BackendError::Connection(format!("Failed to acquire connection: {}", e)))?;
        conn.ping()
            .await
            .map_err(|e| BackendError::Connection(format!("Health check failed: {}", e)))?;

        Ok(start.elapsed())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn stats(&self) -> DatabasePoolStats {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        DatabasePoolStats {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
        }
    }
}

impl From<PostgresPool> for PgPool {
    fn from(pool: PostgresPool) -> Self {
        pool.pool
    }
}
