//! Core Database Backend Traits
//!
//! The provisioner and the migration applier only talk to a database through
//! these traits. They abstract away the driver so the lifecycle logic can be
//! exercised without a running server.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Backend result type alias
pub type BackendResult<T> = Result<T, BackendError>;

/// Error type for driver-level failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Connection could not be established or was lost
    #[error("connection error: {0}")]
    Connection(String),
    /// A statement was rejected by the server
    #[error("query error: {0}")]
    Query(String),
}

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Execute raw SQL text that may contain several statements.
    ///
    /// This is a single administrative round trip, not wrapped in a transaction.
    async fn execute_script(&self, sql: &str) -> BackendResult<()>;

    /// Lightweight liveness check, returns the round trip time
    async fn ping(&self) -> BackendResult<Duration>;

    /// Close the pool and all of its connections
    async fn close(&self);

    /// Get pool statistics
    fn stats(&self) -> DatabasePoolStats;
}

/// Database backend trait that knows how to open pools
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    type Pool: DatabasePool + Clone + 'static;

    /// Create a connection pool from a database URL
    async fn connect(&self, database_url: &str, config: &DatabasePoolConfig) -> BackendResult<Self::Pool>;
}

/// Database pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabasePoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
}

/// Database pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
    pub test_before_acquire: bool,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
            test_before_acquire: true,
        }
    }
}
