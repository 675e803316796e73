//! Error types for provisioning and migrating dev databases
//!
//! Every variant is terminal for the call that produced it. Nothing in this
//! crate retries.

use thiserror::Error;

use crate::backends::BackendError;
use crate::config::ConfigError;
use crate::instance::InstanceError;

/// Result type alias for devroach operations
pub type DevroachResult<T> = Result<T, DevroachError>;

/// Error type for loading migrations, starting instances and opening pools
#[derive(Debug, Error)]
pub enum DevroachError {
    /// A migration glob pattern could not be compiled
    #[error("invalid migration pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// A matched migration file could not be read
    #[error("failed to read migration file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The migration tree could not be listed
    #[error("failed to list migration files: {0}")]
    List(#[source] std::io::Error),

    /// The database instance could not be launched
    #[error("failed to start dev database: {0}")]
    Start(#[from] InstanceError),

    /// A pool could not be opened against a live instance
    #[error("failed to open connection pool to {url}: {source}")]
    Pool {
        url: String,
        #[source]
        source: BackendError,
    },

    /// A migration statement failed while being applied
    #[error("migration #{ordinal} ({path}) failed: {source}")]
    Migration {
        /// 1-based position of the failing script in the batch
        ordinal: usize,
        path: String,
        #[source]
        source: BackendError,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DevroachError {
    /// Whether the error was caused by the caller's context rather than the operation itself
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DevroachError::Cancelled | DevroachError::DeadlineExceeded)
    }
}
