//! Ephemeral database instances
//!
//! An [`InstanceProvider`] launches an engine process bound to a port and
//! hands back an [`InstanceHandle`]. Whoever holds the handle owns the process
//! and is responsible for stopping it.

pub mod cockroach;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::{Context, Interrupted};

pub use cockroach::{CockroachInstance, CockroachProvider};

/// Error type for launching and stopping instances
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The engine binary could not be executed
    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// Something other than a reusable dev instance already listens on the port
    #[error("port {0} is already in use by another process")]
    PortInUse(u16),

    /// The process exited before it became ready
    #[error("database process exited during startup ({status}){}", format_output(.output))]
    Exited { status: String, output: String },

    #[error("database did not become ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("database process did not exit within {0:?}")]
    StopTimeout(Duration),

    #[error("database advertised an invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_output(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(": {}", output)
    }
}

/// A running instance owned by the holder of this handle
#[async_trait]
pub trait InstanceHandle: Send + Sync + fmt::Debug {
    /// Connection URL of the instance
    fn url(&self) -> &str;

    /// Stop the instance and release everything it holds
    async fn stop(self: Box<Self>) -> Result<(), InstanceError>;
}

/// Launches database instances
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    /// Start a new instance listening on `port`.
    ///
    /// Port 0 lets the engine pick a free port. When this returns an error no
    /// process is left running.
    async fn start(&self, ctx: &Context, port: u16) -> Result<Box<dyn InstanceHandle>, InstanceError>;
}
