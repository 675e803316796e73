//! Release of everything a provisioning call acquired
//!
//! Resources are recorded in acquisition order together with whether the
//! caller owns them, and released in reverse. A reused instance is recorded
//! but never stopped. The pool is always closed.

use std::fmt;

use crate::backends::DatabasePool;
use crate::instance::{InstanceError, InstanceHandle};

enum Resource<P> {
    Pool(P),
    /// An instance this call started
    Instance(Box<dyn InstanceHandle>),
    /// An instance somebody else started
    External { url: String },
}

impl<P> Resource<P> {
    /// Owned resources are closed or stopped on release
    fn owned(&self) -> bool {
        !matches!(self, Resource::External { .. })
    }

    fn kind(&self) -> &'static str {
        match self {
            Resource::Pool(_) => "pool",
            Resource::Instance(_) => "instance",
            Resource::External { .. } => "external",
        }
    }
}

/// Resources to release once the caller is done with the database.
///
/// [`Cleanup::release`] consumes the value, so it runs at most once. Dropping
/// an unreleased cleanup leaves the pool open but an owned cockroach process
/// is still killed when its handle drops.
#[must_use = "an unreleased cleanup leaves the pool open"]
pub struct Cleanup<P: DatabasePool> {
    resources: Vec<Resource<P>>,
}

impl<P: DatabasePool> Cleanup<P> {
    pub fn new() -> Self {
        Self { resources: Vec::new() }
    }

    /// Record a pool; pools are always owned
    pub fn push_pool(&mut self, pool: P) {
        self.resources.push(Resource::Pool(pool));
    }

    /// Record an instance this call started
    pub fn push_instance(&mut self, instance: Box<dyn InstanceHandle>) {
        self.resources.push(Resource::Instance(instance));
    }

    /// Record an instance that was already running and must be left alone
    pub fn push_external(&mut self, url: impl Into<String>) {
        self.resources.push(Resource::External { url: url.into() });
    }

    /// Whether releasing will stop a database process
    pub fn owns_instance(&self) -> bool {
        self.resources
            .iter()
            .any(|resource| matches!(resource, Resource::Instance(_)))
    }

    /// URL of the recorded instance, owned or not
    pub fn instance_url(&self) -> Option<&str> {
        self.resources.iter().find_map(|resource| match resource {
            Resource::Instance(instance) => Some(instance.url()),
            Resource::External { url } => Some(url.as_str()),
            Resource::Pool(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Release every resource, most recently acquired first.
    ///
    /// A failure does not stop the remaining releases. Each one is logged and
    /// the first is returned.
    pub async fn release(mut self) -> Result<(), InstanceError> {
        let mut first_error = None;

        while let Some(resource) = self.resources.pop() {
            match resource {
                Resource::Pool(pool) => pool.close().await,
                Resource::Instance(instance) => {
                    let url = instance.url().to_string();
                    if let Err(e) = instance.stop().await {
                        tracing::warn!(target: "devroach", url = %url, error = %e, "failed to stop dev database");
                        first_error.get_or_insert(e);
                    }
                }
                Resource::External { url } => {
                    tracing::debug!(target: "devroach", url = %url, "leaving dev database running");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<P: DatabasePool> Default for Cleanup<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: DatabasePool> fmt::Debug for Cleanup<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resources: Vec<(&str, bool)> = self
            .resources
            .iter()
            .map(|resource| (resource.kind(), resource.owned()))
            .collect();

        f.debug_struct("Cleanup").field("resources", &resources).finish()
    }
}
