//! Configuration for the provisioner and the CockroachDB launcher
//!
//! Values come from defaults with a few environment overrides. The
//! well-known dev port is deliberately not one of them.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::backends::DatabasePoolConfig;

/// Port the shared dev instance listens on
pub const DEFAULT_PORT: u16 = 26257;

pub const ENV_PROBE_TIMEOUT_MS: &str = "DEVROACH_PROBE_TIMEOUT_MS";
pub const ENV_COCKROACH_BIN: &str = "DEVROACH_COCKROACH_BIN";
pub const ENV_STORE_SIZE: &str = "DEVROACH_STORE_SIZE";
pub const ENV_STARTUP_TIMEOUT_MS: &str = "DEVROACH_STARTUP_TIMEOUT_MS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue { field: String, value: String, expected: String },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}

/// Complete configuration
#[derive(Debug, Clone, Default)]
pub struct DevroachConfig {
    pub provisioner: ProvisionerConfig,
    pub cockroach: CockroachConfig,
    pub pool: DatabasePoolConfig,
}

impl DevroachConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            provisioner: ProvisionerConfig::from_lookup(&lookup)?,
            cockroach: CockroachConfig::from_lookup(&lookup)?,
            pool: DatabasePoolConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Launcher settings serving the database the provisioner connects to
    pub fn cockroach_config(&self) -> CockroachConfig {
        CockroachConfig {
            database: self.provisioner.database.clone(),
            ..self.cockroach.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provisioner.validate()?;
        self.cockroach.validate()?;

        if self.pool.max_connections == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "pool.max_connections".to_string(),
                reason: "Pool must allow at least one connection".to_string(),
            });
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(ConfigError::ValidationFailed {
                field: "pool.min_connections".to_string(),
                reason: "Cannot exceed pool.max_connections".to_string(),
            });
        }

        Ok(())
    }
}

/// Where the shared dev instance is expected to live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Well-known port probed for reuse and used when starting
    pub port: u16,
    pub host: String,
    pub user: String,
    pub database: String,
    /// Bound on connecting to and pinging an existing instance
    pub probe_timeout: Duration,
}

impl ProvisionerConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(ms) = lookup(ENV_PROBE_TIMEOUT_MS) {
            config.probe_timeout = parse_millis("probe_timeout", &ms)?;
        }
        Ok(config)
    }

    /// Connection URL of the instance at the well-known endpoint
    pub fn url(&self) -> String {
        format!(
            "postgresql://{}@{}:{}/{}?sslmode=disable",
            self.user, self.host, self.port, self.database
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "port".to_string(),
                reason: "The shared dev instance needs a fixed port".to_string(),
            });
        }
        for (field, value) in [("host", &self.host), ("user", &self.user), ("database", &self.database)] {
            if value.is_empty() {
                return Err(ConfigError::ValidationFailed {
                    field: field.to_string(),
                    reason: format!("{} cannot be empty", field),
                });
            }
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed {
                field: "probe_timeout".to_string(),
                reason: "Probe timeout cannot be 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: "localhost".to_string(),
            user: "root".to_string(),
            database: "defaultdb".to_string(),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// How `cockroach start-single-node` is launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CockroachConfig {
    /// Binary name or path
    pub binary: String,
    /// In-memory store size, a fraction of RAM ("0.25") or absolute ("512MiB")
    pub store_size: String,
    /// Database the connection URL points at.
    ///
    /// [`DevroachConfig::cockroach_config`] overrides it with
    /// [`ProvisionerConfig::database`].
    pub database: String,
    pub startup_timeout: Duration,
    pub stop_timeout: Duration,
    pub poll_interval: Duration,
    /// Appended verbatim to the command line
    pub extra_args: Vec<String>,
}

impl CockroachConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(binary) = lookup(ENV_COCKROACH_BIN) {
            config.binary = binary;
        }
        if let Some(size) = lookup(ENV_STORE_SIZE) {
            config.store_size = size;
        }
        if let Some(ms) = lookup(ENV_STARTUP_TIMEOUT_MS) {
            config.startup_timeout = parse_millis("startup_timeout", &ms)?;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.binary.trim().is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "binary".to_string(),
                reason: "Cockroach binary cannot be empty".to_string(),
            });
        }
        if self.store_size.trim().is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "store_size".to_string(),
                reason: "Store size cannot be empty".to_string(),
            });
        }
        if self.startup_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed {
                field: "startup_timeout".to_string(),
                reason: "Startup timeout cannot be 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for CockroachConfig {
    fn default() -> Self {
        Self {
            binary: "cockroach".to_string(),
            store_size: "0.25".to_string(),
            database: "defaultdb".to_string(),
            startup_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            extra_args: Vec::new(),
        }
    }
}

fn parse_millis(field: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "a duration in milliseconds".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DevroachConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.provisioner.port, DEFAULT_PORT);
        assert_eq!(
            config.provisioner.url(),
            "postgresql://root@localhost:26257/defaultdb?sslmode=disable"
        );
        assert_eq!(config.cockroach.binary, "cockroach");
        assert_eq!(config.cockroach.startup_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_env_overrides() {
        let config = DevroachConfig::from_lookup(lookup(&[
            (ENV_COCKROACH_BIN, "/opt/cockroach/cockroach"),
            (ENV_STORE_SIZE, "512MiB"),
            (ENV_STARTUP_TIMEOUT_MS, "5000"),
            (ENV_PROBE_TIMEOUT_MS, "250"),
        ]))
        .unwrap();

        assert_eq!(config.cockroach.binary, "/opt/cockroach/cockroach");
        assert_eq!(config.cockroach.store_size, "512MiB");
        assert_eq!(config.cockroach.startup_timeout, Duration::from_millis(5000));
        assert_eq!(config.provisioner.probe_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_timeout_is_rejected() {
        let err = DevroachConfig::from_lookup(lookup(&[(ENV_STARTUP_TIMEOUT_MS, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "startup_timeout"));
    }

    #[test]
    fn test_zero_timeout_fails_validation() {
        let err = DevroachConfig::from_lookup(lookup(&[(ENV_PROBE_TIMEOUT_MS, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed { ref field, .. } if field == "probe_timeout"));
    }

    #[test]
    fn test_port_zero_fails_validation() {
        let config = ProvisionerConfig {
            port: 0,
            ..ProvisionerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cockroach_config_follows_provisioner_database() {
        let mut config = DevroachConfig::default();
        config.provisioner.database = "app_dev".to_string();
        config.cockroach.database = "stale".to_string();
        config.cockroach.store_size = "512MiB".to_string();

        let cockroach = config.cockroach_config();

        assert_eq!(cockroach.database, "app_dev");
        assert_eq!(cockroach.store_size, "512MiB");
    }

    #[test]
    fn test_pool_bounds_validation() {
        let mut config = DevroachConfig::default();
        config.pool.min_connections = 20;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { ref field, .. }) if field == "pool.min_connections"
        ));
    }
}
