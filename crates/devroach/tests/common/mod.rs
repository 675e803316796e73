//! Scripted backend and instance provider that record every call

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use devroach::{
    BackendError, BackendResult, Context, DatabaseBackend, DatabasePool, DatabasePoolConfig, DatabasePoolStats,
    InstanceError, InstanceHandle, InstanceProvider, Provisioner, ProvisionerConfig,
};

pub const WELL_KNOWN_URL: &str = "postgresql://root@localhost:26257/defaultdb?sslmode=disable";

/// URL a started mock instance reports for `port`
pub fn started_url(port: u16) -> String {
    let port = if port == 0 { 41234 } else { port };
    format!("postgresql://root@127.0.0.1:{}/defaultdb?sslmode=disable", port)
}

/// What the fake world looks like before the provisioner runs
#[derive(Default)]
pub struct Scenario {
    /// A database already answers at the well-known URL
    pub existing: bool,
    /// The existing database accepts connections but fails the ping
    pub existing_ping_fails: bool,
    /// Connecting to the well-known URL never completes
    pub existing_hangs: bool,
    pub start_error: Option<InstanceError>,
    /// Pools to a started instance cannot be opened
    pub pool_connect_fails: bool,
    pub failing_sql: Option<String>,
    /// Executing this statement never completes
    pub hanging_sql: Option<String>,
}

impl Scenario {
    pub fn build(self) -> (Provisioner<MockBackend, MockProvider>, Arc<World>) {
        let world = Arc::new(World {
            log: Mutex::new(Vec::new()),
            connect_configs: Mutex::new(Vec::new()),
            running: Mutex::new(Vec::new()),
            start_error: Mutex::new(self.start_error),
            existing: self.existing,
            existing_ping_fails: self.existing_ping_fails,
            existing_hangs: self.existing_hangs,
            pool_connect_fails: self.pool_connect_fails,
            failing_sql: self.failing_sql,
            hanging_sql: self.hanging_sql,
        });

        let provisioner = Provisioner::new(
            MockBackend(world.clone()),
            MockProvider(world.clone()),
            ProvisionerConfig::default(),
        );
        (provisioner, world)
    }
}

pub struct World {
    log: Mutex<Vec<String>>,
    connect_configs: Mutex<Vec<(String, DatabasePoolConfig)>>,
    running: Mutex<Vec<String>>,
    start_error: Mutex<Option<InstanceError>>,
    existing: bool,
    existing_ping_fails: bool,
    existing_hangs: bool,
    pool_connect_fails: bool,
    failing_sql: Option<String>,
    hanging_sql: Option<String>,
}

impl World {
    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Pool settings passed to each connect, with the URL connected to
    pub fn connect_configs(&self) -> Vec<(String, DatabasePoolConfig)> {
        self.connect_configs.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|call| call.starts_with(prefix)).count()
    }

    /// Instances started and not yet stopped
    pub fn running(&self) -> Vec<String> {
        self.running.lock().unwrap().clone()
    }

    fn reachable(&self, url: &str) -> bool {
        if url == WELL_KNOWN_URL && self.existing {
            return true;
        }
        !self.pool_connect_fails && self.running.lock().unwrap().iter().any(|running| running == url)
    }
}

pub struct MockBackend(Arc<World>);

#[async_trait]
impl DatabaseBackend for MockBackend {
    type Pool = MockPool;

    async fn connect(&self, database_url: &str, config: &DatabasePoolConfig) -> BackendResult<MockPool> {
        self.0.record(format!("connect {}", database_url));
        self.0
            .connect_configs
            .lock()
            .unwrap()
            .push((database_url.to_string(), config.clone()));
        if database_url == WELL_KNOWN_URL && self.0.existing_hangs {
            std::future::pending::<()>().await;
        }
        if !self.0.reachable(database_url) {
            return Err(BackendError::Connection(format!("connection refused: {}", database_url)));
        }
        Ok(MockPool {
            world: self.0.clone(),
            url: database_url.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct MockPool {
    world: Arc<World>,
    url: String,
}

impl std::fmt::Debug for MockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPool").field("url", &self.url).finish()
    }
}

#[async_trait]
impl DatabasePool for MockPool {
    async fn execute_script(&self, sql: &str) -> BackendResult<()> {
        self.world.record(format!("execute {}", sql));
        if self.world.hanging_sql.as_deref() == Some(sql) {
            std::future::pending::<()>().await;
        }
        if self.world.failing_sql.as_deref() == Some(sql) {
            return Err(BackendError::Query(format!("syntax error in: {}", sql)));
        }
        Ok(())
    }

    async fn ping(&self) -> BackendResult<Duration> {
        self.world.record("ping");
        if self.url == WELL_KNOWN_URL && self.world.existing_ping_fails {
            return Err(BackendError::Connection("server closed the connection".to_string()));
        }
        Ok(Duration::from_millis(1))
    }

    async fn close(&self) {
        self.world.record("close");
    }

    fn stats(&self) -> DatabasePoolStats {
        DatabasePoolStats::default()
    }
}

pub struct MockProvider(Arc<World>);

#[async_trait]
impl InstanceProvider for MockProvider {
    async fn start(&self, _ctx: &Context, port: u16) -> Result<Box<dyn InstanceHandle>, InstanceError> {
        self.0.record(format!("start {}", port));
        if let Some(error) = self.0.start_error.lock().unwrap().take() {
            return Err(error);
        }

        let url = started_url(port);
        self.0.running.lock().unwrap().push(url.clone());
        Ok(Box::new(MockInstance {
            world: self.0.clone(),
            url,
        }))
    }
}

#[derive(Debug)]
pub struct MockInstance {
    world: Arc<World>,
    url: String,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World").field("log", &self.calls()).finish()
    }
}

#[async_trait]
impl InstanceHandle for MockInstance {
    fn url(&self) -> &str {
        &self.url
    }

    async fn stop(self: Box<Self>) -> Result<(), InstanceError> {
        self.world.record("stop");
        self.world.running.lock().unwrap().retain(|running| running != &self.url);
        Ok(())
    }
}
