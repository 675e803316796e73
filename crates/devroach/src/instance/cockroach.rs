//! In-memory CockroachDB single-node instances
//!
//! The node is started insecure with an in-memory store, so everything it
//! holds disappears when the process stops. Readiness is signalled by the
//! node writing its SQL URL to `--listening-url-file`.

use std::fs::File;
use std::net::{Ipv4Addr, TcpListener};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use url::Url;

use super::{InstanceError, InstanceHandle, InstanceProvider};
use crate::config::CockroachConfig;
use crate::context::Context;

const LISTENING_URL_FILE: &str = "listening-url";
const OUTPUT_FILE: &str = "output.log";
/// Bytes of process output kept in an `Exited` error
const OUTPUT_TAIL: usize = 2048;

/// Starts `cockroach start-single-node` processes
#[derive(Debug, Clone)]
pub struct CockroachProvider {
    config: CockroachConfig,
}

impl CockroachProvider {
    pub fn new(config: CockroachConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CockroachConfig {
        &self.config
    }

    fn command(&self, port: u16, workdir: &Path) -> Result<Command, InstanceError> {
        let output = File::create(workdir.join(OUTPUT_FILE))?;
        let errors = output.try_clone()?;

        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("start-single-node")
            .arg("--insecure")
            .arg(format!("--store=type=mem,size={}", self.config.store_size))
            .arg(format!("--listen-addr=localhost:{}", port))
            .arg("--http-addr=localhost:0")
            .arg(format!(
                "--listening-url-file={}",
                workdir.join(LISTENING_URL_FILE).display()
            ))
            .arg(format!("--log-dir={}", workdir.join("logs").display()))
            .args(&self.config.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::from(errors))
            .kill_on_drop(true);

        Ok(cmd)
    }

    async fn wait_until_ready(&self, child: &mut Child, workdir: &Path) -> Result<String, InstanceError> {
        match tokio::time::timeout(self.config.startup_timeout, self.poll_ready(child, workdir)).await {
            Ok(result) => result,
            Err(_) => Err(InstanceError::StartupTimeout(self.config.startup_timeout)),
        }
    }

    async fn poll_ready(&self, child: &mut Child, workdir: &Path) -> Result<String, InstanceError> {
        let url_file = workdir.join(LISTENING_URL_FILE);

        loop {
            if let Some(status) = child.try_wait()? {
                return Err(InstanceError::Exited {
                    status: status.to_string(),
                    output: read_output_tail(&workdir.join(OUTPUT_FILE)),
                });
            }

            match tokio::fs::read_to_string(&url_file).await {
                // The node writes the file once it accepts SQL connections
                Ok(contents) if !contents.trim().is_empty() => {
                    return Ok(contents.trim().to_string());
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(InstanceError::Io(e)),
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn launch(&self, ctx: &Context, port: u16) -> Result<CockroachInstance, InstanceError> {
        if port != 0 {
            ensure_port_free(port)?;
        }

        let workdir = tempfile::Builder::new().prefix("devroach-").tempdir()?;
        let mut child = self
            .command(port, workdir.path())?
            .spawn()
            .map_err(|source| InstanceError::Spawn {
                binary: self.config.binary.clone(),
                source,
            })?;

        let ready = match ctx.run(self.wait_until_ready(&mut child, workdir.path())).await {
            Ok(result) => result.and_then(|advertised| self.connection_url(&advertised)),
            Err(interrupted) => Err(interrupted.into()),
        };
        let url = match ready {
            Ok(url) => url,
            Err(e) => {
                kill(&mut child).await;
                return Err(e);
            }
        };

        Ok(CockroachInstance {
            url,
            child,
            workdir,
            stop_timeout: self.config.stop_timeout,
        })
    }

    /// Use the advertised host and port with the configured database, TLS off
    fn connection_url(&self, advertised: &str) -> Result<String, InstanceError> {
        let invalid = |reason: String| InstanceError::InvalidUrl {
            url: advertised.to_string(),
            reason,
        };

        let mut url = Url::parse(advertised).map_err(|e| invalid(e.to_string()))?;
        if url.port().is_none() {
            return Err(invalid("missing port".to_string()));
        }

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "sslmode")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        url.set_path(&format!("/{}", self.config.database));
        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair("sslmode", "disable");

        Ok(url.to_string())
    }
}

impl Default for CockroachProvider {
    fn default() -> Self {
        Self::new(CockroachConfig::default())
    }
}

#[async_trait]
impl InstanceProvider for CockroachProvider {
    async fn start(&self, ctx: &Context, port: u16) -> Result<Box<dyn InstanceHandle>, InstanceError> {
        let instance = self.launch(ctx, port).await?;
        tracing::debug!(
            target: "devroach",
            url = %instance.url,
            pid = instance.child.id(),
            workdir = %instance.workdir.path().display(),
            "cockroach node ready"
        );
        Ok(Box::new(instance))
    }
}

/// A running node; owns its process and scratch directory
#[derive(Debug)]
pub struct CockroachInstance {
    url: String,
    child: Child,
    workdir: TempDir,
    stop_timeout: Duration,
}

#[async_trait]
impl InstanceHandle for CockroachInstance {
    fn url(&self) -> &str {
        &self.url
    }

    async fn stop(mut self: Box<Self>) -> Result<(), InstanceError> {
        // Already exited on its own, nothing left to kill
        if self.child.try_wait()?.is_none() {
            self.child.start_kill()?;
        }

        let status = tokio::time::timeout(self.stop_timeout, self.child.wait())
            .await
            .map_err(|_| InstanceError::StopTimeout(self.stop_timeout))??;

        tracing::debug!(target: "devroach", url = %self.url, %status, "cockroach node stopped");
        self.workdir.close()?;
        Ok(())
    }
}

/// Fail fast when an unrelated process holds the port
fn ensure_port_free(port: u16) -> Result<(), InstanceError> {
    match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Err(InstanceError::PortInUse(port)),
        Err(e) => Err(InstanceError::Io(e)),
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(target: "devroach", error = %e, "failed to kill cockroach process");
    }
}

fn read_output_tail(path: &Path) -> String {
    let output = std::fs::read(path).unwrap_or_default();
    let start = output.len().saturating_sub(OUTPUT_TAIL);
    String::from_utf8_lossy(&output[start..]).trim().to_string()
}
