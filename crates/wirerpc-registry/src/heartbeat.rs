//! Server heartbeats.
//!
//! A server keeps its registry entry alive by re-registering on a fixed
//! interval. The first failed heartbeat stops the loop and the server is
//! deregistered on a best-effort basis.

use std::time::Duration;

use reqwest::Method;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use wirerpc_common::{Result, RpcError, SERVER_HEADER};

use crate::registry::DEFAULT_TIMEOUT;

/// Interval used when none is given: one minute inside the default timeout.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(DEFAULT_TIMEOUT.as_secs() - 60);

/// Periodic registration of one server with one registry.
pub struct Heartbeat {
    registry: String,
    addr: String,
    interval: Duration,
    http: reqwest::Client,
}

impl Heartbeat {
    /// Creates a heartbeat for `addr` (`protocol@host:port`) against the
    /// registry URL. A zero `interval` selects [`DEFAULT_HEARTBEAT_INTERVAL`].
    pub fn new(registry: impl Into<String>, addr: impl Into<String>, interval: Duration) -> Self {
        Self {
            registry: registry.into(),
            addr: addr.into(),
            interval: if interval.is_zero() {
                DEFAULT_HEARTBEAT_INTERVAL
            } else {
                interval
            },
            http: reqwest::Client::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts the heartbeat task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Main heartbeat loop
    async fn run(self) {
        info!(registry = %self.registry, addr = %self.addr, "rpc registry: sending heartbeats");

        let mut result = self.send(Method::POST).await;
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        while result.is_ok() {
            ticker.tick().await;
            result = self.send(Method::POST).await;
        }

        if let Err(e) = result {
            warn!(addr = %self.addr, error = %e, "rpc registry: heartbeat failed, deregistering");
        }
        if let Err(e) = self.send(Method::DELETE).await {
            debug!(addr = %self.addr, error = %e, "rpc registry: deregister failed");
        }
    }

    async fn send(&self, method: Method) -> Result<()> {
        send(&self.http, method, &self.registry, &self.addr).await
    }
}

async fn send(http: &reqwest::Client, method: Method, registry: &str, addr: &str) -> Result<()> {
    let response = http
        .request(method.clone(), registry)
        .header(SERVER_HEADER, addr)
        .send()
        .await
        .map_err(|e| RpcError::Registry(format!("{} {} failed: {}", method, registry, e)))?;

    if !response.status().is_success() {
        return Err(RpcError::Registry(format!(
            "{} {} answered {}",
            method,
            registry,
            response.status()
        )));
    }
    Ok(())
}

/// Removes `addr` from the registry right away, e.g. on graceful shutdown.
pub async fn deregister(registry: &str, addr: &str) -> Result<()> {
    send(&reqwest::Client::new(), Method::DELETE, registry, addr).await
}

/// Shorthand for `Heartbeat::new(registry, addr, interval).spawn()`.
pub fn heartbeat(registry: impl Into<String>, addr: impl Into<String>, interval: Duration) -> JoinHandle<()> {
    Heartbeat::new(registry, addr, interval).spawn()
}
