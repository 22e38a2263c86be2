//! Service Discovery
//!
//! A [`Discovery`] yields server addresses in `protocol@addr` form and picks
//! one per call according to a [`SelectMode`].
//!
//! - [`MultiServersDiscovery`]: a fixed, user-supplied list
//! - [`RegistryDiscovery`]: the same list, refreshed from a registry over HTTP
//!   once it is older than the refresh interval

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use wirerpc_common::{Result, RpcError, SERVERS_HEADER};

/// How long a [`RegistryDiscovery`] trusts its last refresh.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Load-balancing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniformly random server per call.
    Random,
    /// Servers in list order, wrapping around.
    RoundRobin,
}

/// Source of server addresses.
pub trait Discovery: Send + Sync + 'static {
    /// Pulls a fresh list from wherever the servers are recorded.
    fn refresh(&self) -> impl Future<Output = Result<()>> + Send;

    /// Replaces the list by hand.
    fn update(&self, servers: Vec<String>) -> impl Future<Output = Result<()>> + Send;

    /// Picks one server.
    fn get(&self, mode: SelectMode) -> impl Future<Output = Result<String>> + Send;

    /// Returns every known server.
    fn get_all(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Discovery over a fixed list of servers.
///
/// # Example
///
/// ```
/// use wirerpc_client::{MultiServersDiscovery, SelectMode};
///
/// let d = MultiServersDiscovery::new(vec!["tcp@a:1".into(), "tcp@b:1".into()]);
/// assert_eq!(d.select(SelectMode::RoundRobin).unwrap(), "tcp@a:1");
/// assert_eq!(d.select(SelectMode::RoundRobin).unwrap(), "tcp@b:1");
/// assert_eq!(d.select(SelectMode::RoundRobin).unwrap(), "tcp@a:1");
/// ```
pub struct MultiServersDiscovery {
    servers: RwLock<Vec<String>>,
    index: AtomicUsize,
}

impl MultiServersDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers: RwLock::new(servers),
            index: AtomicUsize::new(0),
        }
    }

    /// Picks one server; each round-robin pick advances the shared counter once.
    pub fn select(&self, mode: SelectMode) -> Result<String> {
        let servers = self.servers.read().unwrap_or_else(|e| e.into_inner());
        let n = servers.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServers);
        }
        let i = match mode {
            SelectMode::Random => rand::thread_rng().gen_range(0..n),
            SelectMode::RoundRobin => self.index.fetch_add(1, Ordering::Relaxed) % n,
        };
        Ok(servers[i].clone())
    }

    pub fn servers(&self) -> Vec<String> {
        self.servers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_servers(&self, servers: Vec<String>) {
        *self.servers.write().unwrap_or_else(|e| e.into_inner()) = servers;
    }
}

impl Discovery for MultiServersDiscovery {
    /// A static list has nothing to refresh.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.set_servers(servers);
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.select(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.servers())
    }
}

/// Discovery backed by a registry.
///
/// Before every lookup the list is refreshed with an HTTP `GET` on the
/// registry if the last refresh is older than the update timeout. A failed
/// refresh is returned to the caller instead of serving the stale list.
pub struct RegistryDiscovery {
    servers: MultiServersDiscovery,
    registry: String,
    timeout: Duration,
    last_update: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    /// Creates a discovery reading from `registry` (a full URL including the
    /// registry path). A zero `timeout` selects [`DEFAULT_UPDATE_TIMEOUT`].
    pub fn new(registry: impl Into<String>, timeout: Duration) -> Self {
        Self {
            servers: MultiServersDiscovery::new(Vec::new()),
            registry: registry.into(),
            timeout: if timeout.is_zero() {
                DEFAULT_UPDATE_TIMEOUT
            } else {
                timeout
            },
            last_update: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(&self.registry)
            .send()
            .await
            .map_err(|e| RpcError::Registry(format!("refresh failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RpcError::Registry(format!(
                "refresh failed: registry answered {}",
                response.status()
            )));
        }

        let header = response
            .headers()
            .get(SERVERS_HEADER)
            .map(|value| value.to_str().unwrap_or_default())
            .unwrap_or_default();
        Ok(parse_servers(header))
    }
}

impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        let mut last_update = self.last_update.lock().await;
        if let Some(at) = *last_update {
            if at + self.timeout > Instant::now() {
                return Ok(());
            }
        }

        info!(registry = %self.registry, "rpc discovery: refreshing servers from registry");
        let servers = self.fetch().await?;
        debug!(count = servers.len(), "rpc discovery: registry returned servers");
        self.servers.set_servers(servers);
        *last_update = Some(Instant::now());
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        let mut last_update = self.last_update.lock().await;
        self.servers.set_servers(servers);
        *last_update = Some(Instant::now());
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh().await?;
        self.servers.select(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh().await?;
        Ok(self.servers.servers())
    }
}

/// Splits a comma-joined server list, dropping empty entries.
pub fn parse_servers(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn abc() -> MultiServersDiscovery {
        MultiServersDiscovery::new(vec!["A".into(), "B".into(), "C".into()])
    }

    #[test]
    fn test_round_robin() {
        let d = abc();
        let picks: Vec<String> = (0..6).map(|_| d.select(SelectMode::RoundRobin).unwrap()).collect();
        assert_eq!(picks, vec!["A", "B", "C", "A", "B", "C"]);
    }

    #[test]
    fn test_random_stays_in_list() {
        let d = abc();
        for _ in 0..100 {
            let pick = d.select(SelectMode::Random).unwrap();
            assert!(["A", "B", "C"].contains(&pick.as_str()));
        }
    }

    #[test]
    fn test_empty_list_errors() {
        let d = MultiServersDiscovery::new(Vec::new());
        assert!(matches!(d.select(SelectMode::Random), Err(RpcError::NoAvailableServers)));
        assert!(matches!(d.select(SelectMode::RoundRobin), Err(RpcError::NoAvailableServers)));
    }

    #[test]
    fn test_concurrent_round_robin_is_even() {
        let d = Arc::new(abc());
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let d = d.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| d.select(SelectMode::RoundRobin).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for pick in handle.join().unwrap() {
                *counts.entry(pick).or_default() += 1;
            }
        }
        assert_eq!(counts["A"], 100);
        assert_eq!(counts["B"], 100);
        assert_eq!(counts["C"], 100);
    }

    #[tokio::test]
    async fn test_update_replaces_list() {
        let d = abc();
        d.update(vec!["D".into()]).await.unwrap();
        assert_eq!(d.get(SelectMode::RoundRobin).await.unwrap(), "D");
        assert_eq!(d.get_all().await.unwrap(), vec!["D"]);
    }

    #[test]
    fn test_parse_servers() {
        assert_eq!(parse_servers("tcp@a:1,tcp@b:2"), vec!["tcp@a:1", "tcp@b:2"]);
        assert_eq!(parse_servers(" tcp@a:1 , ,"), vec!["tcp@a:1"]);
        assert!(parse_servers("").is_empty());
    }

    #[tokio::test]
    async fn test_registry_refresh_error_propagates() {
        // Nothing listens on port 1.
        let d = RegistryDiscovery::new("http://127.0.0.1:1/_wirerpc_/registry", Duration::ZERO);
        let err = d.get(SelectMode::Random).await.unwrap_err();
        assert!(matches!(err, RpcError::Registry(_)));
    }

    #[tokio::test]
    async fn test_registry_update_skips_refresh() {
        let d = RegistryDiscovery::new("http://127.0.0.1:1/_wirerpc_/registry", Duration::from_secs(60));
        d.update(vec!["tcp@a:1".into()]).await.unwrap();
        assert_eq!(d.get(SelectMode::RoundRobin).await.unwrap(), "tcp@a:1");
    }
}
