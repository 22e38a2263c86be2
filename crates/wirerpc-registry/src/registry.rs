//! Liveness registry.
//!
//! Servers announce themselves with periodic heartbeats; an entry whose last
//! heartbeat is older than the timeout is considered dead and is dropped the
//! next time the live set is queried.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Entry lifetime without a heartbeat.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Registry of live server addresses.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use wirerpc_registry::Registry;
///
/// # #[tokio::main]
/// # async fn main() {
/// let registry = Registry::new(Duration::from_secs(60));
/// registry.put_server("tcp@127.0.0.1:9001");
/// registry.put_server("tcp@127.0.0.1:9000");
/// assert_eq!(
///     registry.alive_servers(),
///     vec!["tcp@127.0.0.1:9000", "tcp@127.0.0.1:9001"]
/// );
/// # }
/// ```
pub struct Registry {
    /// Zero means entries never expire.
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn servers(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.servers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts `addr` or refreshes its heartbeat.
    pub fn put_server(&self, addr: &str) {
        self.servers().insert(addr.to_string(), Instant::now());
    }

    /// Returns true if `addr` was registered.
    pub fn remove_server(&self, addr: &str) -> bool {
        self.servers().remove(addr).is_some()
    }

    /// Sorted live addresses. Expired entries are evicted on the way.
    pub fn alive_servers(&self) -> Vec<String> {
        let now = Instant::now();
        let mut servers = self.servers();
        if !self.timeout.is_zero() {
            servers.retain(|addr, last_heartbeat| {
                let alive = *last_heartbeat + self.timeout > now;
                if !alive {
                    debug!(addr = %addr, "rpc registry: server expired");
                }
                alive
            });
        }
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_timeout() {
        let registry = Registry::new(Duration::from_secs(300));
        registry.put_server("tcp@a:1");

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(registry.alive_servers(), vec!["tcp@a:1"]);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.alive_servers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_refreshes_entry() {
        let registry = Registry::new(Duration::from_secs(10));
        registry.put_server("tcp@a:1");
        tokio::time::advance(Duration::from_secs(8)).await;
        registry.put_server("tcp@a:1");
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(registry.alive_servers(), vec!["tcp@a:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_never_expires() {
        let registry = Registry::new(Duration::ZERO);
        registry.put_server("tcp@a:1");
        tokio::time::advance(Duration::from_secs(24 * 60 * 60)).await;
        assert_eq!(registry.alive_servers(), vec!["tcp@a:1"]);
    }

    #[tokio::test]
    async fn test_remove_and_sorting() {
        let registry = Registry::default();
        registry.put_server("tcp@c:1");
        registry.put_server("tcp@a:1");
        registry.put_server("tcp@b:1");
        assert!(registry.remove_server("tcp@b:1"));
        assert!(!registry.remove_server("tcp@b:1"));
        assert_eq!(registry.alive_servers(), vec!["tcp@a:1", "tcp@c:1"]);
    }
}
