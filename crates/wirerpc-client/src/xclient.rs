//! Load-balanced client.
//!
//! [`XClient`] resolves an address through a [`Discovery`] for every call
//! and keeps one cached [`Client`] per address. Cached clients that are no
//! longer available are closed and replaced on the next call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wirerpc_common::{Options, Result, RpcError};

use crate::client::Client;
use crate::discovery::{Discovery, SelectMode};

/// One cached client per `protocol@addr`.
struct ClientCache {
    opt: Options,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl ClientCache {
    /// Returns the cached client for `rpc_addr`, dialing a new one if there is
    /// none or the cached one is no longer available.
    ///
    /// The cache lock is not held while dialing, so a slow address does not
    /// stall calls to the others.
    async fn dial(&self, rpc_addr: &str) -> Result<Arc<Client>> {
        if let Some(client) = self.cached(rpc_addr).await {
            return Ok(client);
        }

        let dialed = Arc::new(Client::xdial(rpc_addr, self.opt.clone()).await?);

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(rpc_addr) {
            if client.is_available() {
                // Lost a race with a concurrent dial; keep the cached one.
                let client = client.clone();
                drop(clients);
                let _ = dialed.close().await;
                return Ok(client);
            }
        }
        clients.insert(rpc_addr.to_string(), dialed.clone());
        Ok(dialed)
    }

    /// Looks up an available client, evicting an unavailable one.
    async fn cached(&self, rpc_addr: &str) -> Option<Arc<Client>> {
        let stale = {
            let mut clients = self.clients.lock().await;
            match clients.get(rpc_addr) {
                Some(client) if client.is_available() => return Some(client.clone()),
                Some(_) => clients.remove(rpc_addr),
                None => None,
            }
        };
        if let Some(stale) = stale {
            debug!(addr = %rpc_addr, "rpc xclient: evicting unavailable client");
            // Already shut down; only the bookkeeping is left.
            let _ = stale.close().await;
        }
        None
    }

    async fn close(&self) {
        let mut clients = self.clients.lock().await;
        for (addr, client) in clients.drain() {
            if let Err(e) = client.close().await {
                debug!(addr = %addr, error = %e, "rpc xclient: client already closed");
            }
        }
    }
}

/// Client that balances calls across the servers of a [`Discovery`].
///
/// # Example
///
/// ```no_run
/// use wirerpc_client::{MultiServersDiscovery, SelectMode, XClient};
/// use wirerpc_common::Options;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let discovery = MultiServersDiscovery::new(vec![
///     "tcp@127.0.0.1:9001".into(),
///     "tcp@127.0.0.1:9002".into(),
/// ]);
/// let xc = XClient::new(discovery, SelectMode::RoundRobin, Options::default());
/// let sum: i64 = xc.call("Foo.Double", 21i64).await?;
/// xc.close().await;
/// # Ok(())
/// # }
/// ```
pub struct XClient<D> {
    discovery: D,
    mode: SelectMode,
    cache: Arc<ClientCache>,
}

impl<D: Discovery> XClient<D> {
    pub fn new(discovery: D, mode: SelectMode, opt: Options) -> Self {
        Self {
            discovery,
            mode,
            cache: Arc::new(ClientCache {
                opt,
                clients: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn discovery(&self) -> &D {
        &self.discovery
    }

    /// Calls `service_method` on one server picked by the select mode.
    pub async fn call<A, R>(&self, service_method: &str, args: A) -> Result<R>
    where
        A: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let rpc_addr = self.discovery.get(self.mode).await?;
        let client = self.cache.dial(&rpc_addr).await?;
        client.call(service_method, args).await
    }

    /// Like [`XClient::call`] with a per-call timeout (zero means no limit).
    pub async fn call_timeout<A, R>(&self, service_method: &str, args: A, timeout: Duration) -> Result<R>
    where
        A: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let rpc_addr = self.discovery.get(self.mode).await?;
        let client = self.cache.dial(&rpc_addr).await?;
        client.call_timeout(service_method, args, timeout).await
    }

    /// Calls `service_method` on every server concurrently.
    ///
    /// The first failure cancels the calls still in flight and is returned.
    /// If `reply` is given it receives the first successful reply; later
    /// replies are dropped. With `None` replies are not decoded at all.
    pub async fn broadcast<A, R>(&self, service_method: &str, args: A, reply: Option<&mut R>) -> Result<()>
    where
        A: Serialize + Clone + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        self.broadcast_with(&CancellationToken::new(), service_method, args, reply)
            .await
    }

    /// Like [`XClient::broadcast`], also stopping when `cancel` fires.
    pub async fn broadcast_with<A, R>(
        &self,
        cancel: &CancellationToken,
        service_method: &str,
        args: A,
        mut reply: Option<&mut R>,
    ) -> Result<()>
    where
        A: Serialize + Clone + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let servers = self.discovery.get_all().await?;
        let cancel = cancel.child_token();
        let decode_reply = reply.is_some();

        let mut calls = JoinSet::new();
        for rpc_addr in servers {
            let cache = self.cache.clone();
            let cancel = cancel.clone();
            let args = args.clone();
            let service_method = service_method.to_string();
            calls.spawn(async move {
                let client = cache.dial(&rpc_addr).await?;
                client
                    .invoke::<A, R, _>(
                        &service_method,
                        args,
                        async move { cancel.cancelled().await },
                        RpcError::Cancelled,
                        decode_reply,
                    )
                    .await
            });
        }

        let mut first_err = None;
        let mut reply_set = false;
        while let Some(joined) = calls.join_next().await {
            let outcome = joined.unwrap_or_else(|e| Err(RpcError::Transport(format!("broadcast task failed: {}", e))));
            match outcome {
                Ok(Some(value)) if !reply_set => {
                    if let Some(slot) = reply.as_deref_mut() {
                        *slot = value;
                        reply_set = true;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if first_err.is_none() {
                        warn!(method = %service_method, error = %e, "rpc xclient: broadcast call failed");
                        cancel.cancel();
                        first_err = Some(e);
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes and forgets every cached client.
    pub async fn close(&self) {
        self.cache.close().await;
    }
}
