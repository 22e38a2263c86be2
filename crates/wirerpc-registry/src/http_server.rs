//! HTTP Server for the Registry
//!
//! One path, three methods:
//!
//! - `GET` - live servers, comma-joined in the `X-Wirerpc-Servers` response header
//! - `POST` - register or refresh the server named in `X-Wirerpc-Server`
//! - `DELETE` - deregister the server named in `X-Wirerpc-Server`
//!
//! A `POST`/`DELETE` without the header is answered with `500`; any other
//! method gets `405`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use wirerpc_common::{Result, RpcError, DEFAULT_REGISTRY_PATH, SERVERS_HEADER, SERVER_HEADER};

use crate::registry::Registry;

/// HTTP front end for a [`Registry`].
pub struct RegistryServer {
    registry: Arc<Registry>,
    path: String,
}

impl RegistryServer {
    /// Serves `registry` on [`DEFAULT_REGISTRY_PATH`].
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            path: DEFAULT_REGISTRY_PATH.to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Builds the axum router, for mounting into a larger app.
    pub fn router(&self) -> axum::Router {
        axum::Router::new()
            .route(
                &self.path,
                get(list_servers).post(register_server).delete(deregister_server),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.registry.clone())
    }

    /// Runs the registry.
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "0.0.0.0:9999")
    ///
    /// # Behavior
    /// - Binds to the specified address
    /// - Logs the listening address
    /// - Runs indefinitely until shutdown
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(
            "rpc registry: listening on {}{}",
            listener
                .local_addr()
                .map_err(|e| RpcError::Transport(format!("Failed to get local addr: {}", e)))?,
            self.path
        );

        axum::serve(listener, self.router())
            .await
            .map_err(|e| RpcError::Transport(format!("Registry server error: {}", e)))
    }
}

async fn list_servers(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let servers = registry.alive_servers().join(",");
    (StatusCode::OK, [(SERVERS_HEADER, servers)])
}

async fn register_server(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    match server_addr(&headers) {
        Some(addr) => {
            debug!(addr = %addr, "rpc registry: heartbeat");
            registry.put_server(addr);
            StatusCode::OK
        }
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn deregister_server(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    match server_addr(&headers) {
        Some(addr) => {
            if registry.remove_server(addr) {
                info!(addr = %addr, "rpc registry: server removed");
            }
            StatusCode::OK
        }
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn server_addr(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SERVER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
}
