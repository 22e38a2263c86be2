//! HTTP Entry for the RPC Server
//!
//! Lets RPC traffic share a port with HTTP. A client sends
//! `CONNECT /_wirerpc_ HTTP/1.0`; the server answers
//! `HTTP/1.0 200 Connected to WireRPC` and from then on the upgraded stream
//! speaks the plain RPC protocol, served by [`Server::serve_conn`].
//!
//! # Routes
//!
//! - `CONNECT <rpc path>` - tunnel into the RPC server
//! - any other method on `<rpc path>` - `405 must CONNECT`
//! - `GET <debug path>` - JSON list of services, methods and call counts
//! - anything else - `404`
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wirerpc_server::{HttpServer, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Arc::new(Server::new());
//!     HttpServer::new(server).run("127.0.0.1:9999".parse().unwrap()).await.unwrap();
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::ext::ReasonPhrase;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode, Version};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use wirerpc_common::{Result, RpcError, CONNECTED_REASON, DEFAULT_DEBUG_PATH, DEFAULT_RPC_PATH};

use crate::server::Server;

type HttpResponse = Response<Full<Bytes>>;

/// HTTP front door for a [`Server`].
pub struct HttpServer {
    server: Arc<Server>,
    rpc_path: String,
    debug_path: String,
}

impl HttpServer {
    /// Creates an HTTP entry on the default RPC and debug paths.
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            rpc_path: DEFAULT_RPC_PATH.to_string(),
            debug_path: DEFAULT_DEBUG_PATH.to_string(),
        }
    }

    pub fn with_rpc_path(mut self, path: impl Into<String>) -> Self {
        self.rpc_path = path.into();
        self
    }

    pub fn with_debug_path(mut self, path: impl Into<String>) -> Self {
        self.debug_path = path.into();
        self
    }

    /// Binds `addr` and serves until the server shuts down.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serves HTTP on an already bound listener.
    ///
    /// Returns `Ok(())` after [`Server::shutdown`].
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        tracing::info!(
            "rpc server: HTTP entry listening on {}",
            listener
                .local_addr()
                .map_err(|e| RpcError::Transport(format!("Failed to get local address: {}", e)))?
        );

        let this = Arc::new(self);
        loop {
            let (stream, _) = tokio::select! {
                _ = this.server.shutdown_token().cancelled() => return Ok(()),
                accepted = listener.accept() => accepted
                    .map_err(|e| RpcError::Transport(format!("Failed to accept connection: {}", e)))?,
            };

            let io = TokioIo::new(stream);
            let this = this.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let this = this.clone();
                    async move { Ok::<_, Infallible>(this.handle_request(req)) }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    tracing::error!("Error serving connection: {}", err);
                }
            });
        }
    }

    fn handle_request(&self, req: Request<Incoming>) -> HttpResponse {
        let path = req.uri().path();

        if path == self.rpc_path {
            if req.method() != Method::CONNECT {
                return text(StatusCode::METHOD_NOT_ALLOWED, "405 must CONNECT\n");
            }
            return self.connect(req);
        }

        if path == self.debug_path && req.method() == Method::GET {
            return self.debug();
        }

        text(StatusCode::NOT_FOUND, "404 page not found\n")
    }

    /// Answers the CONNECT and hands the upgraded stream to the RPC server.
    fn connect(&self, req: Request<Incoming>) -> HttpResponse {
        let server = self.server.clone();
        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => server.serve_conn(TokioIo::new(upgraded)).await,
                Err(e) => tracing::error!(error = %e, "rpc server: CONNECT upgrade failed"),
            }
        });

        let mut response = Response::new(Full::new(Bytes::new()));
        *response.version_mut() = Version::HTTP_10;
        response
            .extensions_mut()
            .insert(ReasonPhrase::from_static(CONNECTED_REASON.as_bytes()));
        response
    }

    fn debug(&self) -> HttpResponse {
        match serde_json::to_vec(&self.server.snapshot()) {
            Ok(body) => {
                let mut response = Response::new(Full::new(Bytes::from(body)));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static("application/json"),
                );
                response
            }
            Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, &format!("{}\n", e)),
        }
    }
}

fn text(status: StatusCode, body: &str) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Service, ServiceInfo};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start() -> (SocketAddr, Arc<Server>) {
        let server = Arc::new(Server::new());
        server
            .register(Service::new("Foo").method("Double", |x: i64| async move { Ok::<_, String>(x * 2) }))
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(HttpServer::new(server.clone()).serve(listener));
        (addr, server)
    }

    #[tokio::test]
    async fn test_connect_response_line() {
        let (addr, _server) = start().await;
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("CONNECT {} HTTP/1.0\r\n\r\n", DEFAULT_RPC_PATH).as_bytes())
            .await
            .unwrap();

        let mut buf = vec![0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        let head = String::from_utf8_lossy(&buf[..n]);
        assert!(
            head.starts_with("HTTP/1.0 200 Connected to WireRPC\r\n"),
            "unexpected response: {}",
            head
        );
    }

    #[tokio::test]
    async fn test_rpc_path_requires_connect() {
        let (addr, _server) = start().await;
        let response = reqwest::get(format!("http://{}{}", addr, DEFAULT_RPC_PATH))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.text().await.unwrap(), "405 must CONNECT\n");
    }

    #[tokio::test]
    async fn test_debug_lists_services() {
        let (addr, _server) = start().await;
        let response = reqwest::get(format!("http://{}{}", addr, DEFAULT_DEBUG_PATH))
            .await
            .unwrap();
        assert!(response.status().is_success());

        let body = response.bytes().await.unwrap();
        let services: Vec<ServiceInfo> = serde_json::from_slice(&body).unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "Foo");
        assert_eq!(services[0].methods[0].name, "Double");
        assert_eq!(services[0].methods[0].calls, 0);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (addr, server) = start().await;
        let response = reqwest::get(format!("http://{}/nope", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        server.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
