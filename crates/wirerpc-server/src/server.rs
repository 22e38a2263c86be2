//! Connection Server
//!
//! Owns the registered services and the codec registry, negotiates the
//! [`Options`] handshake on each accepted stream, and serves requests on it.
//!
//! # Connection lifecycle
//!
//! ```text
//! AwaitOption --valid--> Serving --read error / EOF--> draining --> Closed
//!      |
//!      +--bad magic / unknown codec / malformed--> Closed (no response)
//! ```
//!
//! Requests on one connection are handled concurrently; responses are
//! written one pair at a time under an async lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wirerpc_common::transport::{
    is_eof, read_frame, write_frame, Codec, CodecReader, CodecRegistry, CodecWriter,
};
use wirerpc_common::{Header, Options, Result, RpcError, HANDLE_TIMEOUT_PREFIX};

use crate::service::{BoxedValue, MethodType, Service, ServiceInfo};

/// RPC server.
///
/// Services are registered before (or while) connections are served; the
/// server is shared behind an `Arc` by the accept loops and the HTTP entry.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::net::TcpListener;
/// use wirerpc_server::{Server, Service};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Arc::new(Server::new());
/// server.register(
///     Service::new("Foo").method("Double", |x: i64| async move { Ok::<_, String>(x * 2) }),
/// )?;
///
/// let listener = TcpListener::bind("127.0.0.1:9999").await?;
/// server.accept(listener).await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
    codecs: CodecRegistry,
    shutdown: CancellationToken,
}

impl Server {
    /// Creates a server accepting every built-in codec.
    pub fn new() -> Self {
        Self::with_codecs(CodecRegistry::default())
    }

    /// Creates a server that only negotiates the codecs in `codecs`.
    pub fn with_codecs(codecs: CodecRegistry) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            codecs,
            shutdown: CancellationToken::new(),
        }
    }

    /// Publishes a service.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The service or one of its methods has an invalid name
    /// - The service has no methods
    /// - A service with the same name is already registered
    pub fn register(&self, service: Service) -> Result<()> {
        service.validate()?;
        let mut services = self
            .services
            .write()
            .map_err(|_| RpcError::Transport("service map poisoned".into()))?;
        if services.contains_key(service.name()) {
            return Err(RpcError::DuplicateService(service.name().to_string()));
        }
        info!(service = %service.name(), "rpc server: registered service");
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Resolves `Service.Method`, splitting on the last `.`.
    pub fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, Arc<MethodType>)> {
        let (service_name, method_name) = service_method
            .rsplit_once('.')
            .ok_or_else(|| RpcError::IllFormedMethod(service_method.to_string()))?;

        let service = self
            .services
            .read()
            .map_err(|_| RpcError::Transport("service map poisoned".into()))?
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;

        let method = service
            .method_type(method_name)
            .ok_or_else(|| RpcError::MethodNotFound(method_name.to_string()))?;

        Ok((service, method))
    }

    /// Services, methods and call counts, sorted by service name.
    pub fn snapshot(&self) -> Vec<ServiceInfo> {
        let mut infos: Vec<ServiceInfo> = match self.services.read() {
            Ok(services) => services.values().map(|s| s.info()).collect(),
            Err(_) => Vec::new(),
        };
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Stops every accept loop of this server.
    ///
    /// Connections already being served run until their peer disconnects.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Accepts TCP connections and serves each one on its own task.
    ///
    /// Returns `Ok(())` after [`Server::shutdown`], or the first accept error.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "rpc server: accepting on {}",
            listener
                .local_addr()
                .map_err(|e| RpcError::Transport(format!("Failed to get local address: {}", e)))?
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted
                    .map_err(|e| RpcError::Transport(format!("Failed to accept connection: {}", e)))?,
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "rpc server: failed to set TCP_NODELAY");
            }
            debug!(%peer, "rpc server: accepted connection");

            let server = self.clone();
            tokio::spawn(async move { server.serve_conn(stream).await });
        }
    }

    /// Accepts Unix domain socket connections.
    #[cfg(unix)]
    pub async fn accept_unix(self: Arc<Self>, listener: tokio::net::UnixListener) -> Result<()> {
        loop {
            let (stream, _) = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted
                    .map_err(|e| RpcError::Transport(format!("Failed to accept connection: {}", e)))?,
            };
            debug!("rpc server: accepted unix connection");

            let server = self.clone();
            tokio::spawn(async move { server.serve_conn(stream).await });
        }
    }

    /// Serves one connection until the peer goes away.
    ///
    /// The stream is dropped (closed) without a reply if the handshake is
    /// invalid.
    pub async fn serve_conn<S>(&self, mut conn: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (opt, codec) = match self.negotiate(&mut conn).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                warn!(error = %e, "rpc server: options error");
                return;
            }
        };

        let (reader, writer) = tokio::io::split(conn);
        let reader = CodecReader::new(Box::new(reader), codec);
        let writer = CodecWriter::new(Box::new(writer), codec);
        self.serve_codec(reader, writer, opt.handle_timeout).await;
    }

    async fn negotiate<S>(&self, conn: &mut S) -> Result<(Options, Codec)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let frame = read_frame(conn).await?;
        let opt = Options::from_bytes(&frame)?;
        opt.validate()?;
        let codec = self.codecs.resolve(&opt.codec_type)?;
        write_frame(conn, &opt.to_bytes()?).await?;
        debug!(codec = %opt.codec_type, "rpc server: negotiated connection");
        Ok((opt, codec))
    }

    async fn serve_codec(&self, mut reader: CodecReader, writer: CodecWriter, handle_timeout: Duration) {
        let codec = reader.codec();
        let writer = Arc::new(Mutex::new(writer));
        let mut handlers = JoinSet::new();

        loop {
            while handlers.try_join_next().is_some() {}

            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(e) => {
                    if !is_eof(&e) {
                        warn!(error = %e, "rpc server: read header error");
                    }
                    break;
                }
            };

            let method = match self.find_service(&header.service_method) {
                Ok((_, method)) => method,
                Err(e) => {
                    if let Err(e) = reader.discard_body().await {
                        warn!(error = %e, "rpc server: read body error");
                        break;
                    }
                    send_response(&writer, &header.with_error(e.to_string()), &()).await;
                    continue;
                }
            };

            let body = match reader.read_body_bytes().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "rpc server: read body error");
                    break;
                }
            };

            let args = match method.decode_args(&codec, &body) {
                Ok(args) => args,
                Err(e) => {
                    let message = format!("rpc server: read argv err: {}", e);
                    send_response(&writer, &header.with_error(message), &()).await;
                    continue;
                }
            };

            handlers.spawn(handle_request(
                writer.clone(),
                codec,
                header,
                method,
                args,
                handle_timeout,
            ));
        }

        // Every dispatched request gets its response before the stream closes.
        while handlers.join_next().await.is_some() {}
        writer.lock().await.close().await;
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

async fn handle_request(
    writer: Arc<Mutex<CodecWriter>>,
    codec: Codec,
    header: Header,
    method: Arc<MethodType>,
    args: BoxedValue,
    handle_timeout: Duration,
) {
    // The invocation runs on its own task so a timed-out handler keeps
    // running in the background; its result is then dropped.
    let invocation = tokio::spawn(method.call(args));

    let outcome = if handle_timeout.is_zero() {
        invocation.await
    } else {
        match tokio::time::timeout(handle_timeout, invocation).await {
            Ok(joined) => joined,
            Err(_) => {
                let message = format!("{}: expect within {:?}", HANDLE_TIMEOUT_PREFIX, handle_timeout);
                send_response(&writer, &header.with_error(message), &()).await;
                return;
            }
        }
    };

    match outcome {
        Ok(Ok(reply)) => match method.encode_reply(&codec, &reply) {
            Ok(body) => {
                let mut writer = writer.lock().await;
                if let Err(e) = writer.write_encoded(&header, &body).await {
                    error!(error = %e, "rpc server: write response error");
                }
            }
            Err(e) => {
                error!(error = %e, method = %method.name(), "rpc server: failed to encode reply");
                writer.lock().await.close().await;
            }
        },
        Ok(Err(message)) => {
            send_response(&writer, &header.with_error(message), &()).await;
        }
        Err(join_error) => {
            let message = format!("rpc server: {} failed: {}", header.service_method, join_error);
            send_response(&writer, &header.with_error(message), &()).await;
        }
    }
}

async fn send_response<T: Serialize + ?Sized>(writer: &Mutex<CodecWriter>, header: &Header, body: &T) {
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write(header, body).await {
        error!(error = %e, "rpc server: write response error");
    }
}
