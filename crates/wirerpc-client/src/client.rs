//! RPC Client
//!
//! One [`Client`] owns one connection. Calls are multiplexed over it: each
//! call gets a fresh sequence number and an entry in the pending table, a
//! background task reads responses and completes the matching entry.
//!
//! # Call styles
//!
//! - [`Client::go`] starts a call and returns immediately; the finished
//!   [`Call`] is pushed onto a caller-supplied bounded channel
//! - [`Client::call`] waits for the reply
//! - [`Client::call_timeout`] / [`Client::call_until`] give up after a
//!   deadline or a cancellation signal; a late response is then discarded

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use wirerpc_common::transport::{
    read_frame, write_frame, Codec, CodecReader, CodecRegistry, CodecWriter, RpcAddr,
};
use wirerpc_common::{Header, Options, Result, RpcError, DEFAULT_RPC_PATH};

/// Upper bound on the HTTP response head read during a CONNECT handshake.
const MAX_HTTP_HEAD: usize = 8 * 1024;

/// A finished (or failed) call, as delivered to the `done` channel of [`Client::go`].
#[derive(Debug)]
pub struct Call<R> {
    /// 0 if the call was never sent because the client was already shut down.
    pub seq: u64,
    pub service_method: String,
    pub reply: Option<R>,
    pub error: Option<RpcError>,
}

impl<R> Call<R> {
    pub fn into_result(self) -> Result<R> {
        match (self.error, self.reply) {
            (Some(e), _) => Err(e),
            (None, Some(reply)) => Ok(reply),
            (None, None) => Err(RpcError::InvalidResponse(format!(
                "{} finished without a reply",
                self.service_method
            ))),
        }
    }
}

/// Completes one pending call with the raw body or an error.
type Completion = Box<dyn FnOnce(u64, Result<Vec<u8>>) -> BoxFuture<'static, ()> + Send>;

struct State {
    seq: u64,
    pending: HashMap<u64, Completion>,
    /// Set by [`Client::close`].
    closing: bool,
    /// Set once the connection failed or the reader stopped.
    shutdown: bool,
}

struct Inner {
    codec: Codec,
    state: Mutex<State>,
    writer: AsyncMutex<CodecWriter>,
    closed: CancellationToken,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocates a sequence number; hands the completion back if the client is unusable.
    fn register_call(&self, completion: Completion) -> std::result::Result<u64, Completion> {
        let mut state = self.state();
        if state.closing || state.shutdown {
            return Err(completion);
        }
        let seq = state.seq;
        state.seq += 1;
        state.pending.insert(seq, completion);
        Ok(seq)
    }

    fn remove_call(&self, seq: u64) -> Option<Completion> {
        self.state().pending.remove(&seq)
    }

    async fn send<A: Serialize>(&self, seq: u64, service_method: String, args: A) {
        let header = Header::request(service_method, seq);
        let encoded = self.codec.encode(&args);
        drop(args);

        let result = match encoded {
            // Closing abandons a write stuck on a peer that stopped reading.
            Ok(body) => tokio::select! {
                _ = self.closed.cancelled() => Err(RpcError::Shutdown),
                result = async { self.writer.lock().await.write_encoded(&header, &body).await } => result,
            },
            Err(e) => {
                error!(error = %e, seq, "rpc client: failed to encode arguments");
                self.writer.lock().await.close().await;
                Err(e)
            }
        };
        if let Err(e) = result {
            // The reader may already have completed (or the caller cancelled) the call.
            if let Some(completion) = self.remove_call(seq) {
                completion(seq, Err(e)).await;
            }
        }
    }

    async fn terminate_calls(&self, err: RpcError) {
        let pending = {
            let mut state = self.state();
            state.shutdown = true;
            std::mem::take(&mut state.pending)
        };
        if !pending.is_empty() {
            debug!(pending = pending.len(), error = %err, "rpc client: failing pending calls");
        }
        for (seq, completion) in pending {
            let err = match &err {
                RpcError::Shutdown => RpcError::Shutdown,
                other => RpcError::Connection(other.to_string()),
            };
            completion(seq, Err(err)).await;
        }
    }
}

/// Reads responses until the connection fails or the client is closed.
async fn receive(inner: Arc<Inner>, mut reader: CodecReader) {
    let err = loop {
        let message = tokio::select! {
            _ = inner.closed.cancelled() => break RpcError::Shutdown,
            message = read_message(&mut reader) => message,
        };
        let (header, body) = match message {
            Ok(message) => message,
            Err(e) => break e,
        };

        match inner.remove_call(header.seq) {
            None => debug!(seq = header.seq, "rpc client: discarding response without pending call"),
            Some(completion) if header.is_error() => {
                completion(header.seq, Err(RpcError::from_remote(header.error))).await
            }
            Some(completion) => completion(header.seq, Ok(body)).await,
        }
    };
    inner.terminate_calls(err).await;
}

async fn read_message(reader: &mut CodecReader) -> Result<(Header, Vec<u8>)> {
    let header = reader.read_header().await?;
    let body = reader.read_body_bytes().await?;
    Ok((header, body))
}

/// RPC client bound to one connection.
///
/// Dropping the client stops its response reader; pending calls fail with
/// [`RpcError::Shutdown`].
///
/// # Example
///
/// ```no_run
/// use wirerpc_client::Client;
/// use wirerpc_common::Options;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::dial("127.0.0.1:9999", Options::default()).await?;
/// let doubled: i64 = client.call("Foo.Double", 21i64).await?;
/// assert_eq!(doubled, 42);
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    inner: Arc<Inner>,
    opt: Options,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("opt", &self.opt).finish_non_exhaustive()
    }
}

impl Client {
    /// Performs the handshake on an established stream and starts the response reader.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The codec in `opt` is unknown
    /// - Writing the options or reading the server's echo fails
    /// - The echo does not match what was sent
    pub async fn new<S>(mut conn: S, opt: Options) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let codec = CodecRegistry::default().resolve(&opt.codec_type)?;

        write_frame(&mut conn, &opt.to_bytes()?).await?;
        let echoed = Options::from_bytes(&read_frame(&mut conn).await?)?;
        if echoed.magic_number != opt.magic_number || echoed.codec_type != opt.codec_type {
            return Err(RpcError::Protocol(format!(
                "server echoed different options: {:?}",
                echoed
            )));
        }

        let (reader, writer) = tokio::io::split(conn);
        let inner = Arc::new(Inner {
            codec,
            state: Mutex::new(State {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            writer: AsyncMutex::new(CodecWriter::new(Box::new(writer), codec)),
            closed: CancellationToken::new(),
        });
        tokio::spawn(receive(inner.clone(), CodecReader::new(Box::new(reader), codec)));

        Ok(Self { inner, opt })
    }

    /// Tunnels through an HTTP server with `CONNECT`, then performs the handshake.
    pub async fn new_http<S>(mut conn: S, opt: Options) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        conn.write_all(format!("CONNECT {} HTTP/1.0\r\n\r\n", DEFAULT_RPC_PATH).as_bytes())
            .await?;
        let status_line = read_http_status_line(&mut conn).await?;
        let status = status_line.split_whitespace().nth(1);
        if status != Some("200") {
            return Err(RpcError::Protocol(format!(
                "unexpected HTTP response: {}",
                status_line
            )));
        }
        Self::new(conn, opt).await
    }

    /// Connects over TCP. Connect and handshake share `opt.connect_timeout`.
    pub async fn dial(addr: &str, opt: Options) -> Result<Self> {
        let timeout = opt.connect_timeout;
        with_connect_timeout(timeout, async move {
            let conn = connect_tcp(addr).await?;
            Self::new(conn, opt).await
        })
        .await
    }

    /// Connects over TCP and tunnels through the server's HTTP entry.
    pub async fn dial_http(addr: &str, opt: Options) -> Result<Self> {
        let timeout = opt.connect_timeout;
        with_connect_timeout(timeout, async move {
            let conn = connect_tcp(addr).await?;
            Self::new_http(conn, opt).await
        })
        .await
    }

    /// Connects to a Unix domain socket.
    #[cfg(unix)]
    pub async fn dial_unix(path: impl AsRef<std::path::Path>, opt: Options) -> Result<Self> {
        let path = path.as_ref();
        let timeout = opt.connect_timeout;
        with_connect_timeout(timeout, async move {
            let conn = tokio::net::UnixStream::connect(path).await.map_err(|e| {
                RpcError::Connection(format!("Failed to connect to {}: {}", path.display(), e))
            })?;
            Self::new(conn, opt).await
        })
        .await
    }

    /// Connects to an address in `protocol@addr` form (`tcp`, `http` or `unix`).
    pub async fn xdial(rpc_addr: &str, opt: Options) -> Result<Self> {
        match rpc_addr.parse::<RpcAddr>()? {
            RpcAddr::Tcp(addr) => Self::dial(&addr, opt).await,
            RpcAddr::Http(addr) => Self::dial_http(&addr, opt).await,
            #[cfg(unix)]
            RpcAddr::Unix(path) => Self::dial_unix(path, opt).await,
            #[cfg(not(unix))]
            RpcAddr::Unix(_) => Err(RpcError::Protocol(
                "rpc client: unix sockets are not supported on this platform".into(),
            )),
        }
    }

    pub fn options(&self) -> &Options {
        &self.opt
    }

    /// True until the client is closed or its connection fails.
    pub fn is_available(&self) -> bool {
        let state = self.inner.state();
        !state.closing && !state.shutdown
    }

    /// Closes the connection. Pending calls fail with [`RpcError::Shutdown`].
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Shutdown`] if the client was already closed.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        // Cancel first: in-flight sends give up the writer lock on cancellation.
        self.inner.closed.cancel();
        self.inner.writer.lock().await.close().await;
        Ok(())
    }

    /// Starts a call without waiting for it.
    ///
    /// The request is written from a background task; when the response
    /// arrives (or the call fails) the [`Call`] is sent on `done`. Returns the
    /// call's sequence number, or 0 if the client is already shut down (the
    /// failed call is still delivered on `done`).
    ///
    /// `done` is bounded, so its capacity is at least one. Delivery waits for
    /// room in the channel and the response reader waits with it: keep
    /// receiving, or size the channel for the calls you have in flight.
    pub fn go<A, R>(&self, service_method: &str, args: A, done: mpsc::Sender<Call<R>>) -> u64
    where
        A: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        self.go_inner(service_method, args, done, true)
    }

    fn go_inner<A, R>(
        &self,
        service_method: &str,
        args: A,
        done: mpsc::Sender<Call<R>>,
        decode_reply: bool,
    ) -> u64
    where
        A: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let codec = self.inner.codec;
        let method = service_method.to_string();
        let call_method = method.clone();

        let completion: Completion = Box::new(move |seq: u64, outcome: Result<Vec<u8>>| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let mut call = Call {
                    seq,
                    service_method: call_method,
                    reply: None,
                    error: None,
                };
                match outcome {
                    Ok(body) if decode_reply => match codec.decode::<R>(&body) {
                        Ok(reply) => call.reply = Some(reply),
                        Err(e) => {
                            call.error = Some(RpcError::InvalidResponse(format!("reading body {}", e)))
                        }
                    },
                    Ok(_) => {}
                    Err(e) => call.error = Some(e),
                }
                if done.send(call).await.is_err() {
                    debug!(seq, "rpc client: call finished after its receiver went away");
                }
            })
        });

        match self.inner.register_call(completion) {
            Ok(seq) => {
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.send(seq, method, args).await });
                seq
            }
            Err(completion) => {
                tokio::spawn(completion(0, Err(RpcError::Shutdown)));
                0
            }
        }
    }

    /// Calls `service_method` and waits for the reply.
    pub async fn call<A, R>(&self, service_method: &str, args: A) -> Result<R>
    where
        A: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        self.invoke(service_method, args, std::future::pending(), RpcError::Cancelled, true)
            .await
            .and_then(|reply| require_reply(service_method, reply))
    }

    /// Like [`Client::call`] but gives up after `timeout` (zero means no limit).
    ///
    /// On timeout the pending entry is dropped; a late response is discarded.
    pub async fn call_timeout<A, R>(&self, service_method: &str, args: A, timeout: Duration) -> Result<R>
    where
        A: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        if timeout.is_zero() {
            return self.call(service_method, args).await;
        }
        self.invoke(
            service_method,
            args,
            tokio::time::sleep(timeout),
            RpcError::CallTimeout(timeout),
            true,
        )
        .await
        .and_then(|reply| require_reply(service_method, reply))
    }

    /// Like [`Client::call`] but gives up as soon as `cancel` completes.
    pub async fn call_until<A, R, F>(&self, service_method: &str, args: A, cancel: F) -> Result<R>
    where
        A: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
        F: Future<Output = ()>,
    {
        self.invoke(service_method, args, cancel, RpcError::Cancelled, true)
            .await
            .and_then(|reply| require_reply(service_method, reply))
    }

    /// Shared wait path. With `decode_reply` unset the body is never decoded
    /// and the result is `Ok(None)` on success.
    pub(crate) async fn invoke<A, R, F>(
        &self,
        service_method: &str,
        args: A,
        cancel: F,
        on_cancel: RpcError,
        decode_reply: bool,
    ) -> Result<Option<R>>
    where
        A: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
        F: Future<Output = ()>,
    {
        let (done, mut finished) = mpsc::channel(1);
        let seq = self.go_inner(service_method, args, done, decode_reply);

        tokio::select! {
            biased;
            call = finished.recv() => match call {
                Some(Call { error: Some(e), .. }) => Err(e),
                Some(call) => Ok(call.reply),
                None => Err(RpcError::Shutdown),
            },
            _ = cancel => {
                self.inner.remove_call(seq);
                Err(on_cancel)
            }
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.inner.state().pending.len()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.closed.cancel();
    }
}

fn require_reply<R>(service_method: &str, reply: Option<R>) -> Result<R> {
    reply.ok_or_else(|| {
        RpcError::InvalidResponse(format!("{} finished without a reply", service_method))
    })
}

async fn connect_tcp(addr: &str) -> Result<TcpStream> {
    let conn = TcpStream::connect(addr)
        .await
        .map_err(|e| RpcError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
    if let Err(e) = conn.set_nodelay(true) {
        debug!(error = %e, "rpc client: failed to set TCP_NODELAY");
    }
    Ok(conn)
}

async fn with_connect_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if timeout.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| RpcError::ConnectTimeout(timeout))?
}

/// Reads an HTTP response head byte by byte and returns its status line.
///
/// Nothing past the blank line is consumed, so the RPC handshake that
/// follows starts on a clean stream.
async fn read_http_status_line<S>(conn: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(128);
    while !head.ends_with(b"\r\n\r\n") && !head.ends_with(b"\n\n") {
        if head.len() >= MAX_HTTP_HEAD {
            return Err(RpcError::Protocol("HTTP response head too large".into()));
        }
        head.push(conn.read_u8().await?);
    }
    let head = String::from_utf8_lossy(&head);
    Ok(head.lines().next().unwrap_or_default().trim().to_string())
}
