use std::time::Duration;

use thiserror::Error;

/// Prefix the server puts in front of handle-timeout messages.
///
/// Clients use it to turn a remote error string back into
/// [`RpcError::HandleTimeout`].
pub const HANDLE_TIMEOUT_PREFIX: &str = "rpc server: request handle timeout";

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("invalid magic number {0:#x}")]
    InvalidMagic(u32),

    #[error("invalid codec type {0}")]
    UnsupportedCodec(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Message too large: {0} bytes (max {1} bytes)")]
    FrameTooLarge(usize, usize),

    #[error("rpc client: connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    /// The server gave up waiting for the handler; the message is the
    /// server's own wording.
    #[error("{0}")]
    HandleTimeout(String),

    #[error("rpc client: call failed: timeout after {0:?}")]
    CallTimeout(Duration),

    #[error("rpc client: call failed: cancelled")]
    Cancelled,

    #[error("connection is shut down")]
    Shutdown,

    #[error("rpc server: service/method request ill-formed: {0}")]
    IllFormedMethod(String),

    #[error("rpc server: can't find service {0}")]
    ServiceNotFound(String),

    #[error("rpc server: can't find method {0}")]
    MethodNotFound(String),

    #[error("rpc: service already defined: {0}")]
    DuplicateService(String),

    #[error("rpc server: invalid service {0}")]
    InvalidService(String),

    /// Error string reported by the remote handler.
    #[error("{0}")]
    Remote(String),

    #[error("rpc registry: {0}")]
    Registry(String),

    #[error("rpc discovery: no available servers")]
    NoAvailableServers,

    #[error("rpc client: wrong format '{0}', expect protocol@addr")]
    InvalidAddress(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Rebuilds an error from the `error` field of a response header.
    pub fn from_remote(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.starts_with(HANDLE_TIMEOUT_PREFIX) {
            RpcError::HandleTimeout(message)
        } else {
            RpcError::Remote(message)
        }
    }

    /// Returns true for every timeout flavour: connect, call, and server-side handling.
    pub fn is_timeout(&self) -> bool {
        match self {
            RpcError::ConnectTimeout(_) | RpcError::HandleTimeout(_) | RpcError::CallTimeout(_) => true,
            RpcError::Io(err) => err.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<std::net::AddrParseError> for RpcError {
    fn from(err: std::net::AddrParseError) -> Self {
        RpcError::InvalidAddress(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
