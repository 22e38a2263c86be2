use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::protocol::error::RpcError;

/// A server address in `protocol@addr` form.
///
/// Supported protocols are `tcp`, `http` (CONNECT tunnel over TCP) and
/// `unix` (path to a Unix domain socket).
///
/// # Example
///
/// ```
/// use wirerpc_common::transport::RpcAddr;
///
/// let addr: RpcAddr = "http@127.0.0.1:9999".parse().unwrap();
/// assert_eq!(addr, RpcAddr::Http("127.0.0.1:9999".into()));
/// assert_eq!(addr.to_string(), "http@127.0.0.1:9999");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RpcAddr {
    Tcp(String),
    Http(String),
    Unix(PathBuf),
}

impl FromStr for RpcAddr {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, addr) = s
            .split_once('@')
            .filter(|(protocol, addr)| !protocol.is_empty() && !addr.is_empty())
            .ok_or_else(|| RpcError::InvalidAddress(s.to_string()))?;

        match protocol {
            "tcp" => Ok(RpcAddr::Tcp(addr.to_string())),
            "http" => Ok(RpcAddr::Http(addr.to_string())),
            "unix" => Ok(RpcAddr::Unix(PathBuf::from(addr))),
            other => Err(RpcError::Protocol(format!(
                "rpc client: unsupported protocol {}",
                other
            ))),
        }
    }
}

impl fmt::Display for RpcAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcAddr::Tcp(addr) => write!(f, "tcp@{}", addr),
            RpcAddr::Http(addr) => write!(f, "http@{}", addr),
            RpcAddr::Unix(path) => write!(f, "unix@{}", path.display()),
        }
    }
}
