pub mod error;
pub mod header;
pub mod options;


pub use error::{Result, RpcError, HANDLE_TIMEOUT_PREFIX};
pub use header::Header;
pub use options::{Options, DEFAULT_CONNECT_TIMEOUT, MAGIC_NUMBER};

/// Path a client CONNECTs to when tunnelling RPC over HTTP.
pub const DEFAULT_RPC_PATH: &str = "/_wirerpc_";
/// Path of the server's introspection endpoint.
pub const DEFAULT_DEBUG_PATH: &str = "/debug/wirerpc";
/// Reason phrase of a successful CONNECT response.
pub const CONNECTED_REASON: &str = "Connected to WireRPC";

/// Default path of the registry's HTTP endpoint.
pub const DEFAULT_REGISTRY_PATH: &str = "/_wirerpc_/registry";
/// Registry `GET` response header: comma-joined live servers.
pub const SERVERS_HEADER: &str = "X-Wirerpc-Servers";
/// Registry `POST`/`DELETE` request header: the server being registered.
pub const SERVER_HEADER: &str = "X-Wirerpc-Server";
