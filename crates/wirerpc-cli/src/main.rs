// Copyright 2025 WireRPC Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # WireRPC CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Start a registry
//! wirerpc registry -b 0.0.0.0:9999
//!
//! # Start two servers heartbeating to it
//! wirerpc server -b 127.0.0.1:9001 --registry http://127.0.0.1:9999/_wirerpc_/registry
//! wirerpc server -b 127.0.0.1:9002 --http --registry http://127.0.0.1:9999/_wirerpc_/registry
//!
//! # Call through the registry (outputs raw JSON)
//! wirerpc call --registry http://127.0.0.1:9999/_wirerpc_/registry Foo.Sum -a '{"num1": 3, "num2": 4}'
//!
//! # Call a fixed set of servers round-robin
//! wirerpc call -s tcp@127.0.0.1:9001 -s http@127.0.0.1:9002 --mode round-robin Foo.Sum -a '{"num1": 1, "num2": 2}'
//!
//! # Call every server
//! wirerpc broadcast -s tcp@127.0.0.1:9001 -s http@127.0.0.1:9002 Foo.Sleep -a '{"num1": 1, "num2": 2}'
//! ```
//!
//! ## Address Format
//!
//! Servers are named `protocol@addr` with protocol `tcp`, `http` or `unix`:
//! - ✅ `tcp@127.0.0.1:9001`
//! - ✅ `unix@/tmp/wirerpc.sock`
//! - ❌ `127.0.0.1:9001`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use tokio::net::TcpListener;

use wirerpc_cli::{advertise_addr, codec_registry, foo_service, parse_codec, parse_select_mode, ADVERTISE_ADDR_ENV};
use wirerpc_client::{Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode, XClient};
use wirerpc_common::{Options, DEFAULT_REGISTRY_PATH};
use wirerpc_registry::{Registry, RegistryServer};
use wirerpc_server::{HttpServer, Server};

#[derive(FromArgs)]
/// WireRPC - a small RPC framework with codecs, timeouts and service discovery
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available CLI subcommands.
///
/// - **Registry**: run a liveness registry
/// - **Server**: host the demo `Foo` service
/// - **Call**: make a single load-balanced call (unix-friendly JSON output)
/// - **Broadcast**: call every known server
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Registry(RegistryArgs),
    Server(ServerArgs),
    Call(CallArgs),
    Broadcast(BroadcastArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "registry")]
/// start a WireRPC registry
struct RegistryArgs {
    /// address to bind the registry's HTTP server to
    #[argh(option, short = 'b', default = "\"0.0.0.0:9999\".into()")]
    bind: String,

    /// seconds a server stays registered without a heartbeat (0 = forever)
    #[argh(option, long = "timeout-secs", default = "300")]
    timeout_secs: u64,

    /// HTTP path the registry is served on
    #[argh(option, long = "path", default = "DEFAULT_REGISTRY_PATH.into()")]
    path: String,
}

/// Arguments for hosting the demo service.
///
/// # Example
///
/// ```bash
/// wirerpc server -b 0.0.0.0:9001 \
///   --registry http://127.0.0.1:9999/_wirerpc_/registry \
///   --advertise tcp@10.0.0.5:9001
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "server")]
/// start a WireRPC server hosting the Foo service
struct ServerArgs {
    /// address to bind to
    ///
    /// Defaults to "0.0.0.0:0" which assigns a random available port.
    /// The actual bound address is logged at startup.
    #[argh(option, short = 'b', default = "\"0.0.0.0:0\".into()")]
    bind: String,

    /// serve RPC through HTTP CONNECT instead of raw TCP
    #[argh(switch)]
    http: bool,

    /// serve on a unix socket at this path instead of TCP
    #[argh(option)]
    unix: Option<String>,

    /// registry URL to send heartbeats to
    #[argh(option)]
    registry: Option<String>,

    /// address announced to the registry (protocol@addr)
    ///
    /// Overrides auto-detection. If not set, tries WIRERPC_ADVERTISE_ADDR,
    /// then derives it from the bound address.
    #[argh(option)]
    advertise: Option<String>,

    /// seconds between heartbeats (0 = one minute less than the default registry timeout)
    #[argh(option, long = "heartbeat-secs", default = "0")]
    heartbeat_secs: u64,

    /// codec accepted by the server; repeat to accept several (default: all)
    #[argh(option)]
    codec: Vec<String>,
}

/// Arguments for making a single RPC call.
///
/// Outputs the raw JSON reply to stdout. Errors are reported to stderr
/// with a non-zero exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call an RPC method on one server
struct CallArgs {
    /// server to call (protocol@addr); repeat for several
    #[argh(option, short = 's', long = "server")]
    servers: Vec<String>,

    /// registry URL to discover servers from
    #[argh(option)]
    registry: Option<String>,

    /// server selection: random or round-robin
    #[argh(option, default = "\"random\".into()")]
    mode: String,

    /// codec for the call; arbitrary JSON replies need json
    #[argh(option, default = "\"json\".into()")]
    codec: String,

    /// call timeout in milliseconds (0 = no limit)
    #[argh(option, long = "timeout-ms", default = "0")]
    timeout_ms: u64,

    /// method to call, as Service.Method
    #[argh(positional)]
    method: String,

    /// JSON argument for the method
    #[argh(option, short = 'a', long = "args", default = "\"{}\".into()")]
    args: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "broadcast")]
/// call an RPC method on every server and print the first reply
struct BroadcastArgs {
    /// server to call (protocol@addr); repeat for several
    #[argh(option, short = 's', long = "server")]
    servers: Vec<String>,

    /// registry URL to discover servers from
    #[argh(option)]
    registry: Option<String>,

    /// codec for the calls; arbitrary JSON replies need json
    #[argh(option, default = "\"json\".into()")]
    codec: String,

    /// timeout for the whole broadcast in milliseconds (0 = no limit)
    #[argh(option, long = "timeout-ms", default = "0")]
    timeout_ms: u64,

    /// method to call, as Service.Method
    #[argh(positional)]
    method: String,

    /// JSON argument for the method
    #[argh(option, short = 'a', long = "args", default = "\"{}\".into()")]
    args: String,
}

impl From<BroadcastArgs> for CallArgs {
    fn from(args: BroadcastArgs) -> Self {
        Self {
            servers: args.servers,
            registry: args.registry,
            // Broadcast reaches every server; the mode is unused.
            mode: "random".into(),
            codec: args.codec,
            timeout_ms: args.timeout_ms,
            method: args.method,
            args: args.args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Call,
    Broadcast,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call/broadcast keep stdout clean for piping to jq
    if !matches!(cli.command, Commands::Call(_) | Commands::Broadcast(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    match cli.command {
        Commands::Registry(args) => run_registry(args).await,
        Commands::Server(args) => run_server(args).await,
        Commands::Call(args) => run_call(args, Op::Call).await,
        Commands::Broadcast(args) => run_call(args.into(), Op::Broadcast).await,
    }
}

async fn run_registry(args: RegistryArgs) -> Result<()> {
    let addr: SocketAddr = args.bind.parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", args.bind, e))?;

    let registry = Arc::new(Registry::new(Duration::from_secs(args.timeout_secs)));
    tracing::info!("Registry timeout: {:?}", registry.timeout());

    RegistryServer::new(registry).with_path(args.path).run(addr).await?;
    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let server = Arc::new(Server::with_codecs(codec_registry(&args.codec)?));
    server.register(foo_service())?;
    shutdown_on_ctrl_c(server.clone());

    if let Some(path) = &args.unix {
        return run_unix_server(server, path, &args).await;
    }

    let addr: SocketAddr = args.bind.parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", args.bind, e))?;
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let protocol = if args.http { "http" } else { "tcp" };

    let announcement = match &args.registry {
        Some(registry) => {
            let advertise = advertise_addr(
                args.advertise.clone(),
                std::env::var(ADVERTISE_ADDR_ENV).ok(),
                protocol,
                local,
            )?;
            tracing::info!("Advertising {} to registry {}", advertise, registry);
            Some(Announcement::start(registry, advertise, args.heartbeat_secs))
        }
        None => None,
    };

    let result = if args.http {
        HttpServer::new(server).serve(listener).await
    } else {
        server.accept(listener).await
    };

    if let Some(announcement) = announcement {
        announcement.stop().await;
    }
    result?;
    Ok(())
}

/// A running heartbeat plus what is needed to withdraw it.
struct Announcement {
    heartbeat: tokio::task::JoinHandle<()>,
    registry: String,
    addr: String,
}

impl Announcement {
    fn start(registry: &str, addr: String, heartbeat_secs: u64) -> Self {
        let heartbeat = wirerpc_registry::heartbeat(
            registry.to_string(),
            addr.clone(),
            Duration::from_secs(heartbeat_secs),
        );
        Self {
            heartbeat,
            registry: registry.to_string(),
            addr,
        }
    }

    /// Stops the heartbeat and removes the server from the registry.
    async fn stop(self) {
        self.heartbeat.abort();
        match wirerpc_registry::deregister(&self.registry, &self.addr).await {
            Ok(()) => tracing::info!("Deregistered {} from {}", self.addr, self.registry),
            Err(e) => tracing::warn!("Failed to deregister {}: {}", self.addr, e),
        }
    }
}

#[cfg(unix)]
async fn run_unix_server(server: Arc<Server>, path: &str, args: &ServerArgs) -> Result<()> {
    let listener = tokio::net::UnixListener::bind(path)?;
    tracing::info!("Serving on unix socket {}", path);

    let announcement = match &args.registry {
        Some(registry) => {
            let advertise = args
                .advertise
                .clone()
                .or_else(|| std::env::var(ADVERTISE_ADDR_ENV).ok())
                .unwrap_or_else(|| format!("unix@{}", path));
            Some(Announcement::start(registry, advertise, args.heartbeat_secs))
        }
        None => None,
    };

    let result = server.accept_unix(listener).await;
    if let Some(announcement) = announcement {
        announcement.stop().await;
    }
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!("Failed to remove socket {}: {}", path, e);
    }
    result?;
    Ok(())
}

#[cfg(not(unix))]
async fn run_unix_server(_server: Arc<Server>, _path: &str, _args: &ServerArgs) -> Result<()> {
    anyhow::bail!("unix sockets are not supported on this platform")
}

fn shutdown_on_ctrl_c(server: Arc<Server>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            server.shutdown();
        }
    });
}

/// Executes the `call` and `broadcast` subcommands.
///
/// No tracing is initialized for these commands; the reply is printed as
/// raw JSON on stdout.
async fn run_call(args: CallArgs, op: Op) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(&args.args)
        .map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))?;
    let opt = Options::default().with_codec(parse_codec(&args.codec)?);
    let mode = parse_select_mode(&args.mode)?;
    let timeout = Duration::from_millis(args.timeout_ms);

    let reply = match (&args.registry, args.servers.is_empty()) {
        (Some(_), false) => anyhow::bail!("pass either --server or --registry, not both"),
        (None, true) => anyhow::bail!("no servers: pass --server protocol@addr or --registry URL"),
        (Some(registry), true) => {
            let discovery = RegistryDiscovery::new(registry.clone(), Duration::ZERO);
            invoke(discovery, mode, opt, op, &args.method, value, timeout).await?
        }
        (None, false) => {
            let discovery = MultiServersDiscovery::new(args.servers.clone());
            invoke(discovery, mode, opt, op, &args.method, value, timeout).await?
        }
    };

    println!("{}", serde_json::to_string(&reply)?);
    Ok(())
}

async fn invoke<D: Discovery>(
    discovery: D,
    mode: SelectMode,
    opt: Options,
    op: Op,
    method: &str,
    args: serde_json::Value,
    timeout: Duration,
) -> Result<serde_json::Value> {
    let xc = XClient::new(discovery, mode, opt);
    let result = match op {
        Op::Call => xc.call_timeout::<_, serde_json::Value>(method, args, timeout).await.map_err(anyhow::Error::from),
        Op::Broadcast => {
            let mut reply = serde_json::Value::Null;
            let broadcast = xc.broadcast(method, args, Some(&mut reply));
            let outcome = if timeout.is_zero() {
                broadcast.await.map_err(anyhow::Error::from)
            } else {
                match tokio::time::timeout(timeout, broadcast).await {
                    Ok(outcome) => outcome.map_err(anyhow::Error::from),
                    Err(_) => Err(anyhow::anyhow!("broadcast timed out after {:?}", timeout)),
                }
            };
            outcome.map(|()| reply)
        }
    };
    xc.close().await;
    result
}

/// CLI argument parsing tests.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_registry_defaults() {
        let args: Cli = Cli::from_args(&["wirerpc"], &["registry"]).unwrap();
        match args.command {
            Commands::Registry(RegistryArgs { bind, timeout_secs, path }) => {
                assert_eq!(bind, "0.0.0.0:9999");
                assert_eq!(timeout_secs, 300);
                assert_eq!(path, "/_wirerpc_/registry");
            }
            _ => panic!("Expected Registry command"),
        }
    }

    #[test]
    fn test_cli_parse_server() {
        let args: Cli = Cli::from_args(&["wirerpc"], &[
            "server",
            "-b", "127.0.0.1:9001",
            "--http",
            "--registry", "http://127.0.0.1:9999/_wirerpc_/registry",
            "--codec", "json",
            "--codec", "postcard",
        ]).unwrap();
        match args.command {
            Commands::Server(ServerArgs { bind, http, unix, registry, advertise, heartbeat_secs, codec }) => {
                assert_eq!(bind, "127.0.0.1:9001");
                assert!(http);
                assert!(unix.is_none());
                assert_eq!(registry.as_deref(), Some("http://127.0.0.1:9999/_wirerpc_/registry"));
                assert!(advertise.is_none());
                assert_eq!(heartbeat_secs, 0); // default
                assert_eq!(codec, vec!["json".to_string(), "postcard".to_string()]);
            }
            _ => panic!("Expected Server command"),
        }
    }

    #[test]
    fn test_cli_parse_server_defaults() {
        let args: Cli = Cli::from_args(&["wirerpc"], &["server"]).unwrap();
        match args.command {
            Commands::Server(ServerArgs { bind, http, codec, .. }) => {
                assert_eq!(bind, "0.0.0.0:0");
                assert!(!http);
                assert!(codec.is_empty());
            }
            _ => panic!("Expected Server command"),
        }
    }

    #[test]
    fn test_cli_parse_call() {
        let args: Cli = Cli::from_args(&["wirerpc"], &[
            "call",
            "-s", "tcp@127.0.0.1:9001",
            "-s", "tcp@127.0.0.1:9002",
            "--mode", "round-robin",
            "Foo.Sum",
            "-a", r#"{"num1":3,"num2":4}"#,
        ]).unwrap();
        match args.command {
            Commands::Call(CallArgs { servers, registry, mode, codec, timeout_ms, method, args }) => {
                assert_eq!(servers, vec!["tcp@127.0.0.1:9001".to_string(), "tcp@127.0.0.1:9002".to_string()]);
                assert!(registry.is_none());
                assert_eq!(mode, "round-robin");
                assert_eq!(codec, "json"); // default
                assert_eq!(timeout_ms, 0);
                assert_eq!(method, "Foo.Sum");
                assert_eq!(args, r#"{"num1":3,"num2":4}"#);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_default_args() {
        let args: Cli = Cli::from_args(&["wirerpc"], &["call", "--registry", "http://r/", "Foo.Sum"]).unwrap();
        match args.command {
            Commands::Call(CallArgs { args, mode, .. }) => {
                assert_eq!(args, "{}");
                assert_eq!(mode, "random");
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_broadcast() {
        let args: Cli = Cli::from_args(&["wirerpc"], &[
            "broadcast",
            "--registry", "http://127.0.0.1:9999/_wirerpc_/registry",
            "--timeout-ms", "2000",
            "Foo.Sleep",
        ]).unwrap();
        match args.command {
            Commands::Broadcast(args) => {
                let args: CallArgs = args.into();
                assert_eq!(args.timeout_ms, 2000);
                assert_eq!(args.method, "Foo.Sleep");
                assert!(args.servers.is_empty());
            }
            _ => panic!("Expected Broadcast command"),
        }
    }

    #[test]
    fn test_cli_broadcast_has_no_mode() {
        assert!(Cli::from_args(&["wirerpc"], &["broadcast", "--mode", "round-robin", "Foo.Sum"]).is_err());
    }

    #[tokio::test]
    async fn test_announcement_stop_deregisters() {
        let registry = Arc::new(Registry::new(Duration::from_secs(60)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}{}", listener.local_addr().unwrap(), DEFAULT_REGISTRY_PATH);
        tokio::spawn(RegistryServer::new(registry.clone()).serve(listener));

        let announcement = Announcement::start(&url, "tcp@127.0.0.1:9001".into(), 60);
        for _ in 0..100 {
            if !registry.alive_servers().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(registry.alive_servers(), vec!["tcp@127.0.0.1:9001"]);

        announcement.stop().await;
        assert!(registry.alive_servers().is_empty());
    }

    #[test]
    fn test_cli_call_requires_method() {
        assert!(Cli::from_args(&["wirerpc"], &["call", "-s", "tcp@127.0.0.1:9001"]).is_err());
    }

    #[tokio::test]
    async fn test_run_call_rejects_missing_target() {
        let args = CallArgs {
            servers: Vec::new(),
            registry: None,
            mode: "random".into(),
            codec: "json".into(),
            timeout_ms: 0,
            method: "Foo.Sum".into(),
            args: "{}".into(),
        };
        let err = run_call(args, Op::Call).await.unwrap_err();
        assert!(err.to_string().contains("no servers"));
    }
}
