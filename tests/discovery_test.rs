//! Discovery and Load Balancing Tests
//!
//! Servers heartbeat to a live registry; clients find them through
//! `RegistryDiscovery` or a static list and spread calls with `XClient`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use wirerpc::client::{Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode, XClient};
use wirerpc::common::{Options, RpcError, DEFAULT_REGISTRY_PATH, SERVERS_HEADER, SERVER_HEADER};
use wirerpc::registry::{heartbeat, Registry, RegistryServer};
use wirerpc::server::{Server, Service};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Args {
    num1: i64,
    num2: i64,
}

fn foo() -> Service {
    Service::new("Foo")
        .method("Sum", |args: Args| async move { Ok::<_, String>(args.num1 + args.num2) })
        .method("Sleep", |args: Args| async move {
            tokio::time::sleep(Duration::from_millis(args.num1 as u64)).await;
            Ok::<_, String>(args.num1 + args.num2)
        })
        .method("Fail", |_: Args| async { Err::<i64, _>("always fails") })
}

async fn start_server() -> (String, Arc<Server>) {
    let server = Arc::new(Server::new());
    server.register(foo()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.clone().accept(listener));
    (format!("tcp@{}", addr), server)
}

/// A server whose `Foo.Sum` fails after a short delay.
async fn start_failing_server() -> String {
    let server = Arc::new(Server::new());
    server
        .register(Service::new("Foo").method("Sum", |_: Args| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Err::<i64, _>("sum unavailable")
        }))
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.accept(listener));
    format!("tcp@{}", addr)
}

async fn start_registry(timeout: Duration) -> (String, Arc<Registry>) {
    let registry = Arc::new(Registry::new(timeout));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(RegistryServer::new(registry.clone()).serve(listener));
    (format!("http://{}{}", addr, DEFAULT_REGISTRY_PATH), registry)
}

async fn wait_for_servers(registry: &Registry, n: usize) {
    for _ in 0..100 {
        if registry.alive_servers().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("registry never saw {} servers", n);
}

fn sum_calls(server: &Server) -> u64 {
    server
        .snapshot()
        .into_iter()
        .flat_map(|s| s.methods)
        .find(|m| m.name == "Sum")
        .map(|m| m.calls)
        .unwrap_or_default()
}

#[tokio::test]
async fn test_round_robin_spreads_calls() {
    let (a, server_a) = start_server().await;
    let (b, server_b) = start_server().await;

    let xc = XClient::new(
        MultiServersDiscovery::new(vec![a, b]),
        SelectMode::RoundRobin,
        Options::default(),
    );
    for i in 0..4 {
        let reply: i64 = xc.call("Foo.Sum", Args { num1: i, num2: i }).await.unwrap();
        assert_eq!(reply, 2 * i);
    }
    xc.close().await;

    assert_eq!(sum_calls(&server_a), 2);
    assert_eq!(sum_calls(&server_b), 2);
}

#[tokio::test]
async fn test_registry_discovery_end_to_end() {
    let (registry_url, registry) = start_registry(Duration::from_secs(60)).await;
    let (a, server_a) = start_server().await;
    let (b, server_b) = start_server().await;

    let beats = [
        heartbeat(registry_url.clone(), a.clone(), Duration::from_secs(30)),
        heartbeat(registry_url.clone(), b.clone(), Duration::from_secs(30)),
    ];
    wait_for_servers(&registry, 2).await;

    let discovery = RegistryDiscovery::new(registry_url, Duration::ZERO);
    let mut all = discovery.get_all().await.unwrap();
    all.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(all, expected);

    let xc = XClient::new(discovery, SelectMode::Random, Options::default());
    for _ in 0..10 {
        let reply: i64 = xc.call("Foo.Sum", Args { num1: 3, num2: 4 }).await.unwrap();
        assert_eq!(reply, 7);
    }
    assert_eq!(sum_calls(&server_a) + sum_calls(&server_b), 10);

    xc.close().await;
    for beat in beats {
        beat.abort();
    }
}

#[tokio::test]
async fn test_broadcast_reaches_every_server() {
    let (a, server_a) = start_server().await;
    let (b, server_b) = start_server().await;
    let xc = XClient::new(
        MultiServersDiscovery::new(vec![a, b]),
        SelectMode::Random,
        Options::default(),
    );

    let mut reply = 0i64;
    xc.broadcast("Foo.Sum", Args { num1: 3, num2: 4 }, Some(&mut reply))
        .await
        .unwrap();
    assert_eq!(reply, 7);
    assert_eq!(sum_calls(&server_a), 1);
    assert_eq!(sum_calls(&server_b), 1);

    xc.broadcast::<_, i64>("Foo.Sum", Args { num1: 1, num2: 1 }, None)
        .await
        .unwrap();
    assert_eq!(sum_calls(&server_a), 2);
    xc.close().await;
}

#[tokio::test]
async fn test_broadcast_returns_first_error() {
    let (a, _server_a) = start_server().await;
    let (b, _server_b) = start_server().await;
    let xc = XClient::new(
        MultiServersDiscovery::new(vec![a, b]),
        SelectMode::Random,
        Options::default(),
    );

    let mut reply = 0i64;
    let err = xc
        .broadcast("Foo.Fail", Args { num1: 0, num2: 0 }, Some(&mut reply))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(ref msg) if msg == "always fails"));
    assert_eq!(reply, 0);
    xc.close().await;
}

#[tokio::test]
async fn test_broadcast_error_cancels_slow_calls() {
    let (a, _server_a) = start_server().await;
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("tcp@{}", addr)
    };
    let xc = XClient::new(
        MultiServersDiscovery::new(vec![a, dead]),
        SelectMode::Random,
        Options::default(),
    );

    let started = tokio::time::Instant::now();
    let err = xc
        .broadcast::<_, i64>("Foo.Sleep", Args { num1: 5_000, num2: 0 }, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Connection(_)), "unexpected error: {}", err);
    assert!(started.elapsed() < Duration::from_secs(4));
    xc.close().await;
}

#[tokio::test]
async fn test_registry_expires_silent_servers() {
    let (registry_url, _registry) = start_registry(Duration::from_millis(200)).await;
    let http = reqwest::Client::new();

    http.post(&registry_url)
        .header(SERVER_HEADER, "tcp@127.0.0.1:1")
        .send()
        .await
        .unwrap();
    let response = http.get(&registry_url).send().await.unwrap();
    assert_eq!(response.headers()[SERVERS_HEADER], "tcp@127.0.0.1:1");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let response = http.get(&registry_url).send().await.unwrap();
    assert_eq!(response.headers()[SERVERS_HEADER], "");
}

#[tokio::test]
async fn test_broadcast_one_failure_keeps_a_success() {
    let (a, _server_a) = start_server().await;
    let (b, _server_b) = start_server().await;
    let failing = start_failing_server().await;
    let xc = XClient::new(
        MultiServersDiscovery::new(vec![a, failing, b]),
        SelectMode::Random,
        Options::default(),
    );

    let mut reply = 0i64;
    let err = xc
        .broadcast("Foo.Sum", Args { num1: 3, num2: 4 }, Some(&mut reply))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(ref msg) if msg == "sum unavailable"), "unexpected error: {}", err);
    assert_eq!(reply, 7);
    xc.close().await;
}

#[tokio::test]
async fn test_registry_discovery_refetches_after_interval() {
    let (registry_url, registry) = start_registry(Duration::from_secs(60)).await;
    registry.put_server("tcp@127.0.0.1:1");

    let discovery = RegistryDiscovery::new(registry_url, Duration::from_millis(300));
    assert_eq!(discovery.get_all().await.unwrap(), vec!["tcp@127.0.0.1:1"]);

    // Within the interval the cached list is served.
    registry.put_server("tcp@127.0.0.1:2");
    assert_eq!(discovery.get_all().await.unwrap(), vec!["tcp@127.0.0.1:1"]);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        discovery.get_all().await.unwrap(),
        vec!["tcp@127.0.0.1:1", "tcp@127.0.0.1:2"]
    );
}

#[tokio::test]
async fn test_slow_dial_does_not_block_other_servers() {
    // Accepts TCP connections but never answers the handshake.
    let stalled = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stalled_addr = format!("tcp@{}", stalled.local_addr().unwrap());
    let (live, _server) = start_server().await;

    let xc = Arc::new(XClient::new(
        MultiServersDiscovery::new(vec![stalled_addr, live]),
        SelectMode::RoundRobin,
        Options::default().with_connect_timeout(Duration::from_secs(3)),
    ));

    let stuck = {
        let xc = xc.clone();
        tokio::spawn(async move { xc.call::<_, i64>("Foo.Sum", Args { num1: 1, num2: 1 }).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reply: i64 = tokio::time::timeout(
        Duration::from_millis(1000),
        xc.call("Foo.Sum", Args { num1: 3, num2: 4 }),
    )
    .await
    .expect("call to the live server waited for the stalled dial")
    .unwrap();
    assert_eq!(reply, 7);

    let err = stuck.await.unwrap().unwrap_err();
    assert!(matches!(err, RpcError::ConnectTimeout(_)), "unexpected error: {}", err);
    drop(stalled);
}
