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

//! # WireRPC
//!
//! Umbrella crate re-exporting the WireRPC runtime:
//!
//! - [`common`]: wire protocol, codecs, framing and errors
//! - [`server`]: service registration and the connection server (TCP, Unix, HTTP CONNECT)
//! - [`client`]: multiplexed client, discovery and the load-balanced [`client::XClient`]
//! - [`registry`]: HTTP liveness registry and server heartbeats
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wirerpc::client::Client;
//! use wirerpc::common::Options;
//! use wirerpc::server::{Server, Service};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Arc::new(Server::new());
//! server.register(Service::new("Foo").method("Double", |x: i64| async move { Ok::<_, String>(x * 2) }))?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//! let addr = listener.local_addr()?;
//! tokio::spawn(server.clone().accept(listener));
//!
//! let client = Client::dial(&addr.to_string(), Options::default()).await?;
//! let doubled: i64 = client.call("Foo.Double", 21i64).await?;
//! assert_eq!(doubled, 42);
//! # Ok(())
//! # }
//! ```

pub use wirerpc_client as client;
pub use wirerpc_common as common;
pub use wirerpc_registry as registry;
pub use wirerpc_server as server;
