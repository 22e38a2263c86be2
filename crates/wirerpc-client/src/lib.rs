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

//! WireRPC Client
//!
//! Client-side half of the WireRPC runtime.
//!
//! # Components
//!
//! - [`Client`]: one multiplexed connection with asynchronous ([`Client::go`])
//!   and waiting ([`Client::call`]) calls, timeouts and cancellation
//! - [`Discovery`]: where server addresses come from, with
//!   [`MultiServersDiscovery`] (static list) and [`RegistryDiscovery`]
//!   (refreshed from a registry)
//! - [`XClient`]: load-balanced calls and fail-fast broadcast over a discovery
//!
//! # Example
//!
//! ```no_run
//! use wirerpc_client::{RegistryDiscovery, SelectMode, XClient};
//! use wirerpc_common::Options;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let discovery = RegistryDiscovery::new(
//!     "http://127.0.0.1:9999/_wirerpc_/registry",
//!     Duration::ZERO,
//! );
//! let xc = XClient::new(discovery, SelectMode::Random, Options::default());
//! let doubled: i64 = xc.call("Foo.Double", 21i64).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod discovery;
pub mod xclient;

pub use client::{Call, Client};
pub use discovery::{
    parse_servers, Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode,
    DEFAULT_UPDATE_TIMEOUT,
};
pub use xclient::XClient;
