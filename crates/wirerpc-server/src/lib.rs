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

//! WireRPC Server
//!
//! This crate hosts services behind the WireRPC wire protocol.
//!
//! # Components
//!
//! - [`Service`] / [`MethodType`]: explicit method registration and the
//!   type-erased dispatch table built from it
//! - [`Server`]: handshake, per-connection request loop, concurrent handlers
//!   with an optional per-call handling timeout, accept loops for TCP and
//!   Unix sockets
//! - [`HttpServer`]: HTTP CONNECT tunnel into the server plus a JSON debug
//!   endpoint listing services and call counts

pub mod http_server;
pub mod server;
pub mod service;

pub use http_server::HttpServer;
pub use server::Server;
pub use service::{is_exported, MethodInfo, MethodType, Service, ServiceInfo};
