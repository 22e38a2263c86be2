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

//! WireRPC Registry
//!
//! A small HTTP service that tracks which servers are alive. Servers keep
//! their entry fresh with [`heartbeat`]; clients read the live set through
//! `RegistryDiscovery` in `wirerpc-client`.

pub mod heartbeat;
pub mod http_server;
pub mod registry;

pub use heartbeat::{deregister, heartbeat, Heartbeat, DEFAULT_HEARTBEAT_INTERVAL};
pub use http_server::RegistryServer;
pub use registry::{Registry, DEFAULT_TIMEOUT};
