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

//! # WireRPC CLI
//!
//! Support code for the `wirerpc` binary:
//!
//! - the demo `Foo` service hosted by `wirerpc server`
//! - flag parsing helpers shared by the subcommands (codecs, select modes,
//!   advertised addresses)
//!
//! ## Key Commands
//!
//! - `wirerpc registry`: run a liveness registry
//! - `wirerpc server`: host the demo service, optionally heartbeating to a registry
//! - `wirerpc call`: make one load-balanced call (outputs raw JSON for scripting)
//! - `wirerpc broadcast`: call every known server and print the first reply

pub mod demo;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use anyhow::{bail, Result};

use wirerpc_client::SelectMode;
use wirerpc_common::transport::{Codec, CodecRegistry, CodecType, JsonCodec, NewCodecFunc, PostcardCodec, RpcAddr};

pub use demo::{foo_service, Args};

/// Environment fallback for `wirerpc server --advertise`.
pub const ADVERTISE_ADDR_ENV: &str = "WIRERPC_ADVERTISE_ADDR";

/// Accepts the short names `json`/`postcard` as well as the full codec names.
pub fn parse_codec(name: &str) -> Result<CodecType> {
    match name {
        "json" | "application/json" => Ok(CodecType::JSON),
        "postcard" | "application/postcard" => Ok(CodecType::POSTCARD),
        other => bail!("unknown codec '{}': expected json or postcard", other),
    }
}

/// Builds the codecs a server accepts. No names means every built-in codec.
pub fn codec_registry(names: &[String]) -> Result<CodecRegistry> {
    if names.is_empty() {
        return Ok(CodecRegistry::default());
    }

    let mut registry = CodecRegistry::empty();
    for name in names {
        let codec_type = parse_codec(name)?;
        let constructor: NewCodecFunc = if codec_type == CodecType::JSON {
            || Codec::Json(JsonCodec)
        } else {
            || Codec::Postcard(PostcardCodec)
        };
        registry.register(codec_type, constructor);
    }
    Ok(registry)
}

pub fn parse_select_mode(mode: &str) -> Result<SelectMode> {
    match mode {
        "random" => Ok(SelectMode::Random),
        "round-robin" | "roundrobin" | "rr" => Ok(SelectMode::RoundRobin),
        other => bail!("unknown select mode '{}': expected random or round-robin", other),
    }
}

/// Resolves the address a server announces to the registry.
///
/// Priority: explicit flag, then the environment value, then the bound
/// address (with an unspecified IP replaced by loopback so it is dialable).
pub fn advertise_addr(
    flag: Option<String>,
    env: Option<String>,
    protocol: &str,
    local: SocketAddr,
) -> Result<String> {
    let addr = match flag.or(env) {
        Some(addr) => addr,
        None => format!("{}@{}", protocol, dialable(local)),
    };
    addr.parse::<RpcAddr>()?;
    Ok(addr)
}

fn dialable(mut addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        let loopback = match addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        addr.set_ip(loopback);
    }
    addr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codec() {
        assert_eq!(parse_codec("json").unwrap(), CodecType::JSON);
        assert_eq!(parse_codec("application/postcard").unwrap(), CodecType::POSTCARD);
        assert!(parse_codec("gob").is_err());
    }

    #[test]
    fn test_codec_registry_restricts() {
        let all = codec_registry(&[]).unwrap();
        assert!(all.contains(&CodecType::JSON) && all.contains(&CodecType::POSTCARD));

        let json_only = codec_registry(&["json".to_string()]).unwrap();
        assert!(json_only.contains(&CodecType::JSON));
        assert!(!json_only.contains(&CodecType::POSTCARD));
        assert_eq!(json_only.get(&CodecType::JSON), Some(Codec::Json(JsonCodec)));
    }

    #[test]
    fn test_parse_select_mode() {
        assert_eq!(parse_select_mode("random").unwrap(), SelectMode::Random);
        assert_eq!(parse_select_mode("round-robin").unwrap(), SelectMode::RoundRobin);
        assert!(parse_select_mode("least-loaded").is_err());
    }

    #[test]
    fn test_advertise_addr_precedence() {
        let local: SocketAddr = "0.0.0.0:9001".parse().unwrap();

        assert_eq!(
            advertise_addr(Some("tcp@10.0.0.1:1".into()), Some("tcp@10.0.0.2:2".into()), "tcp", local).unwrap(),
            "tcp@10.0.0.1:1"
        );
        assert_eq!(
            advertise_addr(None, Some("http@10.0.0.2:2".into()), "tcp", local).unwrap(),
            "http@10.0.0.2:2"
        );
        assert_eq!(advertise_addr(None, None, "http", local).unwrap(), "http@127.0.0.1:9001");
        assert!(advertise_addr(Some("10.0.0.1:1".into()), None, "tcp", local).is_err());
    }
}
