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

//! WireRPC Common Types and Transport
//!
//! This crate provides the wire protocol definitions and the framed codec
//! layer shared by WireRPC clients and servers.
//!
//! # Overview
//!
//! WireRPC is a small RPC runtime: a client opens a connection, negotiates a
//! codec with an [`Options`] handshake, and then exchanges `Header`/`Body`
//! pairs with the server. This crate contains the pieces both ends agree on:
//!
//! - **Protocol Layer**: [`Options`], [`Header`], the [`RpcError`] taxonomy
//! - **Transport Layer**: [`transport::Codec`], [`transport::CodecRegistry`],
//!   length-prefixed framing and the `protocol@addr` address format
//!
//! # Wire Format
//!
//! ```text
//! | Options (JSON) | Options echo (JSON) | Header1 | Body1 | Header2 | Body2 | ...
//! ```
//!
//! Every unit is framed as `[4-byte length as u32 big-endian] + [payload]`,
//! capped at 100 MB. Headers and bodies use the negotiated codec.
//!
//! # Example
//!
//! ```
//! use wirerpc_common::{Header, Options};
//! use wirerpc_common::transport::{CodecRegistry, CodecType};
//!
//! let opt = Options::default().with_codec(CodecType::JSON);
//! let codec = CodecRegistry::default().get(&opt.codec_type).unwrap();
//!
//! let header = Header::request("Foo.Sum", 1);
//! let encoded = codec.encode(&header).unwrap();
//! let decoded: Header = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded.seq, 1);
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
