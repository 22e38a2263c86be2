//! WireRPC Transport Layer
//!
//! This module provides the codecs and the framed reader/writer used to move
//! headers and bodies over any byte stream (TCP, Unix sockets, or an HTTP
//! CONNECT tunnel).
//!
//! # Architecture
//!
//! - **Codec**: [`Codec`] serializes headers and bodies; [`CodecRegistry`]
//!   maps a negotiated [`CodecType`] to a codec constructor
//! - **Framing**: every unit is `[4-byte length as u32 big-endian] + [payload]`
//! - **Reader/Writer**: [`CodecReader`] reads one header or body per call,
//!   [`CodecWriter`] writes a header/body pair in one flush
//! - **Addressing**: [`RpcAddr`] parses `protocol@addr` strings
//!
//! # Message Size Limits
//!
//! Frames larger than [`MAX_FRAME_SIZE`] (100 MB) are rejected before any
//! buffer is allocated.

pub mod addr;
pub mod codec;
pub mod framed;

pub use addr::RpcAddr;
pub use codec::{Codec, CodecRegistry, CodecType, JsonCodec, NewCodecFunc, PostcardCodec};
pub use framed::{
    is_eof, read_frame, write_frame, BoxedReader, BoxedWriter, CodecReader, CodecWriter,
    MAX_FRAME_SIZE,
};
