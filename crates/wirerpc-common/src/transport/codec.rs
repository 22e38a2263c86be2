use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::protocol::error::{Result, RpcError};

/// Name of a codec as negotiated in the [`crate::Options`] handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodecType(Cow<'static, str>);

impl CodecType {
    /// Compact binary codec, the default.
    pub const POSTCARD: CodecType = CodecType(Cow::Borrowed("application/postcard"));
    pub const JSON: CodecType = CodecType(Cow::Borrowed("application/json"));

    pub fn new(name: impl Into<String>) -> Self {
        CodecType(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Codec for encoding/decoding headers and bodies.
///
/// Each variant is a concrete serializer; the enum keeps dispatch static
/// while letting a connection pick its format at handshake time.
///
/// # Example
///
/// ```
/// use wirerpc_common::transport::{Codec, PostcardCodec};
///
/// let codec = Codec::Postcard(PostcardCodec);
/// let encoded = codec.encode(&(3i64, 4i64)).unwrap();
/// let decoded: (i64, i64) = codec.decode(&encoded).unwrap();
/// assert_eq!(decoded, (3, 4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Postcard(PostcardCodec),
    Json(JsonCodec),
}

impl Codec {
    pub fn codec_type(&self) -> CodecType {
        match self {
            Codec::Postcard(_) => CodecType::POSTCARD,
            Codec::Json(_) => CodecType::JSON,
        }
    }

    /// Encode a value to bytes
    ///
    /// # Arguments
    ///
    /// * `value` - The header or body to encode
    ///
    /// # Returns
    ///
    /// The encoded value as a byte vector
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Postcard(_) => PostcardCodec::encode(value),
            Codec::Json(_) => JsonCodec::encode(value),
        }
    }

    /// Decode a value from bytes
    ///
    /// # Arguments
    ///
    /// * `data` - The encoded header or body
    ///
    /// # Returns
    ///
    /// The decoded value
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Codec::Postcard(_) => PostcardCodec::decode(data),
            Codec::Json(_) => JsonCodec::decode(data),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Postcard(PostcardCodec)
    }
}

/// Binary codec backed by `postcard`.
///
/// Not self-describing: the reader must know the exact type it expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostcardCodec;

impl PostcardCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(postcard::from_bytes(data)?)
    }
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Constructor stored in a [`CodecRegistry`].
pub type NewCodecFunc = fn() -> Codec;

/// Maps negotiated codec names to codec constructors.
///
/// Each server and client owns its own registry; the default one knows
/// both built-in codecs. A server built with a narrower registry refuses
/// handshakes asking for anything else.
///
/// # Example
///
/// ```
/// use wirerpc_common::transport::{Codec, CodecRegistry, CodecType, JsonCodec};
///
/// let registry = CodecRegistry::empty().with(CodecType::JSON, || Codec::Json(JsonCodec));
/// assert!(registry.get(&CodecType::JSON).is_some());
/// assert!(registry.get(&CodecType::POSTCARD).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    constructors: HashMap<CodecType, NewCodecFunc>,
}

impl CodecRegistry {
    /// Creates a registry with no codecs.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers (or replaces) the constructor for `codec_type`.
    pub fn register(&mut self, codec_type: CodecType, constructor: NewCodecFunc) {
        self.constructors.insert(codec_type, constructor);
    }

    /// Builder form of [`CodecRegistry::register`].
    pub fn with(mut self, codec_type: CodecType, constructor: NewCodecFunc) -> Self {
        self.register(codec_type, constructor);
        self
    }

    pub fn get(&self, codec_type: &CodecType) -> Option<Codec> {
        self.constructors.get(codec_type).map(|constructor| constructor())
    }

    /// Like [`CodecRegistry::get`] but reports an unknown codec as an error.
    pub fn resolve(&self, codec_type: &CodecType) -> Result<Codec> {
        self.get(codec_type)
            .ok_or_else(|| RpcError::UnsupportedCodec(codec_type.to_string()))
    }

    pub fn contains(&self, codec_type: &CodecType) -> bool {
        self.constructors.contains_key(codec_type)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::empty()
            .with(CodecType::POSTCARD, || Codec::Postcard(PostcardCodec))
            .with(CodecType::JSON, || Codec::Json(JsonCodec))
    }
}
