use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::error::{Result, RpcError};
use crate::transport::CodecType;

/// Marks a connection as speaking the WireRPC protocol.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default bound on connection establishment (transport connect + handshake).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake record sent by the client as the first frame of a connection.
///
/// The server validates it and echoes it back; both ends then use
/// `codec_type` for every header and body. A zero duration means "no limit".
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use wirerpc_common::Options;
/// use wirerpc_common::transport::CodecType;
///
/// let opt = Options::default()
///     .with_codec(CodecType::JSON)
///     .with_handle_timeout(Duration::from_secs(1));
/// assert!(opt.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub magic_number: u32,
    pub codec_type: CodecType,
    /// Serialized as whole milliseconds.
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecType::POSTCARD,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    pub fn with_codec(mut self, codec_type: CodecType) -> Self {
        self.codec_type = codec_type;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }

    /// Checks the magic number.
    ///
    /// Codec availability is checked against a [`crate::transport::CodecRegistry`]
    /// by whoever owns one.
    pub fn validate(&self) -> Result<()> {
        if self.magic_number != MAGIC_NUMBER {
            return Err(RpcError::InvalidMagic(self.magic_number));
        }
        Ok(())
    }

    /// Encodes the handshake frame payload. The handshake is always JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| RpcError::Protocol(format!("malformed options: {}", e)))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
