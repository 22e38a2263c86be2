use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::Header;
use crate::transport::codec::Codec;

/// Largest frame accepted by [`read_frame`] (100 MB).
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Read half of a connection, erased so clients and servers are not generic over the transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Sends a message with length prefix and flushes.
///
/// Wire format: `[4-byte length as u32 big-endian] + [data]`
///
/// # Errors
///
/// Returns an error if the payload exceeds [`MAX_FRAME_SIZE`] or writing fails
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    put_frame(writer, data).await?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing stream"))
}

/// Receives a message with length prefix.
///
/// # Errors
///
/// Returns an error if:
/// - Reading the length prefix fails (a clean disconnect surfaces as EOF, see [`is_eof`])
/// - Message exceeds maximum size (100 MB)
/// - Reading the data fails
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| map_io_error(e, "reading length prefix"))?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| map_io_error(e, "reading data"))?;

    Ok(buf)
}

/// True when the error means the peer closed the stream between frames.
pub fn is_eof(err: &RpcError) -> bool {
    matches!(err, RpcError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

async fn put_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if data.len() > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge(data.len(), MAX_FRAME_SIZE));
    }
    let len = data.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| map_io_error(e, "writing length prefix"))?;
    writer
        .write_all(data)
        .await
        .map_err(|e| map_io_error(e, "writing data"))
}

/// Map IO errors to appropriate RpcError variants
///
/// - Connection errors -> `Connection`
/// - Other IO errors (including EOF) -> `Io`
fn map_io_error(err: std::io::Error, context: &str) -> RpcError {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected => {
            RpcError::Connection(format!("{}: connection lost", context))
        }
        _ => RpcError::Io(err),
    }
}

/// Reads headers and bodies from one side of a negotiated connection.
///
/// Each call consumes exactly one frame, so a body can be skipped with
/// [`CodecReader::discard_body`] without knowing its type.
pub struct CodecReader {
    reader: BufReader<BoxedReader>,
    codec: Codec,
}

impl CodecReader {
    pub fn new(reader: BoxedReader, codec: Codec) -> Self {
        Self {
            reader: BufReader::new(reader),
            codec,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub async fn read_header(&mut self) -> Result<Header> {
        let frame = read_frame(&mut self.reader).await?;
        self.codec.decode(&frame)
    }

    pub async fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        let frame = read_frame(&mut self.reader).await?;
        self.codec.decode(&frame)
    }

    /// Reads the next body without decoding it.
    pub async fn read_body_bytes(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.reader).await
    }

    pub async fn discard_body(&mut self) -> Result<()> {
        read_frame(&mut self.reader).await.map(|_| ())
    }
}

/// Writes header/body pairs to one side of a negotiated connection.
///
/// Both halves are encoded before anything touches the stream and then
/// flushed together. Any encode or I/O failure shuts the stream down, after
/// which every write fails with [`RpcError::Shutdown`].
pub struct CodecWriter {
    writer: BufWriter<BoxedWriter>,
    codec: Codec,
    closed: bool,
}

impl CodecWriter {
    pub fn new(writer: BoxedWriter, codec: Codec) -> Self {
        Self {
            writer: BufWriter::new(writer),
            codec,
            closed: false,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Encodes `body` with the connection codec and writes it after `header`.
    pub async fn write<T: Serialize + ?Sized>(&mut self, header: &Header, body: &T) -> Result<()> {
        if self.closed {
            return Err(RpcError::Shutdown);
        }
        let body = match self.codec.encode(body) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "rpc codec: failed to encode body");
                self.close().await;
                return Err(e);
            }
        };
        self.write_encoded(header, &body).await
    }

    /// Writes `header` followed by an already encoded body.
    pub async fn write_encoded(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        if self.closed {
            return Err(RpcError::Shutdown);
        }
        let header = match self.codec.encode(header) {
            Ok(header) => header,
            Err(e) => {
                tracing::error!(error = %e, "rpc codec: failed to encode header");
                self.close().await;
                return Err(e);
            }
        };
        if let Err(e) = self.write_pair(&header, body).await {
            tracing::error!(error = %e, "rpc codec: failed to write message");
            self.close().await;
            return Err(e);
        }
        Ok(())
    }

    async fn write_pair(&mut self, header: &[u8], body: &[u8]) -> Result<()> {
        put_frame(&mut self.writer, header).await?;
        put_frame(&mut self.writer, body).await?;
        self.writer
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))
    }

    /// Shuts the stream down. Idempotent.
    ///
    /// Bytes still buffered from an abandoned write are dropped instead of
    /// flushed, so closing never waits on a peer that stopped reading.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.writer.get_mut().shutdown().await {
            tracing::debug!(error = %e, "rpc codec: shutdown failed");
        }
    }
}
