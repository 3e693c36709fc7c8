//! Wire protocol for tlschat client/server communication.
//!
//! Wire format: `[length: u16 big-endian][payload: UTF-8 bytes]`
//!
//! Every frame carries one line of text. Whether that line is a name
//! announcement (`##name`), a slash-command or plain chat is decided by
//! [`crate::command::parse`], not by the framing.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a single frame can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame payload too large: {len} bytes (max {MAX_FRAME_LEN})")]
    PayloadTooLarge { len: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("frame truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("frame payload is not valid UTF-8")]
    InvalidEncoding,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// True for every error that means the peer is gone or misbehaving and
    /// the connection should be dropped.
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, Self::PayloadTooLarge { .. })
    }
}

/// Encode a line of text into a length-prefixed frame.
pub fn encode_frame(text: &str) -> Result<Bytes, FrameError> {
    let len = text.len();
    if len > MAX_FRAME_LEN {
        return Err(FrameError::PayloadTooLarge { len });
    }
    let mut buf = BytesMut::with_capacity(2 + len);
    buf.put_u16(len as u16);
    buf.put(text.as_bytes());
    Ok(buf.freeze())
}

/// Write one frame to an async writer and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    text: &str,
) -> Result<(), FrameError> {
    let encoded = encode_frame(text)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from an async reader.
///
/// Blocks until the 2-byte header and the full payload have arrived.
pub async fn read_frame<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<String, FrameError> {
    let mut header = [0u8; 2];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if is_closed(&e) => return Err(FrameError::ConnectionClosed),
        Err(e) => return Err(FrameError::Io(e)),
    }
    let expected = u16::from_be_bytes(header) as usize;

    let mut payload = vec![0u8; expected];
    let mut received = 0;
    while received < expected {
        match reader.read(&mut payload[received..]).await {
            Ok(0) => return Err(FrameError::Truncated { expected, received }),
            Ok(n) => received += n,
            Err(e) if is_closed(&e) => return Err(FrameError::Truncated { expected, received }),
            Err(e) => return Err(FrameError::Io(e)),
        }
    }

    String::from_utf8(payload).map_err(|_| FrameError::InvalidEncoding)
}

/// rustls reports a peer that vanished without close_notify as
/// `UnexpectedEof`; both that and a reset count as a closed connection.
fn is_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
