//! Length-prefixed JSON framing over async byte streams.
//!
//! ```text
//! frame := length (4 bytes, little-endian u32) || payload (length bytes of UTF-8 JSON)
//! ```
//!
//! The same framing is spoken in both directions. Readers enforce an upper
//! bound on the declared length; a zero length is never a valid empty message.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest payload a reader accepts unless configured otherwise (10 MiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Invalid frame length: 0")]
    EmptyFrame,

    #[error("Invalid frame length: {len} (0x{len:08x}), limit is {max} bytes")]
    TooLarge { len: usize, max: usize },

    #[error("Incomplete frame: expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },

    #[error("Malformed payload: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True when the declared length cannot be trusted, so the position of
    /// the next frame boundary is unknown.
    pub fn breaks_framing(&self) -> bool {
        matches!(self, FrameError::EmptyFrame | FrameError::TooLarge { .. })
    }

    /// True when the stream closed in the middle of a payload.
    pub fn is_truncated(&self) -> bool {
        matches!(self, FrameError::Truncated { .. })
    }

    /// Short machine-readable tag used in logs and error responses
    pub fn code(&self) -> &'static str {
        match self {
            FrameError::EmptyFrame => "empty_frame",
            FrameError::TooLarge { .. } => "frame_too_large",
            FrameError::Truncated { .. } => "truncated_frame",
            FrameError::Malformed(_) => "malformed_payload",
            FrameError::NotAnObject => "malformed_payload",
            FrameError::Io(_) => "io_error",
        }
    }
}

/// Serialize `message` into a complete frame (prefix and payload).
///
/// Only payloads that cannot be described by a `u32` length are rejected;
/// the read-side cap is a policy of the receiver.
pub fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(message).map_err(FrameError::Malformed)?;
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads frames from a byte stream
pub struct FrameReader<R> {
    inner: R,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_len(inner, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_len(inner: R, max_len: usize) -> Self {
        Self { inner, max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Read the next raw payload.
    ///
    /// `Ok(None)` means the stream closed before a complete length prefix
    /// arrived, which is the normal shutdown signal.
    pub async fn read_payload(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let prefix = match self.read_prefix().await? {
            Some(prefix) => prefix,
            None => return Ok(None),
        };

        let len = u32::from_le_bytes(prefix) as usize;
        if len == 0 {
            return Err(FrameError::EmptyFrame);
        }
        if len > self.max_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_len,
            });
        }

        let mut payload = vec![0u8; len];
        let mut received = 0;
        while received < len {
            match self.inner.read(&mut payload[received..]).await {
                Ok(0) => {
                    return Err(FrameError::Truncated {
                        expected: len,
                        received,
                    })
                }
                Ok(n) => received += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FrameError::Io(e)),
            }
        }

        debug!(target: "frame", len, "Received frame");
        Ok(Some(payload))
    }

    /// Read the next payload as a JSON object.
    pub async fn read_object(&mut self) -> Result<Option<Map<String, Value>>, FrameError> {
        let payload = match self.read_payload().await? {
            Some(payload) => payload,
            None => return Ok(None),
        };
        match serde_json::from_slice::<Value>(&payload).map_err(FrameError::Malformed)? {
            Value::Object(map) => Ok(Some(map)),
            _ => Err(FrameError::NotAnObject),
        }
    }

    /// Read the next payload and deserialize it into `T`.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        match self.read_payload().await? {
            Some(payload) => serde_json::from_slice(&payload)
                .map(Some)
                .map_err(FrameError::Malformed),
            None => Ok(None),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn read_prefix(&mut self) -> Result<Option<[u8; LENGTH_PREFIX_LEN]>, FrameError> {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_LEN {
            match self.inner.read(&mut prefix[filled..]).await {
                Ok(0) => {
                    if filled > 0 {
                        warn!(
                            target: "frame",
                            received = filled,
                            "Input closed inside a length prefix"
                        );
                    }
                    return Ok(None);
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FrameError::Io(e)),
            }
        }
        Ok(Some(prefix))
    }
}

/// Writes frames to a byte stream.
///
/// Each frame goes out in a single `write_all` followed by a flush. The
/// writer is owned by exactly one task, so frames never interleave.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_message<T: Serialize + ?Sized>(
        &mut self,
        message: &T,
    ) -> Result<(), FrameError> {
        let frame = encode_frame(message)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        debug!(
            target: "frame",
            len = frame.len() - LENGTH_PREFIX_LEN,
            "Sent frame"
        );
        Ok(())
    }

    /// Close the underlying stream, signalling end of input to the peer.
    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
