//! Length-prefixed message framing.
//!
//! Every SUPL message starts with a 2-byte big-endian length that counts the
//! prefix itself. The prefix is also the first field of the ULP PDU, so the
//! framer hands out whole messages, prefix included.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::FrameError;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 2;

/// Largest message the 16-bit prefix can describe.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Read deadlines for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTimeouts {
    /// How long to wait for the first byte of the next message.
    pub idle: Duration,
    /// How long the rest of a message may take once its first byte arrived.
    pub continuation: Duration,
}

impl Default for FrameTimeouts {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(60),
            continuation: Duration::from_secs(2),
        }
    }
}

/// Which part of a message a read was waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStage {
    /// Waiting for the next message to start.
    Idle,
    /// Waiting for the rest of a message already started.
    Continuation,
}

impl std::fmt::Display for ReadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadStage::Idle => f.write_str("next message"),
            ReadStage::Continuation => f.write_str("message continuation"),
        }
    }
}

/// One complete wire message, length prefix included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    /// The complete message as it appeared on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The message without its length prefix.
    pub fn payload(&self) -> &[u8] {
        &self.0[HEADER_LEN..]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Frame, FrameError> {
    let total = payload.len() + HEADER_LEN;
    if total > MAX_MESSAGE_LEN {
        return Err(FrameError::TooLong(total));
    }
    let mut bytes = Vec::with_capacity(total);
    bytes.extend_from_slice(&(total as u16).to_be_bytes());
    bytes.extend_from_slice(payload);
    Ok(Frame(bytes))
}

/// Overwrite the length prefix of an encoded message with its real length.
pub fn stamp_length(bytes: &mut [u8]) -> Result<(), FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::InvalidLength(bytes.len() as u16));
    }
    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(FrameError::TooLong(bytes.len()));
    }
    let prefix = (bytes.len() as u16).to_be_bytes();
    bytes[..HEADER_LEN].copy_from_slice(&prefix);
    Ok(())
}

/// Read exactly one message from `reader`.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before the
/// first byte of a message.
pub async fn read_frame<R>(reader: &mut R, timeouts: FrameTimeouts) -> Result<Option<Frame>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];

    let first = tokio::time::timeout(timeouts.idle, reader.read(&mut header))
        .await
        .map_err(|_| FrameError::Timeout {
            stage: ReadStage::Idle,
            after: timeouts.idle,
        })?
        .map_err(FrameError::Io)?;
    if first == 0 {
        return Ok(None);
    }
    if first < HEADER_LEN {
        read_exact_within(reader, &mut header[first..], timeouts.continuation).await?;
    }

    let length = u16::from_be_bytes(header);
    if (length as usize) < HEADER_LEN {
        return Err(FrameError::InvalidLength(length));
    }

    let mut bytes = vec![0u8; length as usize];
    bytes[..HEADER_LEN].copy_from_slice(&header);
    read_exact_within(reader, &mut bytes[HEADER_LEN..], timeouts.continuation).await?;
    Ok(Some(Frame(bytes)))
}

async fn read_exact_within<R>(reader: &mut R, buf: &mut [u8], limit: Duration) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    if buf.is_empty() {
        return Ok(());
    }
    tokio::time::timeout(limit, reader.read_exact(buf))
        .await
        .map_err(|_| FrameError::Timeout {
            stage: ReadStage::Continuation,
            after: limit,
        })?
        .map_err(FrameError::Io)?;
    Ok(())
}
