use std::net::SocketAddr;
use std::time::Duration;

use supl_codec::{DecodeError, EncodeError};
use thiserror::Error;

use crate::framer::ReadStage;
use crate::relay::Direction;
use crate::socks::SocksError;
use crate::tbcd::TbcdError;

/// Failure to read one framed message.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("timed out after {after:?} waiting for {stage}")]
    Timeout { stage: ReadStage, after: Duration },

    #[error("invalid length prefix {0}")]
    InvalidLength(u16),

    #[error("message of {0} bytes does not fit a 16-bit length prefix")]
    TooLong(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure to establish the upstream leg of a session.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("upstream connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to connect to {addr}: {source}")]
    Tcp {
        addr: String,
        source: std::io::Error,
    },

    #[error("SOCKS gateway {gateway}: {source}")]
    Socks { gateway: String, source: SocksError },

    #[error("invalid TLS server name '{0}'")]
    ServerName(String),

    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        host: String,
        source: std::io::Error,
    },
}

/// A session-ending failure while relaying.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{direction} framing: {source}")]
    Framing {
        direction: Direction,
        source: FrameError,
    },

    #[error("{direction} decode: {source}")]
    Decode {
        direction: Direction,
        source: DecodeError,
    },

    #[error("{direction} encode: {source}")]
    Encode {
        direction: Direction,
        source: EncodeError,
    },

    #[error("{direction} identity: {source}")]
    Identity {
        direction: Direction,
        source: TbcdError,
    },

    #[error("{direction} write timed out after {after:?}")]
    WriteTimeout { direction: Direction, after: Duration },

    #[error("{direction} transport: {source}")]
    Transport {
        direction: Direction,
        source: std::io::Error,
    },
}

impl RelayError {
    /// Direction of the message being handled when the session failed.
    pub fn direction(&self) -> Direction {
        match self {
            Self::Framing { direction, .. }
            | Self::Decode { direction, .. }
            | Self::Encode { direction, .. }
            | Self::Identity { direction, .. }
            | Self::WriteTimeout { direction, .. }
            | Self::Transport { direction, .. } => *direction,
        }
    }

    /// Short machine-readable name used in traffic log records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Framing {
                source: FrameError::Timeout { .. },
                ..
            }
            | Self::WriteTimeout { .. } => "timeout",
            Self::Framing {
                source: FrameError::Io(_),
                ..
            }
            | Self::Transport { .. } => "transport",
            Self::Framing { .. } => "framing",
            Self::Decode { .. } => "decode",
            Self::Encode { .. } | Self::Identity { .. } => "encode",
        }
    }
}

/// Fatal startup failure.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    ReadPem {
        path: String,
        source: std::io::Error,
    },

    #[error("no {what} found in {path}")]
    MissingPem { what: &'static str, path: String },

    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error("no listener configured")]
    NoListener,

    #[error("invalid IMSI prefix: {0}")]
    ImsiPrefix(TbcdError),
}
