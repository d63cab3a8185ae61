//! Protocol-aware relay for SUPL location sessions.
//!
//! This crate sits between a mobile device and its location server. Every
//! SUPL message is framed, decoded through the compiled grammars, has its
//! subscriber identity replaced on the way to the server, and is re-encoded
//! before being forwarded. A display copy of each message (positions in
//! degrees, embedded RRLP / LPP payloads expanded when their grammars are
//! installed) goes to the traffic log.
//!
//! # Architecture
//!
//! ```text
//! Mobile  <--TCP/TLS-->  supl-relay  <--TCP/TLS (via SOCKS)-->  SLP
//!                            |
//!                  [Codecs] [Rewrite]
//!                            |
//!                      [Traffic Sink]
//! ```
//!
//! Each session alternates strictly: one message from the mobile, then one
//! from the server. Pipelined or unsolicited messages are not supported.

pub mod codecs;
pub mod display;
pub mod error;
pub mod framer;
pub mod identity;
pub mod listener;
pub mod relay;
pub mod rewrite;
pub mod session;
pub mod socks;
pub mod tbcd;
pub mod tls;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use codecs::Codecs;
pub use error::{ConnectError, FrameError, RelayError, SetupError};
pub use identity::Imsi;
pub use listener::{Proxy, ProxyConfig, TlsListen};
pub use relay::{Direction, Outcome, Relay, RelayConfig};
pub use session::{Session, SessionState};
pub use upstream::{UpstreamConfig, UpstreamConnector};
