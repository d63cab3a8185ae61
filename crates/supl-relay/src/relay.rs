use std::fmt;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use traffic_log::{TrafficEntry, TrafficEventType, TrafficSink, TrafficSource};

use crate::codecs::{Codecs, ULP_PDU};
use crate::error::RelayError;
use crate::framer::{read_frame, stamp_length, FrameTimeouts};
use crate::identity::Imsi;
use crate::rewrite;
use crate::session::Session;

/// Direction of message flow through a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Mobile -> location server
    Upstream,
    /// Location server -> mobile
    Downstream,
}

impl Direction {
    /// Who sent the message: `mobile` or `server`.
    pub fn tag(self) -> &'static str {
        match self {
            Direction::Upstream => "mobile",
            Direction::Downstream => "server",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Per-message deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub frames: FrameTimeouts,
    pub write_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            frames: FrameTimeouts::default(),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum Outcome {
    /// The sender of the next expected message closed its leg.
    PeerClosed(Direction),
    /// The proxy is stopping and the session was force-closed.
    Shutdown,
    Failed(RelayError),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::PeerClosed(Direction::Upstream) => "client_closed",
            Outcome::PeerClosed(Direction::Downstream) => "server_closed",
            Outcome::Shutdown => "shutdown",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// Drives sessions: decode, rewrite, re-encode and forward, one message per
/// direction per round-trip.
pub struct Relay {
    config: RelayConfig,
    codecs: Codecs,
    traffic: TrafficSink,
}

impl Relay {
    pub fn new(config: RelayConfig, codecs: Codecs, traffic: TrafficSink) -> Self {
        Self {
            config,
            codecs,
            traffic,
        }
    }

    /// Relay until either side closes, something fails, or `shutdown` fires.
    /// Both legs are closed before returning.
    pub async fn run(&self, session: &mut Session, shutdown: &CancellationToken) -> Outcome {
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Outcome::Shutdown,
            outcome = self.exchange(session) => outcome,
        };
        session.close().await;
        self.record_outcome(Summary::of(session), &outcome).await;
        outcome
    }

    async fn exchange(&self, session: &mut Session) -> Outcome {
        loop {
            for direction in [Direction::Upstream, Direction::Downstream] {
                match self.forward(session, direction).await {
                    Ok(true) => {}
                    Ok(false) => return Outcome::PeerClosed(direction),
                    Err(err) => return Outcome::Failed(err),
                }
            }
        }
    }

    /// Move one message in `direction`. `Ok(false)` means the sending leg
    /// closed before the next message started.
    async fn forward(&self, session: &mut Session, direction: Direction) -> Result<bool, RelayError> {
        let reader = session
            .source_leg(direction)
            .ok_or_else(|| not_connected(direction))?;
        let frame = read_frame(reader, self.config.frames)
            .await
            .map_err(|source| RelayError::Framing { direction, source })?;
        let Some(frame) = frame else {
            return Ok(false);
        };

        let mut pdu = self
            .codecs
            .supl
            .decode(ULP_PDU, frame.as_bytes())
            .map_err(|source| RelayError::Decode { direction, source })?;

        let subscriber = match direction {
            Direction::Upstream => {
                let fabricated = session.fabricated().cloned();
                let original = rewrite::substitute_identity(&mut pdu, fabricated.as_ref())
                    .map_err(|source| RelayError::Identity { direction, source })?;
                if let (Some(original), Some(fabricated)) = (&original, &fabricated) {
                    self.record_substitution(Summary::of(session), original, fabricated)
                        .await;
                }
                session.set_original(original.clone());
                original
            }
            Direction::Downstream => session.original().cloned(),
        };

        let mut bytes = self
            .codecs
            .supl
            .encode(ULP_PDU, &pdu)
            .map_err(|source| RelayError::Encode { direction, source })?;
        stamp_length(&mut bytes).map_err(|source| RelayError::Framing { direction, source })?;

        let view = rewrite::annotate(&pdu, &self.codecs, subscriber.as_ref());
        tracing::info!(
            session_id = %session.id(),
            direction = direction.tag(),
            bytes = bytes.len(),
            message = %view,
            "relaying message"
        );

        let writer = session
            .sink_leg(direction)
            .ok_or_else(|| not_connected(direction))?;
        let limit = self.config.write_timeout;
        tokio::time::timeout(limit, async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| RelayError::WriteTimeout {
            direction,
            after: limit,
        })?
        .map_err(|source| RelayError::Transport { direction, source })?;

        session.count_message();
        let source = session.traffic_source();
        self.traffic
            .log(
                TrafficEntry::new(
                    TrafficEventType::MessageRelayed,
                    source,
                    serde_json::json!({
                        "bytes": bytes.len(),
                        "subscriber": subscriber.as_ref().map(Imsi::as_str),
                        "message": view,
                    }),
                )
                .with_direction(direction.tag()),
            )
            .await;
        Ok(true)
    }

    async fn record_substitution(&self, session: Summary, original: &Imsi, replacement: &Imsi) {
        tracing::info!(
            session_id = %session.id,
            %original,
            %replacement,
            "replacing subscriber identity"
        );
        self.traffic
            .log(
                TrafficEntry::new(
                    TrafficEventType::IdentitySubstituted,
                    session.source,
                    serde_json::json!({
                        "original": original.as_str(),
                        "replacement": replacement.as_str(),
                    }),
                )
                .with_direction(Direction::Upstream.tag()),
            )
            .await;
    }

    async fn record_outcome(&self, session: Summary, outcome: &Outcome) {
        let mut details = serde_json::json!({
            "outcome": outcome.label(),
            "messages": session.exchanged,
        });
        match outcome {
            Outcome::Failed(err) => {
                tracing::warn!(
                    session_id = %session.id,
                    peer = %session.peer,
                    direction = err.direction().tag(),
                    kind = err.kind(),
                    %err,
                    "session failed"
                );
                details["error"] = serde_json::Value::String(err.to_string());
                details["kind"] = serde_json::Value::String(err.kind().to_string());
                details["direction"] = serde_json::Value::String(err.direction().tag().to_string());
            }
            other => {
                tracing::info!(
                    session_id = %session.id,
                    peer = %session.peer,
                    outcome = other.label(),
                    messages = session.exchanged,
                    "session closed"
                );
            }
        }
        self.traffic
            .log(TrafficEntry::new(
                TrafficEventType::SessionClosed,
                session.source,
                details,
            ))
            .await;
    }
}

/// Owned copy of what the log records need from a session.
struct Summary {
    id: uuid::Uuid,
    peer: std::net::SocketAddr,
    exchanged: u64,
    source: TrafficSource,
}

impl Summary {
    fn of(session: &Session) -> Self {
        Self {
            id: session.id(),
            peer: session.peer(),
            exchanged: session.exchanged(),
            source: session.traffic_source(),
        }
    }
}

fn not_connected(direction: Direction) -> RelayError {
    RelayError::Transport {
        direction,
        source: std::io::Error::new(std::io::ErrorKind::NotConnected, "upstream leg not connected"),
    }
}
