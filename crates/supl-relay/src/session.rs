use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use traffic_log::TrafficSource;

use crate::error::ConnectError;
use crate::identity::Imsi;
use crate::relay::Direction;
use crate::upstream::{BoxedStream, UpstreamConnector};

/// Upper bound on sending close_notify / FIN to a leg.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Relaying,
    Closed,
}

/// One intercepted client connection and its upstream leg.
///
/// Owned by the task that serves the connection; nothing in here is shared.
pub struct Session {
    id: uuid::Uuid,
    peer: SocketAddr,
    state: SessionState,
    client: BoxedStream,
    upstream: Option<BoxedStream>,
    /// Identity sent upstream in place of the subscriber's.
    fabricated: Option<Imsi>,
    /// Identity seen on the client message of the current round-trip.
    original: Option<Imsi>,
    exchanged: u64,
}

impl Session {
    pub fn new(peer: SocketAddr, client: BoxedStream, fabricated: Option<Imsi>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            peer,
            state: SessionState::Connecting,
            client,
            upstream: None,
            fabricated,
            original: None,
            exchanged: 0,
        }
    }

    /// Session over an already open upstream leg.
    pub fn relaying(
        peer: SocketAddr,
        client: BoxedStream,
        upstream: BoxedStream,
        fabricated: Option<Imsi>,
    ) -> Self {
        let mut session = Self::new(peer, client, fabricated);
        session.upstream = Some(upstream);
        session.state = SessionState::Relaying;
        session
    }

    /// Open the upstream leg. On failure the session stays unconnected and
    /// should be closed.
    pub async fn connect(&mut self, connector: &UpstreamConnector) -> Result<(), ConnectError> {
        let upstream = connector.connect().await?;
        self.upstream = Some(upstream);
        self.state = SessionState::Relaying;
        Ok(())
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn fabricated(&self) -> Option<&Imsi> {
        self.fabricated.as_ref()
    }

    pub fn original(&self) -> Option<&Imsi> {
        self.original.as_ref()
    }

    pub(crate) fn set_original(&mut self, original: Option<Imsi>) {
        self.original = original;
    }

    /// Messages forwarded in either direction so far.
    pub fn exchanged(&self) -> u64 {
        self.exchanged
    }

    pub(crate) fn count_message(&mut self) {
        self.exchanged += 1;
    }

    /// The leg a message in `direction` is read from.
    pub(crate) fn source_leg(&mut self, direction: Direction) -> Option<&mut BoxedStream> {
        match direction {
            Direction::Upstream => Some(&mut self.client),
            Direction::Downstream => self.upstream.as_mut(),
        }
    }

    /// The leg a message in `direction` is written to.
    pub(crate) fn sink_leg(&mut self, direction: Direction) -> Option<&mut BoxedStream> {
        match direction {
            Direction::Upstream => self.upstream.as_mut(),
            Direction::Downstream => Some(&mut self.client),
        }
    }

    pub fn traffic_source(&self) -> TrafficSource {
        TrafficSource {
            component: "supl-relay".to_string(),
            remote_addr: Some(self.peer.to_string()),
            session_id: Some(self.id.to_string()),
        }
    }

    /// Shut down both legs. Calling it again does nothing.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.client.shutdown()).await;
        if let Some(upstream) = self.upstream.as_mut() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, upstream.shutdown()).await;
        }
        tracing::debug!(session_id = %self.id, peer = %self.peer, "session legs closed");
    }
}
