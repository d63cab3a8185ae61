use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use traffic_log::{TrafficEntry, TrafficEventType, TrafficSink, TrafficSource};

use crate::codecs::Codecs;
use crate::error::SetupError;
use crate::identity::Imsi;
use crate::relay::{Relay, RelayConfig};
use crate::session::Session;
use crate::upstream::{BoxedStream, UpstreamConfig, UpstreamConnector};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for the SUPL proxy.
pub struct ProxyConfig {
    /// Address the client-facing listeners bind to.
    pub bind: IpAddr,
    /// Port of the plain TCP listener.
    pub tcp_port: Option<u16>,
    /// Port and server credentials of the TLS listener.
    pub tls: Option<TlsListen>,
    pub upstream: UpstreamConfig,
    pub relay: RelayConfig,
    /// Replace the subscriber identity on client messages.
    pub anonymize: bool,
    /// Leading digits of fabricated identities.
    pub imsi_prefix: String,
    /// How long in-flight sessions may drain after a stop.
    pub shutdown_grace: Duration,
    pub codecs: Codecs,
    pub traffic: TrafficSink,
}

pub struct TlsListen {
    pub port: u16,
    pub acceptor: TlsAcceptor,
}

/// Shared by every session task.
struct Shared {
    connector: UpstreamConnector,
    relay: Relay,
    anonymize: bool,
    imsi_prefix: String,
    traffic: TrafficSink,
}

struct Bound {
    listener: TcpListener,
    addr: SocketAddr,
    tls: Option<TlsAcceptor>,
}

/// The SUPL intercepting proxy.
///
/// Accepts mobile connections on a plain and/or TLS port, opens a matching
/// connection to the location server and relays messages through a
/// [`Relay`] until either side goes away.
pub struct Proxy {
    listeners: Vec<Bound>,
    shared: Arc<Shared>,
    shutdown_grace: Duration,
}

impl Proxy {
    /// Bind every configured listener.
    pub async fn bind(config: ProxyConfig) -> Result<Self, SetupError> {
        if config.tcp_port.is_none() && config.tls.is_none() {
            return Err(SetupError::NoListener);
        }
        if config.anonymize {
            Imsi::fabricate(&config.imsi_prefix).map_err(SetupError::ImsiPrefix)?;
        }

        let mut listeners = Vec::new();
        if let Some(port) = config.tcp_port {
            listeners.push(bind_one(SocketAddr::new(config.bind, port), None).await?);
        }
        if let Some(tls) = config.tls {
            listeners.push(bind_one(SocketAddr::new(config.bind, tls.port), Some(tls.acceptor)).await?);
        }

        let connector = UpstreamConnector::new(config.upstream)?;
        let shared = Shared {
            connector,
            relay: Relay::new(config.relay, config.codecs, config.traffic.clone()),
            anonymize: config.anonymize,
            imsi_prefix: config.imsi_prefix,
            traffic: config.traffic,
        };

        Ok(Self {
            listeners,
            shared: Arc::new(shared),
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.listeners.iter().find(|l| l.tls.is_none()).map(|l| l.addr)
    }

    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.listeners.iter().find(|l| l.tls.is_some()).map(|l| l.addr)
    }

    /// Accept connections until `shutdown` fires, then give in-flight
    /// sessions the grace period before force-closing them.
    pub async fn run(self, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();
        let force_close = CancellationToken::new();

        let loops = self.listeners.into_iter().map(|bound| {
            accept_loop(
                bound,
                Arc::clone(&self.shared),
                tracker.clone(),
                shutdown.clone(),
                force_close.clone(),
            )
        });
        futures_util::future::join_all(loops).await;

        tracker.close();
        tracing::info!(active = tracker.len(), "listeners stopped, draining sessions");
        if tokio::time::timeout(self.shutdown_grace, tracker.wait()).await.is_err() {
            tracing::warn!(
                active = tracker.len(),
                grace = ?self.shutdown_grace,
                "grace period elapsed, closing remaining sessions"
            );
            force_close.cancel();
            tracker.wait().await;
        }
        tracing::info!("supl proxy stopped");
    }
}

async fn bind_one(addr: SocketAddr, tls: Option<TlsAcceptor>) -> Result<Bound, SetupError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| SetupError::Bind { addr, source })?;
    let addr = listener
        .local_addr()
        .map_err(|source| SetupError::Bind { addr, source })?;
    tracing::info!(%addr, tls = tls.is_some(), "supl proxy listening");
    Ok(Bound { listener, addr, tls })
}

async fn accept_loop(
    bound: Bound,
    shared: Arc<Shared>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    force_close: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = bound.listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote_addr)) => {
                tracker.spawn(handle_connection(
                    stream,
                    remote_addr,
                    bound.tls.clone(),
                    Arc::clone(&shared),
                    force_close.clone(),
                ));
            }
            Err(err) => {
                tracing::warn!(addr = %bound.addr, %err, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Serve one mobile connection from accept through relay and teardown.
async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    shared: Arc<Shared>,
    force_close: CancellationToken,
) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(%remote_addr, %err, "failed to set TCP_NODELAY");
    }

    let transport = if tls.is_some() { "tls" } else { "tcp" };
    let handshake_limit = shared.connector.config().connect_timeout;
    let client: BoxedStream = match tls {
        None => Box::new(stream),
        Some(acceptor) => match tokio::time::timeout(handshake_limit, acceptor.accept(stream)).await {
            Ok(Ok(tls_stream)) => Box::new(tls_stream),
            Ok(Err(err)) => {
                tracing::warn!(%remote_addr, %err, "client TLS handshake failed");
                return;
            }
            Err(_) => {
                tracing::warn!(%remote_addr, "client TLS handshake timed out");
                return;
            }
        },
    };

    let fabricated = if shared.anonymize {
        match Imsi::fabricate(&shared.imsi_prefix) {
            Ok(imsi) => Some(imsi),
            Err(err) => {
                tracing::error!(%err, "cannot fabricate identity");
                return;
            }
        }
    } else {
        None
    };

    let mut session = Session::new(remote_addr, client, fabricated);
    let session_id = session.id();
    tracing::info!(%session_id, %remote_addr, transport, "client connected");
    let opened = TrafficEntry::new(
        TrafficEventType::SessionOpened,
        session.traffic_source(),
        serde_json::json!({
            "transport": transport,
            "upstream": shared.connector.target(),
            "fabricated": session.fabricated().map(Imsi::as_str),
        }),
    );
    shared.traffic.log(opened).await;

    let connected = tokio::select! {
        _ = force_close.cancelled() => None,
        connected = session.connect(&shared.connector) => Some(connected),
    };
    match connected {
        Some(Ok(())) => {
            tracing::debug!(%session_id, upstream = %shared.connector.target(), "upstream connected");
        }
        Some(Err(err)) => {
            tracing::warn!(%session_id, %remote_addr, %err, "upstream connect failed");
            let source = session.traffic_source();
            session.close().await;
            log_upstream_failure(&shared.traffic, source, shared.connector.target(), err.to_string()).await;
            return;
        }
        None => {
            session.close().await;
            return;
        }
    }

    shared.relay.run(&mut session, &force_close).await;
}

async fn log_upstream_failure(traffic: &TrafficSink, source: TrafficSource, upstream: String, error: String) {
    traffic
        .log(TrafficEntry::new(
            TrafficEventType::UpstreamFailed,
            source.clone(),
            serde_json::json!({ "upstream": upstream, "error": error }),
        ))
        .await;
    traffic
        .log(TrafficEntry::new(
            TrafficEventType::SessionClosed,
            source,
            serde_json::json!({ "outcome": "upstream_failed", "messages": 0 }),
        ))
        .await;
}
