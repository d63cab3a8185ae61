use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{ConnectError, SetupError};
use crate::socks;
use crate::tls;

/// Anything a session can relay over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// One leg of a session, plain or TLS, direct or tunnelled.
pub type BoxedStream = Box<dyn AsyncStream>;

/// How to reach the location server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
    /// SOCKS5 gateway as `host:port`.
    pub socks: Option<String>,
    pub tls: bool,
    /// Skip server certificate validation.
    pub insecure: bool,
    /// Bound on the whole chain: TCP, SOCKS and TLS.
    pub connect_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "supl.google.com".to_string(),
            port: 7275,
            socks: None,
            tls: true,
            insecure: false,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens upstream legs. Built once and shared by every session.
pub struct UpstreamConnector {
    config: UpstreamConfig,
    tls: Option<TlsConnector>,
}

impl UpstreamConnector {
    pub fn new(config: UpstreamConfig) -> Result<Self, SetupError> {
        let tls = if config.tls {
            Some(tls::connector(config.insecure)?)
        } else {
            None
        };
        Ok(Self { config, tls })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// `host:port` of the location server.
    pub fn target(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    pub async fn connect(&self) -> Result<BoxedStream, ConnectError> {
        let limit = self.config.connect_timeout;
        tokio::time::timeout(limit, self.establish())
            .await
            .map_err(|_| ConnectError::Timeout(limit))?
    }

    async fn establish(&self) -> Result<BoxedStream, ConnectError> {
        let host = self.config.host.as_str();
        let port = self.config.port;

        let tcp = match &self.config.socks {
            Some(gateway) => {
                let mut stream =
                    TcpStream::connect(gateway.as_str())
                        .await
                        .map_err(|source| ConnectError::Tcp {
                            addr: gateway.clone(),
                            source,
                        })?;
                socks::connect(&mut stream, host, port)
                    .await
                    .map_err(|source| ConnectError::Socks {
                        gateway: gateway.clone(),
                        source,
                    })?;
                tracing::debug!(%gateway, target = %self.target(), "SOCKS tunnel established");
                stream
            }
            None => TcpStream::connect((host, port))
                .await
                .map_err(|source| ConnectError::Tcp {
                    addr: self.target(),
                    source,
                })?,
        };
        if let Err(err) = tcp.set_nodelay(true) {
            tracing::debug!(%err, "failed to set TCP_NODELAY on upstream socket");
        }

        let Some(connector) = &self.tls else {
            return Ok(Box::new(tcp));
        };
        let name = ServerName::try_from(host.to_string())
            .map_err(|_| ConnectError::ServerName(host.to_string()))?;
        let stream = connector
            .connect(name, tcp)
            .await
            .map_err(|source| ConnectError::Tls {
                host: host.to_string(),
                source,
            })?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(port: u16) -> UpstreamConfig {
        UpstreamConfig {
            host: "127.0.0.1".to_string(),
            port,
            socks: None,
            tls: false,
            insecure: false,
            connect_timeout: Duration::from_secs(2),
        }
    }

    async fn echo_once(listener: TcpListener) {
        let (mut s, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 3];
        s.read_exact(&mut buf).await.unwrap();
        s.write_all(&buf).await.unwrap();
    }

    #[tokio::test]
    async fn direct_plain_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(echo_once(listener));

        let connector = UpstreamConnector::new(config(port)).unwrap();
        let mut leg = connector.connect().await.unwrap();
        leg.write_all(b"abc").await.unwrap();
        let mut buf = [0u8; 3];
        leg.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_is_a_tcp_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = UpstreamConnector::new(config(port)).unwrap();
        assert!(matches!(
            connector.connect().await,
            Err(ConnectError::Tcp { .. })
        ));
    }

    #[tokio::test]
    async fn tunnels_through_socks_gateway() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_port = target.local_addr().unwrap().port();
        let server = tokio::spawn(echo_once(target));

        // Single-shot gateway that expects an IPv4 CONNECT and splices.
        let gateway = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let gateway_addr = gateway.local_addr().unwrap();
        let gw = tokio::spawn(async move {
            let (mut c, _) = gateway.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            c.read_exact(&mut greeting).await.unwrap();
            c.write_all(&[0x05, 0x00]).await.unwrap();
            let mut req = [0u8; 10];
            c.read_exact(&mut req).await.unwrap();
            assert_eq!(&req[..4], &[0x05, 0x01, 0x00, 0x01]);
            let port = u16::from_be_bytes([req[8], req[9]]);
            let mut t = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            c.write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 0])
                .await
                .unwrap();
            let _ = tokio::io::copy_bidirectional(&mut c, &mut t).await;
        });

        let mut cfg = config(target_port);
        cfg.socks = Some(gateway_addr.to_string());
        let connector = UpstreamConnector::new(cfg).unwrap();
        let mut leg = connector.connect().await.unwrap();
        leg.write_all(b"xyz").await.unwrap();
        let mut buf = [0u8; 3];
        leg.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"xyz");

        drop(leg);
        server.await.unwrap();
        gw.await.unwrap();
    }

    #[tokio::test]
    async fn tls_over_tcp_with_validation_bypass() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = crate::tls::tests::self_signed(dir.path());
        let acceptor = crate::tls::acceptor(&cert, &key).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (s, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(s).await.unwrap();
            let mut buf = [0u8; 3];
            tls.read_exact(&mut buf).await.unwrap();
            tls.write_all(&buf).await.unwrap();
            tls.flush().await.unwrap();
        });

        let mut cfg = config(port);
        cfg.host = "localhost".to_string();
        cfg.tls = true;
        cfg.insecure = true;
        let connector = UpstreamConnector::new(cfg).unwrap();
        let mut leg = connector.connect().await.unwrap();
        leg.write_all(b"tls").await.unwrap();
        let mut buf = [0u8; 3];
        leg.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"tls");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn stalled_handshake_hits_connect_timeout() {
        // Accepts TCP but never answers the TLS ClientHello.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (s, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(s);
        });

        let mut cfg = config(port);
        cfg.tls = true;
        cfg.insecure = true;
        cfg.connect_timeout = Duration::from_millis(200);
        let connector = UpstreamConnector::new(cfg).unwrap();
        assert!(matches!(
            connector.connect().await,
            Err(ConnectError::Timeout(_))
        ));
        server.abort();
    }
}
