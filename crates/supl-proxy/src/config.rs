use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use supl_relay::framer::FrameTimeouts;
use supl_relay::{RelayConfig, UpstreamConfig};
use traffic_log::RotationPolicy;

use crate::cli::Cli;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub listen: ListenSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default = "default_grammar_dir")]
    pub grammar_dir: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: UpstreamSection::default(),
            listen: ListenSection::default(),
            relay: RelaySection::default(),
            grammar_dir: default_grammar_dir(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_upstream_host")]
    pub host: String,
    #[serde(default = "default_supl_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default)]
    pub insecure: bool,
    /// SOCKS5 gateway as `host:port`.
    #[serde(default)]
    pub socks: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            host: default_upstream_host(),
            port: default_supl_port(),
            tls: default_true(),
            insecure: false,
            socks: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListenSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// Plain TCP port. `null` disables the plain listener.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: Option<u16>,
    #[serde(default)]
    pub tls_port: Option<u16>,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            tcp_port: default_tcp_port(),
            tls_port: None,
            cert: None,
            key: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub anonymize: bool,
    #[serde(default = "default_imsi_prefix")]
    pub imsi_prefix: String,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            frame_timeout_secs: default_frame_timeout(),
            write_timeout_secs: default_write_timeout(),
            anonymize: default_true(),
            imsi_prefix: default_imsi_prefix(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_traffic_path")]
    pub traffic_log_path: PathBuf,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            traffic_log_path: default_traffic_path(),
            max_bytes: default_max_bytes(),
            max_files: default_max_files(),
        }
    }
}

impl Config {
    /// Merge command-line overrides into the file configuration.
    pub fn apply(&mut self, cli: &Cli) -> anyhow::Result<()> {
        if let Some(ref upstream) = cli.upstream {
            let (host, port) = split_host_port(upstream)?;
            self.upstream.host = host;
            self.upstream.port = port;
        }
        if let Some(ref socks) = cli.socks {
            split_host_port(socks)?;
            self.upstream.socks = Some(socks.clone());
        }
        if cli.insecure {
            self.upstream.insecure = true;
        }
        if cli.no_upstream_tls {
            self.upstream.tls = false;
        }
        if let Some(port) = cli.tcp_port {
            self.listen.tcp_port = Some(port);
        }
        if let Some(port) = cli.tls_port {
            self.listen.tls_port = Some(port);
        }
        if let Some(ref cert) = cli.cert {
            self.listen.cert = Some(cert.clone());
        }
        if let Some(ref key) = cli.key {
            self.listen.key = Some(key.clone());
        }
        if let Some(ref dir) = cli.grammar_dir {
            self.grammar_dir = dir.clone();
        }
        Ok(())
    }

    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            host: self.upstream.host.clone(),
            port: self.upstream.port,
            socks: self.upstream.socks.clone(),
            tls: self.upstream.tls,
            insecure: self.upstream.insecure,
            connect_timeout: Duration::from_secs(self.upstream.connect_timeout_secs),
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            frames: FrameTimeouts {
                idle: Duration::from_secs(self.relay.idle_timeout_secs),
                continuation: Duration::from_secs(self.relay.frame_timeout_secs),
            },
            write_timeout: Duration::from_secs(self.relay.write_timeout_secs),
        }
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            max_bytes: self.logging.max_bytes,
            max_files: self.logging.max_files,
        }
    }

    /// Port and PEM files of the TLS listener, if it is fully configured.
    ///
    /// A TLS port without both a certificate and a key is reported and
    /// ignored.
    pub fn tls_listener(&self) -> Option<(u16, &Path, &Path)> {
        let port = self.listen.tls_port?;
        match (self.listen.cert.as_deref(), self.listen.key.as_deref()) {
            (Some(cert), Some(key)) => Some((port, cert, key)),
            _ => {
                warn!(port, "TLS port configured without both cert and key; TLS listener disabled");
                None
            }
        }
    }
}

/// Split `host:port`. IPv6 hosts may be bracketed (`[::1]:7275`).
pub fn split_host_port(addr: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected host:port, got '{addr}'"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        anyhow::bail!("missing host in '{addr}'");
    }
    let port: u16 = port
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid port in '{addr}': {e}"))?;
    Ok((host.to_string(), port))
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_upstream_host() -> String {
    "supl.google.com".to_string()
}

fn default_supl_port() -> u16 {
    7275
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_tcp_port() -> Option<u16> {
    Some(default_supl_port())
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_frame_timeout() -> u64 {
    2
}

fn default_write_timeout() -> u64 {
    10
}

fn default_imsi_prefix() -> String {
    "26201".to_string()
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_grammar_dir() -> PathBuf {
    PathBuf::from("asn1")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_traffic_path() -> PathBuf {
    PathBuf::from("supl-traffic.jsonl")
}

fn default_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_files() -> usize {
    5
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// If the file does not exist a default configuration is returned and a
/// warning is emitted, so the proxy can start against the public SUPL
/// server without any file written.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(config)
}
