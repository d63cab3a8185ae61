use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "supl-proxy",
    version,
    about = "Intercepting SUPL proxy that hides the subscriber identity from the location server"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "supl-proxy.yaml")]
    pub config: PathBuf,

    /// Location server as host:port (overrides config file setting)
    #[arg(short, long)]
    pub upstream: Option<String>,

    /// SOCKS5 gateway for upstream connections, as host:port
    #[arg(long)]
    pub socks: Option<String>,

    /// Plain TCP listener port (overrides config file setting)
    #[arg(long)]
    pub tcp_port: Option<u16>,

    /// TLS listener port; needs --cert and --key
    #[arg(long)]
    pub tls_port: Option<u16>,

    /// PEM certificate chain for the TLS listener
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// PEM private key for the TLS listener
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Directory holding the supl-/rrlp-/lpp-*.yaml grammar files
    #[arg(short, long)]
    pub grammar_dir: Option<PathBuf>,

    /// Do not verify the location server's certificate
    #[arg(long)]
    pub insecure: bool,

    /// Connect to the location server over plain TCP
    #[arg(long)]
    pub no_upstream_tls: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_arguments() {
        let cli = Cli::parse_from(["supl-proxy"]);
        assert_eq!(cli.config, PathBuf::from("supl-proxy.yaml"));
        assert!(cli.upstream.is_none());
        assert!(!cli.insecure);
        assert!(!cli.no_upstream_tls);
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "supl-proxy",
            "--upstream",
            "supl.example.net:7276",
            "--socks",
            "127.0.0.1:9050",
            "--tls-port",
            "7443",
            "--cert",
            "cert.pem",
            "--key",
            "key.pem",
            "--insecure",
            "--no-upstream-tls",
        ]);
        assert_eq!(cli.upstream.as_deref(), Some("supl.example.net:7276"));
        assert_eq!(cli.socks.as_deref(), Some("127.0.0.1:9050"));
        assert_eq!(cli.tls_port, Some(7443));
        assert_eq!(cli.key, Some(PathBuf::from("key.pem")));
        assert!(cli.insecure);
        assert!(cli.no_upstream_tls);
    }
}
