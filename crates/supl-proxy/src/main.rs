mod cli;
mod config;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cli::Cli;
use supl_relay::{Codecs, Proxy, ProxyConfig, TlsListen};
use traffic_log::{TrafficEntry, TrafficEventType, TrafficSink, TrafficSource};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;
    cfg.apply(&cli).context("invalid command-line override")?;

    // 3. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!(
        config_file = %cli.config.display(),
        upstream = %format!("{}:{}", cfg.upstream.host, cfg.upstream.port),
        upstream_tls = cfg.upstream.tls,
        socks = ?cfg.upstream.socks,
        grammar_dir = %cfg.grammar_dir.display(),
        "supl-proxy starting"
    );

    // 4. Start traffic logger.
    let (traffic, traffic_handle) =
        TrafficSink::start(&cfg.logging.traffic_log_path, cfg.rotation_policy())
            .await
            .context("failed to start traffic logger")?;

    traffic
        .log(TrafficEntry::new(
            TrafficEventType::ProcessStarted,
            TrafficSource::new("supl-proxy"),
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": cli.config.display().to_string(),
                "upstream": format!("{}:{}", cfg.upstream.host, cfg.upstream.port),
                "anonymize": cfg.relay.anonymize,
            }),
        ))
        .await;

    // 5. Compile grammars.
    let codecs = Codecs::load(&cfg.grammar_dir).with_context(|| {
        format!("failed to load grammars from {}", cfg.grammar_dir.display())
    })?;

    // 6. TLS listener credentials.
    let tls = match cfg.tls_listener() {
        Some((port, cert, key)) => {
            let acceptor = supl_relay::tls::acceptor(cert, key)
                .context("failed to load TLS listener credentials")?;
            Some(TlsListen { port, acceptor })
        }
        None => None,
    };

    if !cfg.relay.anonymize {
        warn!("anonymization disabled; subscriber identity is forwarded unchanged");
    }

    // 7. Bind listeners.
    let proxy_config = ProxyConfig {
        bind: cfg.listen.bind,
        tcp_port: cfg.listen.tcp_port,
        tls,
        upstream: cfg.upstream_config(),
        relay: cfg.relay_config(),
        anonymize: cfg.relay.anonymize,
        imsi_prefix: cfg.relay.imsi_prefix.clone(),
        shutdown_grace: Duration::from_secs(cfg.relay.shutdown_grace_secs),
        codecs,
        traffic: traffic.clone(),
    };
    let proxy = Proxy::bind(proxy_config)
        .await
        .context("failed to start listeners")?;

    // 8. Set up shutdown signal (ctrl_c + SIGTERM).
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    // 9. Serve until stopped.
    proxy.run(shutdown).await;

    // 10. Log shutdown and let the traffic writer drain.
    info!("supl-proxy shutting down");

    traffic
        .log(TrafficEntry::new(
            TrafficEventType::ProcessStopped,
            TrafficSource::new("supl-proxy"),
            serde_json::json!({}),
        ))
        .await;

    drop(traffic);
    if let Err(err) = traffic_handle.await {
        warn!(error = %err, "traffic writer task failed");
    }

    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {
                        info!("received SIGINT (ctrl-c)");
                    }
                    _ = sigterm.recv() => {
                        info!("received SIGTERM");
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
                info!("received SIGINT (ctrl-c)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT (ctrl-c)");
    }

    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use supl_codec::StructuredValue as V;
    use supl_relay::{rewrite, tbcd, Codecs, Imsi};

    fn shipped_grammar_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../asn1")
    }

    fn suplstart(imsi: &str) -> V {
        let flags = |names: &[(&'static str, bool)]| {
            V::sequence(names.iter().map(|(n, b)| (*n, V::boolean(*b))))
        };
        V::sequence([
            ("length", V::integer(0)),
            (
                "version",
                V::sequence([
                    ("maj", V::integer(1)),
                    ("min", V::integer(0)),
                    ("servind", V::integer(0)),
                ]),
            ),
            (
                "sessionID",
                V::sequence([(
                    "setSessionID",
                    V::sequence([
                        ("sessionId", V::integer(1)),
                        ("setId", V::choice("imsi", V::bytes(tbcd::encode(imsi).unwrap()))),
                    ]),
                )]),
            ),
            (
                "message",
                V::choice(
                    "msSUPLSTART",
                    V::sequence([
                        (
                            "sETCapabilities",
                            V::sequence([
                                (
                                    "posTechnology",
                                    flags(&[
                                        ("agpsSETassisted", true),
                                        ("agpsSETBased", true),
                                        ("autonomousGPS", true),
                                        ("aFLT", false),
                                        ("eCID", false),
                                        ("eOTD", false),
                                        ("oTDOA", false),
                                    ]),
                                ),
                                ("prefMethod", V::enumerated("noPreference")),
                                (
                                    "posProtocol",
                                    flags(&[("tia801", false), ("rrlp", true), ("rrc", false)]),
                                ),
                            ]),
                        ),
                        (
                            "locationId",
                            V::sequence([
                                (
                                    "cellInfo",
                                    V::choice(
                                        "gsmCell",
                                        V::sequence([
                                            ("refMCC", V::integer(262)),
                                            ("refMNC", V::integer(1)),
                                            ("refLAC", V::integer(1000)),
                                            ("refCI", V::integer(2000)),
                                        ]),
                                    ),
                                ),
                                ("status", V::enumerated("current")),
                            ]),
                        ),
                    ]),
                ),
            ),
        ])
    }

    #[test]
    fn shipped_grammars_carry_a_supl_start() {
        let codecs = Codecs::load(shipped_grammar_dir()).unwrap();
        let message = suplstart("262011234567890");

        let bytes = codecs.supl.encode("ULP-PDU", &message).unwrap();
        let decoded = codecs.supl.decode("ULP-PDU", &bytes).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(
            rewrite::identity(&decoded),
            Some(Imsi::parse("262011234567890").unwrap())
        );
    }

    /// A V2 SUPL POS carrying one LPP message in the PosPayLoad extension.
    fn suplpos_with_lpp(lpp: &[u8]) -> V {
        V::sequence([
            ("length", V::integer(15)),
            (
                "version",
                V::sequence([
                    ("maj", V::integer(2)),
                    ("min", V::integer(0)),
                    ("servind", V::integer(0)),
                ]),
            ),
            ("sessionID", V::Sequence(Vec::new())),
            (
                "message",
                V::choice(
                    "msSUPLPOS",
                    V::sequence([(
                        "posPayLoad",
                        V::choice(
                            "ver2-PosPayLoad-extension",
                            V::sequence([("lPPPayload", V::List(vec![V::bytes(lpp.to_vec())]))]),
                        ),
                    )]),
                ),
            ),
        ])
    }

    #[test]
    fn shipped_grammars_keep_lpp_payload_bytes() {
        let codecs = Codecs::load(shipped_grammar_dir()).unwrap();
        let lpp = [0x92, 0x2b, 0x08, 0x80];
        // Open type of 7 octets: extension bit, presence of lPPPayload and
        // tIA801Payload, item count, 16-bit length, then the LPP octets.
        let wire = [
            0x00, 0x0f, 0x02, 0x00, 0x00, 0x10, 0x80, 0x07, 0x40, 0x00, 0x1c, 0x91, 0x58, 0x44,
            0x00,
        ];

        let message = suplpos_with_lpp(&lpp);
        assert_eq!(codecs.supl.encode("ULP-PDU", &message).unwrap(), wire);

        let decoded = codecs.supl.decode("ULP-PDU", &wire).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(codecs.supl.encode("ULP-PDU", &decoded).unwrap(), wire);
    }

    #[test]
    fn shipped_set_logs_lpp_payload_as_hex() {
        let codecs = Codecs::load(shipped_grammar_dir()).unwrap();
        assert!(codecs.rrlp.is_none());
        assert!(codecs.lpp.is_none());

        let view = rewrite::annotate(&suplpos_with_lpp(&[0x92, 0x2b, 0x08, 0x80]), &codecs, None);
        assert_eq!(
            view["message"]["msSUPLPOS"]["posPayLoad"]["ver2-PosPayLoad-extension"]["lPPPayload"][0],
            "92 2b 08 80"
        );
    }
}
