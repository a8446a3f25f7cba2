// connectors/bin-collect/src/main.rs
mod config;
mod feeds;
mod ingest;

use anyhow::{Context, Result};
use clap::Parser;
use collector_core::{
    now_ms, ExchangeStatus, ExchangeStatusKind, HandlerConfig, IngestionHandler, MongoProvisioner,
};
use config::CollectConfig;
use feeds::Feed;
use ingest::ws_session::{run_session, SessionConfig};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Collects one exchange feed into MongoDB.
#[derive(Parser, Debug)]
#[command(name = "collect", version)]
struct Cli {
    /// feed to collect
    #[arg(long, short, value_enum)]
    exchange: Feed,

    /// optional TOML config file
    #[arg(long, short, env = "COLLECT_CONFIG")]
    config: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let feed = cli.exchange;
    let cfg = CollectConfig::load(cli.config.as_deref())?;
    let preset = feed.preset();

    tracing::info!(feed = feed.name(), url = preset.url, "starting collector");

    // exchange status channel
    let (status_tx, mut status_rx) = watch::channel(ExchangeStatus {
        exchange: feed.name().to_string(),
        kind: ExchangeStatusKind::Disconnected,
        detail: None,
        ts_ms: now_ms(),
    });
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            tracing::debug!(
                exchange = %status.exchange,
                kind = ?status.kind,
                detail = ?status.detail,
                "status changed"
            );
        }
    });

    let handler_cfg = HandlerConfig::new(feed.name())
        .with_target(cfg.collection_spec(feed))
        .with_queue(cfg.queue())
        .with_periodic_log_every(cfg.pipeline.periodic_log_every);
    let handler = IngestionHandler::spawn_with(feed.producer(), handler_cfg, &MongoProvisioner::new())
        .with_context(|| format!("failed to start handler for {}", feed.name()))?;

    let session_cfg = SessionConfig {
        stream: feed.name().to_string(),
        url: preset.url.to_string(),
        subscribe: preset.subscribe,
        ping_interval: cfg.connection.ping_interval(),
        backoff_base_ms: cfg.connection.backoff_base_ms,
        backoff_cap_ms: cfg.connection.backoff_cap_ms,
    };

    let ct = CancellationToken::new();
    let session = tokio::spawn(run_session(session_cfg, handler, status_tx, ct.clone()));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("ctrl-c received, stopping");
    ct.cancel();

    let report = session.await.context("session task panicked")??;
    tracing::info!(
        persisted = report.persisted,
        failed = report.failed,
        records = report.records_written,
        discarded = report.discarded,
        "collector stopped"
    );
    Ok(())
}
