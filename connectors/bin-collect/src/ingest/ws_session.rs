// connectors/bin-collect/src/ingest/ws_session.rs
//! Websocket connection management for one feed.
//!
//! Connects, sends the feed's subscription frames, and hands every text frame
//! to the ingestion handler. Reconnects with exponential backoff and full
//! jitter until cancelled; the handler is then drained.

use anyhow::Result;
use collector_core::{
    now_ms, ConnectionContext, ConsumerReport, ExchangeStatus, ExchangeStatusKind,
    IngestionHandler, Producer, ShutdownPolicy,
};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub stream: String,
    pub url: String,
    pub subscribe: Vec<Value>,
    pub ping_interval: Duration,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

pub fn backoff_ms_with_jitter(base_ms: u64, attempt: u32, cap_ms: u64) -> u64 {
    let mut rng = rand::thread_rng();
    let exp_pow = std::cmp::min(attempt, 63);
    let multiplier = 1u64.checked_shl(exp_pow).unwrap_or(u64::MAX);
    let exp = base_ms.saturating_mul(multiplier).min(cap_ms);
    rng.gen_range(0..=exp)
}

fn publish(
    status_tx: &watch::Sender<ExchangeStatus>,
    stream: &str,
    kind: ExchangeStatusKind,
    detail: Option<String>,
) {
    let _ = status_tx.send(ExchangeStatus {
        exchange: stream.to_string(),
        kind,
        detail,
        ts_ms: now_ms(),
    });
}

/// Runs until `ct` is cancelled, then drains the handler and returns its report.
pub async fn run_session<P: Producer>(
    cfg: SessionConfig,
    mut handler: IngestionHandler<P>,
    status_tx: watch::Sender<ExchangeStatus>,
    ct: CancellationToken,
) -> Result<ConsumerReport> {
    let stream = cfg.stream.as_str();
    let mut attempt: u32 = 0;
    let mut connection_id: u64 = 0;

    'session: loop {
        info!(exchange=%stream, "connecting: {}", cfg.url);
        publish(
            &status_tx,
            stream,
            ExchangeStatusKind::Reconnecting,
            Some(format!("connecting attempt {}", attempt + 1)),
        );

        let connected = tokio::select! {
            _ = ct.cancelled() => break 'session,
            res = tokio_tungstenite::connect_async(cfg.url.as_str()) => res,
        };

        match connected {
            Ok((ws_stream, _resp)) => {
                connection_id += 1;
                attempt = 0;
                info!(exchange=%stream, connection=connection_id, "connected");
                publish(&status_tx, stream, ExchangeStatusKind::Connected, None);

                let (mut write, mut read) = ws_stream.split();
                let ctx = ConnectionContext::new(stream, cfg.url.as_str(), connection_id);

                let mut subscribed = true;
                for frame in &cfg.subscribe {
                    if let Err(e) = write.send(Message::Text(frame.to_string())).await {
                        warn!(exchange=%stream, "subscribe failed: {:?}", e);
                        subscribed = false;
                        break;
                    }
                    debug!(exchange=%stream, "sent subscription: {}", frame);
                }

                let mut ping_interval = tokio::time::interval(cfg.ping_interval);
                while subscribed {
                    tokio::select! {
                        _ = ct.cancelled() => {
                            let _ = write.send(Message::Close(None)).await;
                            break 'session;
                        }
                        _ = ping_interval.tick() => {
                            if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                                warn!(exchange=%stream, "ping failed: {:?}", e);
                                break;
                            }
                        }
                        msg_opt = read.next() => {
                            let Some(msg) = msg_opt else {
                                warn!(exchange=%stream, "stream ended, reconnecting");
                                break;
                            };
                            match msg {
                                Ok(Message::Text(txt)) => handle_text(&mut handler, &ctx, &txt),
                                Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                                    Ok(txt) => handle_text(&mut handler, &ctx, txt),
                                    Err(_) => debug!(exchange=%stream, "ignoring binary frame of {} bytes", bytes.len()),
                                },
                                Ok(Message::Close(frame)) => {
                                    warn!(exchange=%stream, "close received ({:?}), reconnecting", frame);
                                    break;
                                }
                                Err(e) => {
                                    warn!(exchange=%stream, "recv error: {:?}", e);
                                    break;
                                }
                                _ => {}
                            }
                        }
                    }
                }

                publish(
                    &status_tx,
                    stream,
                    ExchangeStatusKind::Disconnected,
                    Some(format!("connection {connection_id} lost")),
                );
                tokio::select! {
                    _ = ct.cancelled() => break 'session,
                    _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                }
            }
            Err(e) => {
                warn!(exchange=%stream, "failed to connect: {:?}; will backoff", e);
                publish(
                    &status_tx,
                    stream,
                    ExchangeStatusKind::Reconnecting,
                    Some(format!("connect failed: {:?}", e)),
                );
                let backoff = backoff_ms_with_jitter(cfg.backoff_base_ms, attempt, cfg.backoff_cap_ms);
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = ct.cancelled() => break 'session,
                    _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
                }
            }
        }
    }

    publish(&status_tx, stream, ExchangeStatusKind::Disconnected, Some("shutdown".into()));
    info!(exchange=%stream, queued = handler.queue_len(), "session stopped, draining queue");
    let report = handler.shutdown(ShutdownPolicy::Drain).await?;
    Ok(report)
}

/// Decodes one frame and feeds it to the handler. Producer faults are logged
/// and the connection carries on.
fn handle_text<P: Producer>(handler: &mut IngestionHandler<P>, ctx: &ConnectionContext, txt: &str) {
    let ctx = ctx.received_at(now_ms());
    let msg = match serde_json::from_str::<Value>(txt) {
        Ok(v) => v,
        Err(_) => {
            debug!(exchange=%ctx.stream, "text not JSON: {}", txt);
            return;
        }
    };
    if let Err(e) = handler.on_message(&msg, &ctx) {
        warn!(exchange=%ctx.stream, connection=ctx.connection_id, "producer fault: {}; message: {}", e, txt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_under_cap() {
        for attempt in 0..100 {
            let ms = backoff_ms_with_jitter(250, attempt, 30_000);
            assert!(ms <= 30_000);
        }
    }

    #[test]
    fn first_backoff_is_bounded_by_base() {
        for _ in 0..100 {
            assert!(backoff_ms_with_jitter(250, 0, 30_000) <= 250);
        }
    }
}
