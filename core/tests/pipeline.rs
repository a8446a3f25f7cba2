// core/tests/pipeline.rs

use async_trait::async_trait;
use collector_core::{
    Batch, BatchSink, ConfigError, ConnectionContext, Enqueue, Exchange, HandlerConfig,
    IngestionHandler, ProduceError, QueueConfig, RawMessage, ShutdownPolicy, StoreError,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Records every attempt; fails the attempts scripted in `failures`.
#[derive(Default)]
struct ScriptedSink {
    attempts: Mutex<Vec<Batch>>,
    written: Mutex<Vec<Batch>>,
    failures: Mutex<VecDeque<bool>>,
    gate: Option<Semaphore>,
}

impl ScriptedSink {
    fn failing(script: impl IntoIterator<Item = bool>) -> Self {
        ScriptedSink {
            failures: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Every write waits for a permit.
    fn gated() -> Self {
        ScriptedSink {
            gate: Some(Semaphore::new(0)),
            ..Default::default()
        }
    }

    fn open_gate(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    fn attempts(&self) -> Vec<Batch> {
        self.attempts.lock().unwrap().clone()
    }

    fn written(&self) -> Vec<Batch> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchSink for ScriptedSink {
    fn destination(&self) -> String {
        "test.trades".to_string()
    }

    async fn insert_many(&self, batch: &Batch) -> Result<(), StoreError> {
        self.attempts.lock().unwrap().push(batch.clone());
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        let fail = self.failures.lock().unwrap().pop_front().unwrap_or(false);
        if fail {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.written.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

/// Captures everything logged on this thread at DEBUG and above.
fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}

fn ctx() -> ConnectionContext {
    ConnectionContext::new("binance", "wss://fstream.binance.com/ws", 0)
}

fn agg_trade(id: u64) -> Value {
    json!({"e": "aggTrade", "a": id, "p": "100", "q": "1"})
}

fn batch_of(v: &Value) -> Batch {
    Batch::single(v.as_object().cloned().unwrap())
}

fn handler_with(
    sink: Arc<ScriptedSink>,
    queue: QueueConfig,
) -> IngestionHandler<Exchange> {
    let config = HandlerConfig::new("binance")
        .with_collection(sink)
        .with_queue(queue);
    IngestionHandler::spawn(Exchange::Binance, config).expect("handler")
}

async fn wait_for_attempts(sink: &ScriptedSink, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.attempts().len() < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("consumer made no progress");
}

#[tokio::test]
async fn agg_trade_is_inserted_once() {
    let sink = Arc::new(ScriptedSink::default());
    let mut handler = handler_with(sink.clone(), QueueConfig::default());

    let msg = json!({"e": "aggTrade", "p": "100", "q": "1"});
    assert_eq!(
        handler.on_message(&msg, &ctx()).unwrap(),
        Enqueue::Queued { records: 1 }
    );

    let report = handler.shutdown(ShutdownPolicy::Drain).await.unwrap();
    assert_eq!(report.persisted, 1);
    assert_eq!(report.records_written, 1);
    assert_eq!(sink.attempts(), vec![batch_of(&msg)]);
}

#[tokio::test]
async fn heartbeat_is_never_inserted() {
    let (capture, _guard) = capture_logs();
    let sink = Arc::new(ScriptedSink::default());
    let mut handler = handler_with(sink.clone(), QueueConfig::default());

    let before = capture.contents();
    for msg in [json!({"ping": 1_650_000_000_000u64}), json!({"result": null, "id": 1})] {
        assert_eq!(handler.on_message(&msg, &ctx()).unwrap(), Enqueue::Ignored);
        assert_eq!(handler.queue_len(), 0);
    }
    assert_eq!(capture.contents(), before, "ignored messages must not be logged");

    let report = handler.shutdown(ShutdownPolicy::Drain).await.unwrap();
    assert_eq!(report.persisted + report.failed, 0);
    assert!(sink.attempts().is_empty());
}

#[tokio::test]
async fn failed_write_is_logged_and_later_batches_still_land() {
    let (capture, _guard) = capture_logs();

    let sink = Arc::new(ScriptedSink::failing([true, false]));
    let mut handler = handler_with(sink.clone(), QueueConfig::default());

    let first = agg_trade(1);
    let second = agg_trade(2);
    handler.on_message(&first, &ctx()).unwrap();
    handler.on_message(&second, &ctx()).unwrap();

    wait_for_attempts(&sink, 2).await;
    assert!(handler.is_running());
    assert_eq!(sink.attempts(), vec![batch_of(&first), batch_of(&second)]);
    assert_eq!(sink.written(), vec![batch_of(&second)]);

    let third = agg_trade(3);
    handler.on_message(&third, &ctx()).unwrap();
    let report = handler.shutdown(ShutdownPolicy::Drain).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.persisted, 2);

    let logs = capture.contents();
    let failures: Vec<&str> = logs
        .lines()
        .filter(|l| l.contains("failed to insert"))
        .collect();
    assert_eq!(failures.len(), 1, "logs:\n{logs}");
    assert!(failures[0].contains("ERROR"));
    assert!(failures[0].contains(r#""a":1"#));
    assert!(failures[0].contains("connection refused"));

    for id in 1..=3 {
        let needle = format!(r#""a":{id}"#);
        let enqueued: Vec<&str> = logs
            .lines()
            .filter(|l| l.contains("DEBUG") && l.contains(&needle))
            .collect();
        assert_eq!(enqueued.len(), 1, "batch {id} not logged once at debug:\n{logs}");
    }
}

#[tokio::test]
async fn batches_are_persisted_in_arrival_order() {
    let sink = Arc::new(ScriptedSink::default());
    let mut handler = handler_with(sink.clone(), QueueConfig::default());

    let msgs: Vec<Value> = (0..50).map(agg_trade).collect();
    for msg in &msgs {
        handler.on_message(msg, &ctx()).unwrap();
    }
    handler.shutdown(ShutdownPolicy::Drain).await.unwrap();

    let expected: Vec<Batch> = msgs.iter().map(batch_of).collect();
    assert_eq!(sink.attempts(), expected);
}

#[tokio::test]
async fn alternating_failures_do_not_block_successes() {
    let sink = Arc::new(ScriptedSink::failing((0..10).map(|i| i % 2 == 1)));
    let mut handler = handler_with(sink.clone(), QueueConfig::default());

    for i in 0..10 {
        handler.on_message(&agg_trade(i), &ctx()).unwrap();
    }
    let report = handler.shutdown(ShutdownPolicy::Drain).await.unwrap();

    assert_eq!(report.persisted, 5);
    assert_eq!(report.failed, 5);
    let written: Vec<Batch> = (0..10).step_by(2).map(|i| batch_of(&agg_trade(i))).collect();
    assert_eq!(sink.written(), written);
}

#[tokio::test]
async fn queued_batch_equals_producer_output() {
    let sink = Arc::new(ScriptedSink::default());
    let expected = Batch::new(vec![
        json!({"price": 1.5, "nested": {"k": [1, 2]}}).as_object().cloned().unwrap(),
        json!({"price": 2.5}).as_object().cloned().unwrap(),
    ])
    .unwrap();
    let output = expected.clone();
    let producer = move |_raw: &RawMessage, _ctx: &ConnectionContext| {
        Ok::<_, ProduceError>(Some(output.clone()))
    };

    let config = HandlerConfig::new("custom").with_collection(sink.clone());
    let mut handler = IngestionHandler::spawn(producer, config).unwrap();
    assert_eq!(
        handler.on_message(&json!({}), &ctx()).unwrap(),
        Enqueue::Queued { records: 2 }
    );
    handler.shutdown(ShutdownPolicy::Drain).await.unwrap();
    assert_eq!(sink.attempts(), vec![expected]);
}

#[tokio::test]
async fn producer_faults_surface_to_the_caller() {
    let sink = Arc::new(ScriptedSink::default());
    let config = HandlerConfig::new("bitget").with_collection(sink.clone());
    let mut handler = IngestionHandler::spawn(Exchange::Bitget, config).unwrap();

    let bad = json!({"action": "update", "data": [["1", "not-a-price", "1", "buy"]]});
    let err = handler.on_message(&bad, &ctx()).unwrap_err();
    assert!(matches!(err, ProduceError::UnexpectedShape { exchange: "bitget", .. }));
    assert_eq!(handler.queue_len(), 0);

    let good = json!({"action": "update", "data": [["1", "10", "1", "buy"]]});
    assert_eq!(
        handler.on_message(&good, &ctx()).unwrap(),
        Enqueue::Queued { records: 1 }
    );
    let report = handler.shutdown(ShutdownPolicy::Drain).await.unwrap();
    assert_eq!(report.persisted, 1);
}

#[tokio::test]
async fn full_queue_drops_the_newest_batch() {
    let sink = Arc::new(ScriptedSink::gated());
    let mut handler = handler_with(sink.clone(), QueueConfig { capacity: 2 });

    handler.on_message(&agg_trade(1), &ctx()).unwrap();
    // consumer holds batch 1 inside the write
    wait_for_attempts(&sink, 1).await;

    assert!(matches!(handler.on_message(&agg_trade(2), &ctx()).unwrap(), Enqueue::Queued { .. }));
    assert!(matches!(handler.on_message(&agg_trade(3), &ctx()).unwrap(), Enqueue::Queued { .. }));
    assert_eq!(handler.queue_len(), 2);
    assert_eq!(handler.on_message(&agg_trade(4), &ctx()).unwrap(), Enqueue::Dropped);
    assert_eq!(handler.dropped(), 1);

    sink.open_gate(10);
    let report = handler.shutdown(ShutdownPolicy::Drain).await.unwrap();
    assert_eq!(report.persisted, 3);
    let written: Vec<Batch> = (1..=3).map(|i| batch_of(&agg_trade(i))).collect();
    assert_eq!(sink.written(), written);
}

#[tokio::test]
async fn discard_shutdown_finishes_in_flight_write_only() {
    let sink = Arc::new(ScriptedSink::gated());
    let mut handler = handler_with(sink.clone(), QueueConfig::default());

    for i in 1..=3 {
        handler.on_message(&agg_trade(i), &ctx()).unwrap();
    }
    wait_for_attempts(&sink, 1).await;

    let shutdown = tokio::spawn(handler.shutdown(ShutdownPolicy::Discard));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    sink.open_gate(10);

    let report = shutdown.await.unwrap().unwrap();
    assert_eq!(report.persisted, 1);
    assert_eq!(report.discarded, 2);
    assert_eq!(sink.written(), vec![batch_of(&agg_trade(1))]);
}

#[tokio::test]
async fn cancelling_the_parent_token_stops_the_consumer() {
    let sink = Arc::new(ScriptedSink::default());
    let parent = CancellationToken::new();
    let config = HandlerConfig::new("binance")
        .with_collection(sink.clone())
        .with_parent_token(parent.clone());
    let handler = IngestionHandler::spawn(Exchange::Binance, config).unwrap();
    assert!(handler.is_running());

    parent.cancel();
    tokio::time::timeout(Duration::from_secs(5), async {
        while handler.is_running() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("consumer kept running");

    let report = handler.shutdown(ShutdownPolicy::Drain).await.unwrap();
    assert_eq!(report.persisted, 0);
}

#[tokio::test]
async fn dropped_handler_drains_in_background() {
    let sink = Arc::new(ScriptedSink::default());
    let mut handler = handler_with(sink.clone(), QueueConfig::default());
    handler.on_message(&agg_trade(1), &ctx()).unwrap();
    handler.on_message(&agg_trade(2), &ctx()).unwrap();
    drop(handler);

    wait_for_attempts(&sink, 2).await;
    assert_eq!(sink.written().len(), 2);
}

#[tokio::test]
async fn one_sink_can_serve_several_handlers() {
    let sink = Arc::new(ScriptedSink::default());
    let mut a = handler_with(sink.clone(), QueueConfig::default());
    let mut b = IngestionHandler::spawn(
        Exchange::Gmo,
        HandlerConfig::new("gmo").with_collection(sink.clone()),
    )
    .unwrap();

    a.on_message(&agg_trade(1), &ctx()).unwrap();
    b.on_message(&json!({"channel": "trades", "price": "1"}), &ctx()).unwrap();
    a.shutdown(ShutdownPolicy::Drain).await.unwrap();
    b.shutdown(ShutdownPolicy::Drain).await.unwrap();

    assert_eq!(sink.written().len(), 2);
}

#[tokio::test]
async fn destination_must_be_supplied_exactly_once() {
    let missing = IngestionHandler::spawn(Exchange::Okx, HandlerConfig::new("okx"));
    assert!(matches!(missing, Err(ConfigError::MissingDestination)));

    let both = HandlerConfig::new("okx")
        .with_collection(Arc::new(ScriptedSink::default()))
        .with_target(collector_core::CollectionSpec::new("okx", "trades"));
    assert!(matches!(
        IngestionHandler::spawn(Exchange::Okx, both),
        Err(ConfigError::ConflictingDestination)
    ));

    let unnamed = HandlerConfig::new("okx").with_target(collector_core::CollectionSpec::new("okx", ""));
    assert!(matches!(
        IngestionHandler::spawn(Exchange::Okx, unnamed),
        Err(ConfigError::EmptyName("collection"))
    ));

    let zero = HandlerConfig::new("okx")
        .with_collection(Arc::new(ScriptedSink::default()))
        .with_queue(QueueConfig { capacity: 0 });
    assert!(matches!(
        IngestionHandler::spawn(Exchange::Okx, zero),
        Err(ConfigError::ZeroCapacity)
    ));
}
