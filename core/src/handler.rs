// core/src/handler.rs
//! Ingestion handler: one per logical stream.
//!
//! ```text
//! socket ──on_message──▶ Producer ──Batch──▶ BatchQueue ──▶ consumer task ──insert_many──▶ store
//! ```
//!
//! The message path is synchronous and never waits on persistence. The
//! consumer is spawned at construction and lives until [`IngestionHandler::shutdown`]
//! or until the handler is dropped (which drains the queue in the background).

use crate::consumer::{run_consumer, ConsumerReport};
use crate::error::{CollectorError, ConfigError, ProduceError};
use crate::producer::Producer;
use crate::provision::{CollectionSpec, MongoProvisioner};
use crate::queue::{BatchQueue, Offer, QueueConfig};
use crate::store::BatchSink;
use crate::types::{ConnectionContext, RawMessage};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Construction parameters. Exactly one of `collection` or `target` must be set.
#[derive(Clone)]
pub struct HandlerConfig {
    pub stream: String,
    /// pre-built sink, possibly shared with other handlers
    pub collection: Option<Arc<dyn BatchSink>>,
    /// provisioned on construction when no sink is injected
    pub target: Option<CollectionSpec>,
    pub queue: QueueConfig,
    /// 0 disables periodic consumer progress logs
    pub periodic_log_every: u64,
    /// cancelling this token stops the consumer and discards what is queued
    pub parent_token: Option<CancellationToken>,
}

impl HandlerConfig {
    pub fn new(stream: impl Into<String>) -> Self {
        HandlerConfig {
            stream: stream.into(),
            collection: None,
            target: None,
            queue: QueueConfig::default(),
            periodic_log_every: 10_000,
            parent_token: None,
        }
    }

    pub fn with_collection(mut self, sink: Arc<dyn BatchSink>) -> Self {
        self.collection = Some(sink);
        self
    }

    pub fn with_target(mut self, spec: CollectionSpec) -> Self {
        self.target = Some(spec);
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_periodic_log_every(mut self, every: u64) -> Self {
        self.periodic_log_every = every;
        self
    }

    pub fn with_parent_token(mut self, token: CancellationToken) -> Self {
        self.parent_token = Some(token);
        self
    }
}

/// What `on_message` did with a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueue {
    /// producer found nothing to store
    Ignored,
    Queued { records: usize },
    /// queue was full or the consumer is gone
    Dropped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// persist everything already queued, then stop
    Drain,
    /// stop after the in-flight write; queued batches are discarded
    Discard,
}

pub struct IngestionHandler<P> {
    stream: String,
    producer: P,
    queue: BatchQueue,
    sink: Arc<dyn BatchSink>,
    ct: CancellationToken,
    consumer: JoinHandle<ConsumerReport>,
    dropped: u64,
}

impl<P: Producer> IngestionHandler<P> {
    /// Builds the handler and spawns its consumer. Requires a tokio runtime.
    pub fn spawn(producer: P, config: HandlerConfig) -> Result<Self, ConfigError> {
        Self::spawn_with(producer, config, &MongoProvisioner::new())
    }

    /// Like [`IngestionHandler::spawn`], provisioning through a shared provisioner.
    pub fn spawn_with(
        producer: P,
        config: HandlerConfig,
        provisioner: &MongoProvisioner,
    ) -> Result<Self, ConfigError> {
        let HandlerConfig {
            stream,
            collection,
            target,
            queue,
            periodic_log_every,
            parent_token,
        } = config;

        let (queue, rx) = BatchQueue::new(queue)?;
        let sink: Arc<dyn BatchSink> = match (collection, target) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingDestination),
            (None, None) => return Err(ConfigError::MissingDestination),
            (Some(sink), None) => sink,
            (None, Some(spec)) => Arc::new(provisioner.provision(&spec)?),
        };

        let ct = match parent_token {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let consumer = tokio::spawn(run_consumer(
            stream.clone(),
            rx,
            sink.clone(),
            ct.clone(),
            periodic_log_every,
        ));

        info!(
            stream = %stream,
            destination = %sink.destination(),
            capacity = queue.capacity(),
            "ingestion handler running"
        );

        Ok(IngestionHandler {
            stream,
            producer,
            queue,
            sink,
            ct,
            consumer,
            dropped: 0,
        })
    }

    /// Entry point for every inbound message. Never waits on persistence.
    ///
    /// Producer faults are returned to the caller untouched.
    pub fn on_message(
        &mut self,
        raw: &RawMessage,
        ctx: &ConnectionContext,
    ) -> Result<Enqueue, ProduceError> {
        let Some(batch) = self.producer.produce(raw, ctx)? else {
            return Ok(Enqueue::Ignored);
        };
        let records = batch.len();
        debug!(stream = %self.stream, records, "{}", batch);

        match self.queue.offer(batch) {
            Offer::Queued => Ok(Enqueue::Queued { records }),
            Offer::Full(batch) => {
                self.dropped += 1;
                warn!(
                    stream = %self.stream,
                    capacity = self.queue.capacity(),
                    dropped = self.dropped,
                    "queue full, dropping batch: {}",
                    batch
                );
                Ok(Enqueue::Dropped)
            }
            Offer::Closed(batch) => {
                self.dropped += 1;
                error!(stream = %self.stream, "consumer stopped, dropping batch: {}", batch);
                Ok(Enqueue::Dropped)
            }
        }
    }
}

impl<P> IngestionHandler<P> {
    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn sink(&self) -> &Arc<dyn BatchSink> {
        &self.sink
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Batches dropped on the message path because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_running(&self) -> bool {
        !self.consumer.is_finished()
    }

    /// Stops intake and waits for the consumer to exit.
    pub async fn shutdown(self, policy: ShutdownPolicy) -> Result<ConsumerReport, CollectorError> {
        let IngestionHandler {
            stream,
            queue,
            ct,
            consumer,
            ..
        } = self;

        info!(stream = %stream, ?policy, queued = queue.len(), "shutting down handler");
        if policy == ShutdownPolicy::Discard {
            ct.cancel();
        }
        // closing the sender lets the consumer finish once the queue is empty
        drop(queue);
        Ok(consumer.await?)
    }
}
