// core/src/queue.rs

use crate::error::ConfigError;
use crate::types::Batch;
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};

pub const DEFAULT_QUEUE_CAPACITY: usize = 65_536;

/// Bounded FIFO between the message path and the consumer.
///
/// When full the arriving batch is dropped (drop-newest); the message path
/// never waits on the consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Outcome of offering a batch to the queue.
#[derive(Debug, PartialEq)]
pub enum Offer {
    Queued,
    Full(Batch),
    Closed(Batch),
}

/// Producer side of the batch queue. Exactly one exists per handler.
#[derive(Debug)]
pub struct BatchQueue {
    tx: mpsc::Sender<Batch>,
}

impl BatchQueue {
    pub fn new(cfg: QueueConfig) -> Result<(Self, mpsc::Receiver<Batch>), ConfigError> {
        if cfg.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let (tx, rx) = mpsc::channel(cfg.capacity);
        Ok((BatchQueue { tx }, rx))
    }

    pub fn offer(&self, batch: Batch) -> Offer {
        match self.tx.try_send(batch) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(b)) => Offer::Full(b),
            Err(TrySendError::Closed(b)) => Offer::Closed(b),
        }
    }

    /// Batches waiting for the consumer.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}
