// core/src/store.rs

use crate::error::StoreError;
use crate::types::Batch;
use async_trait::async_trait;
use mongodb::bson::{self, Document};
use mongodb::Collection;

/// Destination for batches. Implementations must be safe to share across handlers.
#[async_trait]
pub trait BatchSink: Send + Sync + 'static {
    /// Human readable location, e.g. `binance.trades`.
    fn destination(&self) -> String;

    /// Writes the whole batch in one call.
    async fn insert_many(&self, batch: &Batch) -> Result<(), StoreError>;
}

/// A MongoDB collection used as a [`BatchSink`].
#[derive(Clone, Debug)]
pub struct MongoCollection {
    inner: Collection<Document>,
}

impl MongoCollection {
    pub fn new(inner: Collection<Document>) -> Self {
        MongoCollection { inner }
    }
}

#[async_trait]
impl BatchSink for MongoCollection {
    fn destination(&self) -> String {
        self.inner.namespace().to_string()
    }

    async fn insert_many(&self, batch: &Batch) -> Result<(), StoreError> {
        let docs = batch
            .records()
            .iter()
            .map(bson::to_document)
            .collect::<Result<Vec<Document>, _>>()?;
        self.inner
            .insert_many(docs, None)
            .await
            .map_err(|source| StoreError::Insert {
                destination: self.destination(),
                source,
            })?;
        Ok(())
    }
}
