// core/src/error.rs

use thiserror::Error;

/// Faults detected while building a handler, before any message is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no destination: inject a collection or provide database and collection names")]
    MissingDestination,

    #[error("both an injected collection and a provisioning target were supplied")]
    ConflictingDestination,

    #[error("{0} name must not be empty")]
    EmptyName(&'static str),

    #[error("index spec must name at least one field")]
    EmptyIndex,

    #[error("queue capacity must be at least 1")]
    ZeroCapacity,

    #[error("failed to build mongodb client for {host}:{port}")]
    Client {
        host: String,
        port: u16,
        #[source]
        source: mongodb::error::Error,
    },
}

/// A recognized message whose payload does not have the expected structure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProduceError {
    #[error("{exchange}: unexpected message shape: {detail}")]
    UnexpectedShape {
        exchange: &'static str,
        detail: String,
    },
}

impl ProduceError {
    pub(crate) fn shape(exchange: &'static str, detail: impl Into<String>) -> Self {
        ProduceError::UnexpectedShape {
            exchange,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to encode record as bson")]
    Encode(#[from] mongodb::bson::ser::Error),

    #[error("insert_many into {destination} failed")]
    Insert {
        destination: String,
        #[source]
        source: mongodb::error::Error,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Raised while stopping a handler.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("consumer task did not complete")]
    Consumer(#[from] tokio::task::JoinError),
}
