// core/src/lib.rs

pub mod aggregator;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod producer;
pub mod provision;
pub mod queue;
pub mod store;
pub mod types;

pub use aggregator::BoardAggregator;
pub use consumer::ConsumerReport;
pub use error::{CollectorError, ConfigError, ProduceError, StoreError};
pub use handler::{Enqueue, HandlerConfig, IngestionHandler, ShutdownPolicy};
pub use producer::{Exchange, Producer};
pub use provision::{CollectionSpec, IndexSpec, MongoProvisioner};
pub use queue::QueueConfig;
pub use store::{BatchSink, MongoCollection};
pub use types::*;
