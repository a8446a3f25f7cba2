// connectors/bin-collect/src/config.rs
//! Optional TOML configuration. Every section and key has a default.
//!
//! ```toml
//! [mongo]
//! host = "localhost"
//! port = 27017
//!
//! [pipeline]
//! queue_capacity = 65536
//! periodic_log_every = 10000
//!
//! [connection]
//! ping_interval_secs = 15
//! backoff_base_ms = 250
//! backoff_cap_ms = 30000
//!
//! [destination]
//! database = "binance"
//! collection = "trades"
//! index = { fields = [{ field = "a" }], unique = true }
//! ```

use crate::feeds::Feed;
use anyhow::{Context, Result};
use collector_core::queue::DEFAULT_QUEUE_CAPACITY;
use collector_core::{CollectionSpec, IndexSpec, QueueConfig};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    pub mongo: MongoConfig,
    pub pipeline: PipelineConfig,
    pub connection: ConnectionConfig,
    pub destination: DestinationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub host: String,
    pub port: u16,
}

impl Default for MongoConfig {
    fn default() -> Self {
        MongoConfig {
            host: collector_core::provision::DEFAULT_HOST.to_string(),
            port: collector_core::provision::DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    /// how many batches between consumer progress logs (0 = none)
    pub periodic_log_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            periodic_log_every: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub ping_interval_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            ping_interval_secs: 15,
            backoff_base_ms: 250,
            backoff_cap_ms: 30_000,
        }
    }
}

impl ConnectionConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

/// Overrides for the feed's default database/collection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub database: Option<String>,
    pub collection: Option<String>,
    pub index: Option<IndexSpec>,
}

impl CollectConfig {
    /// Reads `path` if given, otherwise returns defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(CollectConfig::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {path}"))?;
        Self::parse(&content).with_context(|| format!("bad config {path}"))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn collection_spec(&self, feed: Feed) -> CollectionSpec {
        let preset = feed.preset();
        let database = self
            .destination
            .database
            .clone()
            .unwrap_or_else(|| preset.database.to_string());
        let collection = self
            .destination
            .collection
            .clone()
            .unwrap_or_else(|| preset.collection.to_string());
        let spec = CollectionSpec::new(database, collection)
            .with_server(self.mongo.host.clone(), self.mongo.port);
        match &self.destination.index {
            Some(index) => spec.with_index(index.clone()),
            None => spec,
        }
    }

    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.pipeline.queue_capacity,
        }
    }
}
