// core/src/provision.rs
//! Resolves destination collections and requests their indexes.

use crate::error::ConfigError;
use crate::store::MongoCollection;
use mongodb::bson::{Bson, Document};
use mongodb::options::{ClientOptions, IndexOptions, ServerAddress};
use mongodb::{Client, IndexModel};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 27017;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_order() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IndexField {
    pub field: String,
    /// 1 ascending, -1 descending
    #[serde(default = "default_order")]
    pub order: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<IndexField>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default = "default_true")]
    pub background: bool,
}

impl IndexSpec {
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = (S, i32)>) -> Self {
        IndexSpec {
            fields: fields
                .into_iter()
                .map(|(field, order)| IndexField {
                    field: field.into(),
                    order,
                })
                .collect(),
            unique: false,
            background: true,
        }
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn keys(&self) -> Document {
        let mut keys = Document::new();
        for f in &self.fields {
            keys.insert(f.field.clone(), Bson::Int32(f.order));
        }
        keys
    }

    fn model(&self) -> IndexModel {
        let options = IndexOptions::builder()
            .unique(self.unique)
            .background(self.background)
            .build();
        IndexModel::builder()
            .keys(self.keys())
            .options(options)
            .build()
    }
}

/// Where a handler writes when no collection is injected.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CollectionSpec {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub collection: String,
    #[serde(default)]
    pub index: Option<IndexSpec>,
}

impl CollectionSpec {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        CollectionSpec {
            host: default_host(),
            port: DEFAULT_PORT,
            database: database.into(),
            collection: collection.into(),
            index: None,
        }
    }

    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.index = Some(index);
        self
    }

    pub fn destination(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyName("host"));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::EmptyName("database"));
        }
        if self.collection.trim().is_empty() {
            return Err(ConfigError::EmptyName("collection"));
        }
        if let Some(index) = &self.index {
            if index.fields.is_empty() {
                return Err(ConfigError::EmptyIndex);
            }
        }
        Ok(())
    }
}

/// Builds collection handles, reusing one client per server address.
///
/// Client construction does not touch the network; the first write does.
/// Must be used from within a tokio runtime.
#[derive(Clone, Debug, Default)]
pub struct MongoProvisioner {
    clients: Arc<Mutex<HashMap<(String, u16), Client>>>,
}

impl MongoProvisioner {
    pub fn new() -> Self {
        MongoProvisioner::default()
    }

    pub fn provision(&self, spec: &CollectionSpec) -> Result<MongoCollection, ConfigError> {
        spec.validate()?;
        let client = self.client(&spec.host, spec.port)?;
        let collection = client
            .database(&spec.database)
            .collection::<Document>(&spec.collection);

        if let Some(index) = &spec.index {
            // fire-and-forget; an identical existing index is a no-op on the server
            let model = index.model();
            let target = collection.clone();
            let destination = spec.destination();
            tokio::spawn(async move {
                match target.create_index(model, None).await {
                    Ok(created) => {
                        debug!(destination = %destination, index = %created.index_name, "index ready")
                    }
                    Err(e) => warn!(destination = %destination, error = ?e, "index creation failed"),
                }
            });
        }

        info!(
            host = %spec.host,
            port = spec.port,
            destination = %spec.destination(),
            indexed = spec.index.is_some(),
            "collection provisioned"
        );
        Ok(MongoCollection::new(collection))
    }

    /// Number of distinct server clients created so far.
    pub fn client_count(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn client(&self, host: &str, port: u16) -> Result<Client, ConfigError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (host.to_string(), port);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client_err = |source: mongodb::error::Error| ConfigError::Client {
            host: host.to_string(),
            port,
            source,
        };
        let mut options = ClientOptions::default();
        options.hosts = vec![ServerAddress::parse(format!("{host}:{port}")).map_err(client_err)?];
        let client = Client::with_options(options).map_err(client_err)?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}
