// core/src/types.rs

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Inbound exchange payload, exactly as decoded from the socket.
pub type RawMessage = Value;

/// One normalized document. No common schema is enforced across exchanges.
pub type Record = Map<String, Value>;

/// Non-empty, ordered records derived from a single inbound message.
///
/// A batch is written with one `insert_many` call and is never split.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Batch(Vec<Record>);

#[allow(clippy::len_without_is_empty)]
impl Batch {
    /// Returns `None` for an empty vector, so empty batches cannot be queued.
    pub fn new(records: Vec<Record>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Batch(records))
        }
    }

    pub fn single(record: Record) -> Self {
        Batch(vec![record])
    }

    pub fn records(&self) -> &[Record] {
        &self.0
    }

    pub fn into_records(self) -> Vec<Record> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

/// Per-connection information handed to producers with every message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionContext {
    /// logical stream name, e.g. "binance"
    pub stream: String,
    pub url: String,
    /// incremented on every reconnect of the same stream
    pub connection_id: u64,
    /// local receive time in epoch milliseconds
    pub recv_ts_ms: i64,
}

impl ConnectionContext {
    pub fn new(stream: impl Into<String>, url: impl Into<String>, connection_id: u64) -> Self {
        ConnectionContext {
            stream: stream.into(),
            url: url.into(),
            connection_id,
            recv_ts_ms: now_ms(),
        }
    }

    /// Same connection, stamped for a newly received message.
    pub fn received_at(&self, recv_ts_ms: i64) -> Self {
        ConnectionContext {
            recv_ts_ms,
            ..self.clone()
        }
    }

    /// Receive time as an RFC 3339 UTC string.
    pub fn recv_time_rfc3339(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.recv_ts_ms)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeStatusKind {
    Connected,
    Reconnecting,
    Disconnected,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangeStatus {
    pub exchange: String,
    pub kind: ExchangeStatusKind,
    pub detail: Option<String>,
    pub ts_ms: i64,
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
