// core/src/aggregator.rs
//! Rate-limited order-book snapshots for bitFlyer board channels.
//!
//! The aggregator keeps a local book from `lightning_board_snapshot_*` and
//! `lightning_board_*` messages and emits the whole sorted book as one record,
//! at most once per `min_interval`.

use crate::error::ProduceError;
use crate::producer::Producer;
use crate::types::{Batch, ConnectionContext, RawMessage, Record};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);

const EXCHANGE: &str = "bitflyer";
const SNAPSHOT_PREFIX: &str = "lightning_board_snapshot_";
const DIFF_PREFIX: &str = "lightning_board_";

/// Price level key, totally ordered.
#[derive(Clone, Copy, Debug)]
struct Price(f64);

impl PartialEq for Price {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug)]
pub struct BoardAggregator {
    bids: BTreeMap<Price, f64>,
    asks: BTreeMap<Price, f64>,
    mid: Option<f64>,
    min_interval: Duration,
    last_emit: Option<Instant>,
}

impl Default for BoardAggregator {
    fn default() -> Self {
        BoardAggregator::new(DEFAULT_MIN_INTERVAL)
    }
}

impl BoardAggregator {
    pub fn new(min_interval: Duration) -> Self {
        BoardAggregator {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            mid: None,
            min_interval,
            last_emit: None,
        }
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    pub fn mid_price(&self) -> Option<f64> {
        self.mid
    }

    /// Applies a board message to the local book.
    ///
    /// Returns `false` for anything that is not a board message.
    pub fn apply(&mut self, raw: &RawMessage) -> Result<bool, ProduceError> {
        let Some(params) = raw.get("params") else {
            return Ok(false);
        };
        let Some(channel) = params.get("channel").and_then(Value::as_str) else {
            return Ok(false);
        };
        let snapshot = channel.starts_with(SNAPSHOT_PREFIX);
        if !snapshot && !channel.starts_with(DIFF_PREFIX) {
            return Ok(false);
        }
        let Some(message) = params.get("message").and_then(Value::as_object) else {
            return Err(ProduceError::shape(EXCHANGE, "board message is not an object"));
        };

        if snapshot {
            self.bids.clear();
            self.asks.clear();
        }
        if let Some(mid) = message.get("mid_price").and_then(Value::as_f64) {
            self.mid = Some(mid);
        }
        apply_levels(&mut self.bids, message.get("bids"))?;
        apply_levels(&mut self.asks, message.get("asks"))?;
        Ok(true)
    }

    /// Applies `raw` and, if the emission window has elapsed and the bid side
    /// is populated, returns the current book.
    pub fn ingest_at(
        &mut self,
        raw: &RawMessage,
        ctx: &ConnectionContext,
        now: Instant,
    ) -> Result<Option<Batch>, ProduceError> {
        if !self.apply(raw)? {
            return Ok(None);
        }
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) <= self.min_interval {
                return Ok(None);
            }
        }
        if self.bids.is_empty() {
            return Ok(None);
        }
        self.last_emit = Some(now);
        Ok(Some(Batch::single(self.snapshot_record(ctx))))
    }

    fn snapshot_record(&self, ctx: &ConnectionContext) -> Record {
        let level = |(p, s): (&Price, &f64)| json!({"price": p.0, "size": *s});
        let mut r = Map::new();
        r.insert(
            "SELL".into(),
            Value::Array(self.asks.iter().map(level).collect()),
        );
        r.insert(
            "BUY".into(),
            Value::Array(self.bids.iter().rev().map(level).collect()),
        );
        r.insert("timestamp".into(), Value::String(ctx.recv_time_rfc3339()));
        r.insert("mid".into(), self.mid.map(Value::from).unwrap_or(Value::Null));
        r
    }
}

impl Producer for BoardAggregator {
    fn produce(
        &mut self,
        raw: &RawMessage,
        ctx: &ConnectionContext,
    ) -> Result<Option<Batch>, ProduceError> {
        self.ingest_at(raw, ctx, Instant::now())
    }
}

fn apply_levels(side: &mut BTreeMap<Price, f64>, levels: Option<&Value>) -> Result<(), ProduceError> {
    let Some(levels) = levels else {
        return Ok(());
    };
    let Some(levels) = levels.as_array() else {
        return Err(ProduceError::shape(EXCHANGE, "board side is not an array"));
    };
    for level in levels {
        let price = level.get("price").and_then(Value::as_f64);
        let size = level.get("size").and_then(Value::as_f64);
        let (Some(price), Some(size)) = (price, size) else {
            return Err(ProduceError::shape(EXCHANGE, format!("bad board level: {level}")));
        };
        // size 0 deletes the level
        if size == 0.0 {
            side.remove(&Price(price));
        } else {
            side.insert(Price(price), size);
        }
    }
    Ok(())
}
