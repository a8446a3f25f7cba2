// core/src/producer.rs
//! Producer contract and the per-exchange trade normalizers.
//!
//! Every normalizer inspects one decoded message and returns:
//! - `Ok(None)` when the message is irrelevant (acks, heartbeats, other channels),
//! - `Ok(Some(batch))` with the records to persist,
//! - `Err(ProduceError)` when a recognized message has an unexpected structure.

use crate::error::ProduceError;
use crate::types::{Batch, ConnectionContext, RawMessage, Record};
use serde_json::{json, Map, Number, Value};
use std::fmt;

/// Maps one raw inbound message to zero or one batch of records.
///
/// Must not block. Takes `&mut self` so stateful producers such as
/// [`crate::aggregator::BoardAggregator`] fit the same seam.
pub trait Producer: Send + 'static {
    fn produce(
        &mut self,
        raw: &RawMessage,
        ctx: &ConnectionContext,
    ) -> Result<Option<Batch>, ProduceError>;
}

impl<F> Producer for F
where
    F: FnMut(&RawMessage, &ConnectionContext) -> Result<Option<Batch>, ProduceError>
        + Send
        + 'static,
{
    fn produce(
        &mut self,
        raw: &RawMessage,
        ctx: &ConnectionContext,
    ) -> Result<Option<Batch>, ProduceError> {
        self(raw, ctx)
    }
}

impl Producer for Box<dyn Producer> {
    fn produce(
        &mut self,
        raw: &RawMessage,
        ctx: &ConnectionContext,
    ) -> Result<Option<Batch>, ProduceError> {
        (**self).produce(raw, ctx)
    }
}

/// Supported trade feeds. New exchanges are added here and in [`Exchange::normalize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Exchange {
    Bybit,
    Binance,
    Ftx,
    Gmo,
    Phemex,
    Bitget,
    Okx,
    Bitflyer,
    Coincheck,
}

impl Exchange {
    pub const ALL: [Exchange; 9] = [
        Exchange::Bybit,
        Exchange::Binance,
        Exchange::Ftx,
        Exchange::Gmo,
        Exchange::Phemex,
        Exchange::Bitget,
        Exchange::Okx,
        Exchange::Bitflyer,
        Exchange::Coincheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Bybit => "bybit",
            Exchange::Binance => "binance",
            Exchange::Ftx => "ftx",
            Exchange::Gmo => "gmo",
            Exchange::Phemex => "phemex",
            Exchange::Bitget => "bitget",
            Exchange::Okx => "okx",
            Exchange::Bitflyer => "bitflyer",
            Exchange::Coincheck => "coincheck",
        }
    }

    pub fn normalize(
        &self,
        raw: &RawMessage,
        ctx: &ConnectionContext,
    ) -> Result<Option<Batch>, ProduceError> {
        match self {
            Exchange::Bybit => bybit(raw, ctx),
            Exchange::Binance => binance(raw, ctx),
            Exchange::Ftx => ftx(raw, ctx),
            Exchange::Gmo => gmo(raw, ctx),
            Exchange::Phemex => phemex(raw, ctx),
            Exchange::Bitget => bitget(raw, ctx),
            Exchange::Okx => okx(raw, ctx),
            Exchange::Bitflyer => bitflyer(raw, ctx),
            Exchange::Coincheck => coincheck(raw, ctx),
        }
    }
}

impl Producer for Exchange {
    fn produce(
        &mut self,
        raw: &RawMessage,
        ctx: &ConnectionContext,
    ) -> Result<Option<Batch>, ProduceError> {
        self.normalize(raw, ctx)
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- normalizers

/// `{"topic": "trade.BTCUSD", "data": [...]}`
pub fn bybit(raw: &RawMessage, _ctx: &ConnectionContext) -> Result<Option<Batch>, ProduceError> {
    let is_trade = str_field(raw, "topic").is_some_and(|t| t.starts_with("trade"));
    if !is_trade {
        return Ok(None);
    }
    objects("bybit", raw.get("data")).map(Batch::new)
}

/// `{"e": "aggTrade", ...}` is stored as is.
pub fn binance(raw: &RawMessage, _ctx: &ConnectionContext) -> Result<Option<Batch>, ProduceError> {
    if str_field(raw, "e") != Some("aggTrade") {
        return Ok(None);
    }
    whole("binance", raw)
}

/// `{"channel": "trades", "type": "update", "data": [...]}`
pub fn ftx(raw: &RawMessage, _ctx: &ConnectionContext) -> Result<Option<Batch>, ProduceError> {
    if str_field(raw, "channel") != Some("trades") || raw.get("data").is_none() {
        return Ok(None);
    }
    objects("ftx", raw.get("data")).map(Batch::new)
}

/// `{"channel": "trades", ...}` is stored as is.
pub fn gmo(raw: &RawMessage, _ctx: &ConnectionContext) -> Result<Option<Batch>, ProduceError> {
    if str_field(raw, "channel") != Some("trades") {
        return Ok(None);
    }
    whole("gmo", raw)
}

/// `{"trades": [[timestamp, side, price, volume], ...], "type": "incremental"}`
///
/// Snapshot frames (`"type": "snapshot"`) are skipped.
pub fn phemex(raw: &RawMessage, _ctx: &ConnectionContext) -> Result<Option<Batch>, ProduceError> {
    if raw.get("trades").is_none() || str_field(raw, "type") != Some("incremental") {
        return Ok(None);
    }
    let trades = rows("phemex", raw.get("trades"), 4)?;
    let records = trades
        .into_iter()
        .map(|row| {
            let mut r = Map::new();
            r.insert("timestamp".into(), row[0].clone());
            r.insert("side".into(), row[1].clone());
            r.insert("price".into(), row[2].clone());
            r.insert("volume".into(), row[3].clone());
            r
        })
        .collect();
    Ok(Batch::new(records))
}

/// `{"action": "update", "data": [[timestamp, "price", "size", side], ...]}`
pub fn bitget(raw: &RawMessage, _ctx: &ConnectionContext) -> Result<Option<Batch>, ProduceError> {
    if str_field(raw, "action") != Some("update") || raw.get("data").is_none() {
        return Ok(None);
    }
    let mut records = Vec::new();
    for row in rows("bitget", raw.get("data"), 4)? {
        let mut r = Map::new();
        r.insert("timestamp".into(), row[0].clone());
        r.insert("price".into(), float("bitget", "price", &row[1])?);
        r.insert("size".into(), float("bitget", "size", &row[2])?);
        r.insert("side".into(), row[3].clone());
        records.push(r);
    }
    Ok(Batch::new(records))
}

/// `{"arg": {"channel": "trades", ...}, "data": [...]}`
pub fn okx(raw: &RawMessage, _ctx: &ConnectionContext) -> Result<Option<Batch>, ProduceError> {
    let channel = raw.get("arg").and_then(|a| str_field(a, "channel"));
    if channel != Some("trades") || raw.get("data").is_none() {
        return Ok(None);
    }
    objects("okx", raw.get("data")).map(Batch::new)
}

/// JSON-RPC `{"params": {"channel": "lightning_executions_<product>", "message": [...]}}`
pub fn bitflyer(raw: &RawMessage, _ctx: &ConnectionContext) -> Result<Option<Batch>, ProduceError> {
    let Some(params) = raw.get("params") else {
        return Ok(None);
    };
    let is_executions =
        str_field(params, "channel").is_some_and(|c| c.starts_with("lightning_executions_"));
    if !is_executions {
        return Ok(None);
    }
    objects("bitflyer", params.get("message")).map(Batch::new)
}

/// `[id, symbol, "price", "size", side]`, stamped with the local receive time.
pub fn coincheck(raw: &RawMessage, ctx: &ConnectionContext) -> Result<Option<Batch>, ProduceError> {
    let Some(row) = raw.as_array() else {
        return Ok(None);
    };
    if row.len() < 5 {
        return Err(ProduceError::shape(
            "coincheck",
            format!("expected 5 fields, got {}", row.len()),
        ));
    }
    let mut r = Map::new();
    r.insert("id".into(), row[0].clone());
    r.insert("symbol".into(), row[1].clone());
    r.insert("price".into(), float("coincheck", "price", &row[2])?);
    r.insert("size".into(), float("coincheck", "size", &row[3])?);
    r.insert("side".into(), row[4].clone());
    // extended JSON, encoded as a BSON date
    r.insert(
        "timestamp".into(),
        json!({"$date": {"$numberLong": ctx.recv_ts_ms.to_string()}}),
    );
    Ok(Some(Batch::single(r)))
}

// --- helpers

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

fn whole(exchange: &'static str, raw: &Value) -> Result<Option<Batch>, ProduceError> {
    match raw.as_object() {
        Some(obj) => Ok(Some(Batch::single(obj.clone()))),
        None => Err(ProduceError::shape(exchange, "message is not an object")),
    }
}

/// Every element of a JSON array, each required to be an object.
fn objects(exchange: &'static str, data: Option<&Value>) -> Result<Vec<Record>, ProduceError> {
    let Some(arr) = data.and_then(Value::as_array) else {
        return Err(ProduceError::shape(exchange, "payload is not an array"));
    };
    arr.iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_object()
                .cloned()
                .ok_or_else(|| ProduceError::shape(exchange, format!("element {i} is not an object")))
        })
        .collect()
}

/// Every element of a JSON array, each required to be an array of at least `width` values.
fn rows<'a>(
    exchange: &'static str,
    data: Option<&'a Value>,
    width: usize,
) -> Result<Vec<&'a Vec<Value>>, ProduceError> {
    let Some(arr) = data.and_then(Value::as_array) else {
        return Err(ProduceError::shape(exchange, "payload is not an array"));
    };
    arr.iter()
        .enumerate()
        .map(|(i, item)| match item.as_array() {
            Some(row) if row.len() >= width => Ok(row),
            _ => Err(ProduceError::shape(
                exchange,
                format!("row {i} is not an array of {width} fields"),
            )),
        })
        .collect()
}

/// Accepts a JSON number or a numeric string.
fn float(exchange: &'static str, field: &str, v: &Value) -> Result<Value, ProduceError> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ProduceError::shape(exchange, format!("{field} is not a finite number: {v}")))
}
