// connectors/bin-collect/src/feeds.rs
//! Endpoint and subscription presets for every supported feed.

use clap::ValueEnum;
use collector_core::{BoardAggregator, Exchange, Producer};
use serde_json::{json, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Feed {
    Bybit,
    Binance,
    Ftx,
    Gmo,
    Phemex,
    Bitget,
    Okx,
    Bitflyer,
    #[value(name = "bitflyer.board")]
    BitflyerBoard,
    Coincheck,
}

#[derive(Clone, Debug)]
pub struct FeedPreset {
    pub url: &'static str,
    /// frames sent, in order, right after every (re)connect
    pub subscribe: Vec<Value>,
    pub database: &'static str,
    pub collection: &'static str,
}

impl Feed {
    pub fn name(&self) -> &'static str {
        match self {
            Feed::BitflyerBoard => "bitflyer.board",
            other => other.exchange().as_str(),
        }
    }

    fn exchange(&self) -> Exchange {
        match self {
            Feed::Bybit => Exchange::Bybit,
            Feed::Binance => Exchange::Binance,
            Feed::Ftx => Exchange::Ftx,
            Feed::Gmo => Exchange::Gmo,
            Feed::Phemex => Exchange::Phemex,
            Feed::Bitget => Exchange::Bitget,
            Feed::Okx => Exchange::Okx,
            Feed::Bitflyer | Feed::BitflyerBoard => Exchange::Bitflyer,
            Feed::Coincheck => Exchange::Coincheck,
        }
    }

    pub fn producer(&self) -> Box<dyn Producer> {
        match self {
            Feed::BitflyerBoard => Box::new(BoardAggregator::default()),
            other => Box::new(other.exchange()),
        }
    }

    pub fn preset(&self) -> FeedPreset {
        let (url, subscribe) = match self {
            Feed::Bybit => (
                "wss://stream.bybit.com/realtime",
                vec![json!({"op": "subscribe", "args": ["trade.BTCUSD"]})],
            ),
            Feed::Binance => (
                "wss://fstream.binance.com/ws",
                vec![json!({"method": "SUBSCRIBE", "params": ["btcusdt@aggTrade"], "id": 1})],
            ),
            Feed::Ftx => (
                "wss://ftx.com/ws",
                vec![json!({"op": "subscribe", "channel": "trades", "market": "BTC-PERP"})],
            ),
            Feed::Gmo => (
                "wss://api.coin.z.com/ws/public/v1",
                vec![json!({
                    "command": "subscribe",
                    "channel": "trades",
                    "symbol": "BTC_JPY",
                    "option": "TAKER_ONLY"
                })],
            ),
            Feed::Phemex => (
                "wss://phemex.com/ws",
                vec![json!({"id": 1, "method": "trade.subscribe", "params": ["BTCUSD"]})],
            ),
            Feed::Bitget => (
                "wss://ws.bitget.com/mix/v1/stream",
                vec![json!({
                    "op": "subscribe",
                    "args": [{"instType": "mc", "channel": "trade", "instId": "BTCUSD"}]
                })],
            ),
            Feed::Okx => (
                "wss://ws.okx.com:8443/ws/v5/public",
                vec![json!({
                    "op": "subscribe",
                    "args": [{"channel": "trades", "instId": "BTC-USD-SWAP"}]
                })],
            ),
            Feed::Bitflyer => (
                "wss://ws.lightstream.bitflyer.com/json-rpc",
                vec![json!({
                    "method": "subscribe",
                    "params": {"channel": "lightning_executions_FX_BTC_JPY"},
                    "id": 1
                })],
            ),
            Feed::BitflyerBoard => (
                "wss://ws.lightstream.bitflyer.com/json-rpc",
                vec![
                    json!({
                        "method": "subscribe",
                        "params": {"channel": "lightning_board_snapshot_FX_BTC_JPY"},
                        "id": 1
                    }),
                    json!({
                        "method": "subscribe",
                        "params": {"channel": "lightning_board_FX_BTC_JPY"},
                        "id": 2
                    }),
                ],
            ),
            Feed::Coincheck => (
                "wss://ws-api.coincheck.com/",
                vec![json!({"type": "subscribe", "channel": "btc_jpy-trades"})],
            ),
        };

        FeedPreset {
            url,
            subscribe,
            database: self.exchange().as_str(),
            collection: match self {
                Feed::BitflyerBoard => "board",
                _ => "trades",
            },
        }
    }
}
