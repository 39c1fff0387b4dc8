/*
[INPUT]:  Ticker/order-book/funding/candle/indicator updates, position records
[OUTPUT]: Last-writer-wins snapshots, sequence-guarded, read by many
[POS]:    Shared state layer - depended on by the main trader, C8, C9, C11
[UPDATE]: When adding a new market data source or account-side field
*/

use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub mark_price: Decimal,
    pub last_price: Decimal,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub spread: Decimal,
    pub funding_rate: Decimal,
    pub ts_exchange: i64,
    pub ts_local: i64,
    pub seq: u64,
}

impl Tick {
    fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            mark_price: Decimal::ZERO,
            last_price: Decimal::ZERO,
            best_bid: Decimal::ZERO,
            best_ask: Decimal::ZERO,
            spread: Decimal::ZERO,
            funding_rate: Decimal::ZERO,
            ts_exchange: 0,
            ts_local: 0,
            seq: 0,
        }
    }
}

struct SymbolSlot {
    tx: watch::Sender<Tick>,
}

/// Latest normalized tick per symbol, last-writer-wins with sequence
/// guarding: an updater mutates only the fields it owns and advances `seq`
/// to `max(provided, lastSeq+1)`; an update whose provided seq is strictly
/// less than the stored one is silently dropped.
#[derive(Default)]
pub struct MarketStateStore {
    symbols: RwLock<HashMap<String, SymbolSlot>>,
}

enum Field<'a> {
    Ticker { last: Decimal, bid: Decimal, ask: Decimal },
    OrderBook { bid: Decimal, ask: Decimal },
    Funding { rate: Decimal },
    Candle { mark: Decimal },
    #[allow(dead_code)]
    Indicators(&'a ()),
}

impl MarketStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, symbol: &str, provided_seq: u64, field: Field) {
        let mut symbols = self.symbols.write().unwrap();
        let slot = symbols.entry(symbol.to_string()).or_insert_with(|| {
            let (tx, _rx) = watch::channel(Tick::empty(symbol));
            SymbolSlot { tx }
        });

        let current = slot.tx.borrow().clone();
        if provided_seq != 0 && provided_seq < current.seq {
            return;
        }
        let next_seq = provided_seq.max(current.seq + 1);

        let mut updated = current;
        updated.seq = next_seq;
        updated.ts_local = next_seq as i64; // monotone stand-in, real clock is an interface boundary
        match field {
            Field::Ticker { last, bid, ask } => {
                updated.last_price = last;
                updated.best_bid = bid;
                updated.best_ask = ask;
                updated.spread = ask - bid;
            }
            Field::OrderBook { bid, ask } => {
                updated.best_bid = bid;
                updated.best_ask = ask;
                updated.spread = ask - bid;
            }
            Field::Funding { rate } => {
                updated.funding_rate = rate;
            }
            Field::Candle { mark } => {
                updated.mark_price = mark;
            }
            Field::Indicators(_) => {}
        }

        // `send` is a no-op when there are no receivers yet; this store's
        // value must be visible to `get_tick` regardless of subscribers.
        slot.tx.send_replace(updated);
    }

    pub fn update_from_ticker(&self, symbol: &str, seq: u64, last: Decimal, bid: Decimal, ask: Decimal) {
        self.apply(symbol, seq, Field::Ticker { last, bid, ask });
    }

    pub fn update_from_order_book(&self, symbol: &str, seq: u64, bid: Decimal, ask: Decimal) {
        self.apply(symbol, seq, Field::OrderBook { bid, ask });
    }

    pub fn update_from_funding(&self, symbol: &str, seq: u64, rate: Decimal) {
        self.apply(symbol, seq, Field::Funding { rate });
    }

    pub fn update_from_candle(&self, symbol: &str, seq: u64, mark: Decimal) {
        self.apply(symbol, seq, Field::Candle { mark });
    }

    pub fn update_indicators(&self, symbol: &str, seq: u64) {
        self.apply(symbol, seq, Field::Indicators(&()));
    }

    pub fn get_tick(&self, symbol: &str) -> Option<Tick> {
        self.symbols.read().unwrap().get(symbol).map(|s| s.tx.borrow().clone())
    }

    pub fn subscribe(&self, symbol: &str) -> watch::Receiver<Tick> {
        let mut symbols = self.symbols.write().unwrap();
        let slot = symbols.entry(symbol.to_string()).or_insert_with(|| {
            let (tx, _rx) = watch::channel(Tick::empty(symbol));
            SymbolSlot { tx }
        });
        slot.tx.subscribe()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopMeta {
    pub last_stop_price: Decimal,
    pub last_update_ts: i64,
    pub order_id: Option<i64>,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    pub symbol: String,
    pub side: crate::decimal::Side,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub leverage: Decimal,
}

/// Account-side snapshot: open positions, per-symbol stop metadata, and
/// connectivity/drift health. Writes are funnelled through a single
/// serialized ingestor per the concurrency model; reads are lock-guarded
/// snapshots, never torn.
#[derive(Default)]
pub struct AccountStateStore {
    positions: RwLock<HashMap<String, PositionRecord>>,
    stop_meta: RwLock<HashMap<String, StopMeta>>,
    drift_score: RwLock<u64>,
    private_ws_heartbeat_ts: RwLock<i64>,
}

impl AccountStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_position(&self, position: PositionRecord) {
        self.positions.write().unwrap().insert(position.symbol.clone(), position);
    }

    pub fn clear_position(&self, symbol: &str) {
        self.positions.write().unwrap().remove(symbol);
    }

    pub fn get_position(&self, symbol: &str) -> Option<PositionRecord> {
        self.positions.read().unwrap().get(symbol).cloned()
    }

    /// Strictly monotone per symbol.
    pub fn next_stop_revision(&self, symbol: &str) -> u64 {
        let mut meta = self.stop_meta.write().unwrap();
        let entry = meta.entry(symbol.to_string()).or_default();
        entry.revision += 1;
        entry.revision
    }

    pub fn record_stop_update(&self, symbol: &str, price: Decimal, order_id: i64, now_ms: i64) {
        let mut meta = self.stop_meta.write().unwrap();
        let entry = meta.entry(symbol.to_string()).or_default();
        entry.last_stop_price = price;
        entry.order_id = Some(order_id);
        entry.last_update_ts = now_ms;
    }

    pub fn get_stop_meta(&self, symbol: &str) -> StopMeta {
        self.stop_meta.read().unwrap().get(symbol).cloned().unwrap_or_default()
    }

    pub fn register_drift(&self) -> u64 {
        let mut score = self.drift_score.write().unwrap();
        *score += 1;
        *score
    }

    pub fn clear_drift(&self) {
        *self.drift_score.write().unwrap() = 0;
    }

    pub fn drift_score(&self) -> u64 {
        *self.drift_score.read().unwrap()
    }

    pub fn mark_private_ws_heartbeat(&self, now_ms: i64) {
        *self.private_ws_heartbeat_ts.write().unwrap() = now_ms;
    }

    pub fn get_health_status(&self, now_ms: i64, stale_after_ms: i64) -> HealthStatus {
        let last = *self.private_ws_heartbeat_ts.read().unwrap();
        if now_ms - last > stale_after_ms {
            HealthStatus::Stale
        } else {
            HealthStatus::Healthy
        }
    }
}
