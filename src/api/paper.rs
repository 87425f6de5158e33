//! Simulated broker that replays a candle series chunk by chunk.
//!
//! Used by the `paper` CLI command and by strategy tests: orders are recorded
//! in memory, stamped with the replay candle's open time, and the candle is
//! tagged with the trade side so a replay can be inspected afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;

use crate::models::{Candle, Order, Pair, TradeSide};

use super::TradeApi;

/// Configuration for a paper replay session.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Full candle series to replay, oldest first
    pub candles: Vec<Candle>,

    /// Minimum lot size reported to strategies
    pub min_lot: Decimal,

    /// Free balances per symbol
    pub balances: HashMap<String, Decimal>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            candles: Vec::new(),
            min_lot: dec!(1),
            balances: HashMap::new(),
        }
    }
}

/// In-memory replay broker.
pub struct PaperApi {
    candles: RwLock<Vec<Candle>>,
    cursor: AtomicUsize,
    orders: RwLock<Vec<Order>>,
    min_lot: Decimal,
    balances: HashMap<String, Decimal>,
    next_requested: AtomicBool,
}

impl PaperApi {
    pub fn new(config: PaperConfig) -> Self {
        Self {
            candles: RwLock::new(config.candles),
            cursor: AtomicUsize::new(0),
            orders: RwLock::new(Vec::new()),
            min_lot: config.min_lot,
            balances: config.balances,
            next_requested: AtomicBool::new(false),
        }
    }

    /// Whether the replay has served every candle.
    pub async fn is_exhausted(&self) -> bool {
        self.cursor.load(Ordering::SeqCst) >= self.candles.read().await.len()
    }

    /// How far the replay cursor has advanced.
    pub fn progress(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Consume the "ready for next chunk" signal set by `emit_next_candles`.
    pub fn take_next_request(&self) -> bool {
        self.next_requested.swap(false, Ordering::SeqCst)
    }

    /// All orders recorded so far, oldest first.
    pub async fn recorded_orders(&self) -> Vec<Order> {
        self.orders.read().await.clone()
    }

    /// The replayed series, with trade-side tags applied.
    pub async fn tagged_candles(&self) -> Vec<Candle> {
        self.candles.read().await.clone()
    }

    async fn create_order(&self, side: TradeSide, price: Decimal, quantity: Decimal) -> Order {
        let mut candles = self.candles.write().await;
        let index = self
            .cursor
            .load(Ordering::SeqCst)
            .min(candles.len().saturating_sub(1));
        let time = candles
            .get(index)
            .and_then(|c| c.open_time)
            .unwrap_or_else(Utc::now);
        if let Some(candle) = candles.get_mut(index) {
            candle.trade_side = Some(side);
        }
        let order = Order::new(side, time, price, quantity);
        self.orders.write().await.push(order.clone());
        order
    }
}

#[async_trait]
impl TradeApi for PaperApi {
    async fn get_candle_stick(&self, pair: &Pair) -> Result<Vec<Candle>> {
        let candles = self.candles.read().await;
        let start = self.cursor.load(Ordering::SeqCst);
        let end = (start + pair.candles.limit).min(candles.len());
        self.cursor.store(end, Ordering::SeqCst);
        Ok(candles.get(start..end).unwrap_or_default().to_vec())
    }

    async fn get_orders(&self, _pair: &Pair) -> Result<Vec<Order>> {
        let mut orders = self.orders.read().await.clone();
        orders.reverse();
        Ok(orders)
    }

    async fn get_min_lot_size(&self, pair: &Pair) -> Result<Decimal> {
        Ok(pair.min_lot_quantity.unwrap_or(self.min_lot))
    }

    async fn get_order_quantity(
        &self,
        ticker: &str,
        _price: Decimal,
        _limit: Decimal,
    ) -> Result<Decimal> {
        Ok(self.balances.get(ticker).copied().unwrap_or(Decimal::ONE))
    }

    async fn buy(&self, _pair: &Pair, quantity: Decimal, price: Decimal) -> Result<Order> {
        Ok(self.create_order(TradeSide::Buy, price, quantity).await)
    }

    async fn sell(&self, _pair: &Pair, quantity: Decimal, price: Decimal) -> Result<Order> {
        Ok(self.create_order(TradeSide::Sell, price, quantity).await)
    }

    async fn get_pair_balance(&self, _pair: &Pair) -> Result<HashMap<String, Decimal>> {
        Ok(self.balances.clone())
    }

    fn emit_next_candles(&self) {
        self.next_requested.store(true, Ordering::SeqCst);
    }
}
