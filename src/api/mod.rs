//! Broker-agnostic trade-API capability interface.
//!
//! Strategies consume brokers exclusively through these traits; concrete REST
//! adapters live outside this crate and register in the runner. The optional
//! capabilities (savings sweep, portfolio access) are discrete traits checked
//! at composition time via the accessor methods, never probed ad hoc.

mod paper;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{Candle, Order, Pair, Portfolio};

pub use paper::{PaperApi, PaperConfig};

/// Core broker capability every adapter must satisfy.
#[async_trait]
pub trait TradeApi: Send + Sync {
    /// Candle window for a pair, oldest first.
    async fn get_candle_stick(&self, pair: &Pair) -> Result<Vec<Candle>>;

    /// Known orders for a pair, most recent first.
    async fn get_orders(&self, pair: &Pair) -> Result<Vec<Order>>;

    /// Minimum tradable amount, in the funding currency.
    async fn get_min_lot_size(&self, pair: &Pair) -> Result<Decimal>;

    /// Sellable quantity of `ticker` given the current price and lot limit.
    async fn get_order_quantity(&self, ticker: &str, price: Decimal, limit: Decimal)
        -> Result<Decimal>;

    async fn buy(&self, pair: &Pair, quantity: Decimal, price: Decimal) -> Result<Order>;

    async fn sell(&self, pair: &Pair, quantity: Decimal, price: Decimal) -> Result<Order>;

    /// Free balance per symbol.
    async fn get_pair_balance(&self, pair: &Pair) -> Result<HashMap<String, Decimal>>;

    /// Savings/yield capability, when the broker has one.
    fn savings(&self) -> Option<&dyn SavingsApi> {
        None
    }

    /// Portfolio capability, when the broker has one.
    fn portfolios(&self) -> Option<&dyn PortfolioApi> {
        None
    }

    /// Signal readiness for the next data chunk. No-op outside backtesting.
    fn emit_next_candles(&self) {}
}

/// Optional savings/yield account operations.
#[async_trait]
pub trait SavingsApi: Send + Sync {
    /// Sweep `amount` of the traded currency into savings.
    async fn buy_saving(&self, pair: &Pair, amount: Decimal) -> Result<()>;

    /// Redeem `amount` of the traded currency from savings.
    async fn redeem_saving(&self, pair: &Pair, amount: Decimal) -> Result<()>;
}

/// Optional portfolio retrieval and per-instrument order placement.
#[async_trait]
pub trait PortfolioApi: Send + Sync {
    async fn get_portfolio(&self, id: &str) -> Result<Option<Portfolio>>;

    /// Buy `lots` of the instrument identified by `figi` for the pair's
    /// target portfolio.
    async fn buy_instrument(&self, pair: &Pair, lots: Decimal, figi: &str) -> Result<Order>;

    async fn sell_instrument(&self, pair: &Pair, lots: Decimal, figi: &str) -> Result<Order>;
}
