//! Trading strategies and the per-cycle dispatch entrypoint.

pub mod corridor;
pub mod dca;
pub mod follow_portfolio;

use std::sync::Arc;

use tracing::error;

use crate::api::TradeApi;
use crate::db::Stores;
use crate::models::Pair;

/// Names the strategies the scheduler can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyName {
    Dca,
    CorridorTrend,
    FollowPortfolio,
}

impl StrategyName {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "dca" => Some(Self::Dca),
            "corridor_trend" | "bollinger_bands" => Some(Self::CorridorTrend),
            "follow_portfolio" => Some(Self::FollowPortfolio),
            _ => None,
        }
    }
}

/// Run one strategy cycle for a pair: a fresh machine seeded at `init`,
/// dispatched with `exec`, awaited until the chain settles. An unknown
/// strategy name is logged and skipped, never fatal.
pub async fn run_cycle(pair: &Pair, api: Arc<dyn TradeApi>, stores: &Stores, user: &str) {
    match StrategyName::from_key(&pair.strategy) {
        Some(StrategyName::Dca) => {
            let cx = dca::Ctx {
                pair: pair.clone(),
                api,
                store: stores.orders.clone(),
                user: user.to_string(),
            };
            dca::run(&cx).await;
        }
        Some(StrategyName::CorridorTrend) => {
            let cx = corridor::Ctx {
                pair: pair.clone(),
                api,
            };
            corridor::run(&cx).await;
        }
        Some(StrategyName::FollowPortfolio) => {
            let cx = follow_portfolio::Ctx {
                pair: pair.clone(),
                api,
                store: stores.portfolios.clone(),
                user: user.to_string(),
            };
            follow_portfolio::run(&cx).await;
        }
        None => {
            error!(strategy = %pair.strategy, pair = %pair.symbol(), "strategy not found");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable stub broker shared by the strategy tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::api::{PortfolioApi, SavingsApi, TradeApi};
    use crate::models::{Candle, CandlesConfig, Order, Pair, Portfolio, TradeSide};

    /// One order the stub accepted.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PlacedOrder {
        pub side: TradeSide,
        pub quantity: Decimal,
        pub price: Decimal,
    }

    #[derive(Default)]
    pub struct StubApi {
        pub candles: Vec<Candle>,
        pub orders: Vec<Order>,
        pub min_lot: Decimal,
        pub order_quantity: Decimal,
        pub balances: HashMap<String, Decimal>,
        pub portfolios_by_id: HashMap<String, Portfolio>,
        pub portfolio_capability: bool,
        pub savings_capability: bool,
        pub fail_orders: bool,
        pub placed: Mutex<Vec<PlacedOrder>>,
        pub instrument_orders: Mutex<Vec<(TradeSide, String, Decimal)>>,
        pub savings_buys: Mutex<Vec<Decimal>>,
        pub savings_redeems: Mutex<Vec<Decimal>>,
        pub next_chunk_signals: AtomicUsize,
    }

    impl StubApi {
        pub fn placed(&self) -> Vec<PlacedOrder> {
            self.placed.lock().unwrap().clone()
        }

        pub fn instrument_orders(&self) -> Vec<(TradeSide, String, Decimal)> {
            self.instrument_orders.lock().unwrap().clone()
        }

        pub fn savings_buys(&self) -> Vec<Decimal> {
            self.savings_buys.lock().unwrap().clone()
        }

        pub fn savings_redeems(&self) -> Vec<Decimal> {
            self.savings_redeems.lock().unwrap().clone()
        }

        pub fn next_chunk_signals(&self) -> usize {
            self.next_chunk_signals.load(Ordering::SeqCst)
        }

        fn place(&self, side: TradeSide, quantity: Decimal, price: Decimal) -> Result<Order> {
            if self.fail_orders {
                bail!("stub broker rejected the order");
            }
            self.placed.lock().unwrap().push(PlacedOrder {
                side,
                quantity,
                price,
            });
            Ok(Order::new(side, Utc::now(), price, quantity))
        }
    }

    #[async_trait]
    impl TradeApi for StubApi {
        async fn get_candle_stick(&self, _pair: &Pair) -> Result<Vec<Candle>> {
            Ok(self.candles.clone())
        }

        async fn get_orders(&self, _pair: &Pair) -> Result<Vec<Order>> {
            Ok(self.orders.clone())
        }

        async fn get_min_lot_size(&self, _pair: &Pair) -> Result<Decimal> {
            Ok(self.min_lot)
        }

        async fn get_order_quantity(
            &self,
            _ticker: &str,
            _price: Decimal,
            _limit: Decimal,
        ) -> Result<Decimal> {
            Ok(self.order_quantity)
        }

        async fn buy(&self, _pair: &Pair, quantity: Decimal, price: Decimal) -> Result<Order> {
            self.place(TradeSide::Buy, quantity, price)
        }

        async fn sell(&self, _pair: &Pair, quantity: Decimal, price: Decimal) -> Result<Order> {
            self.place(TradeSide::Sell, quantity, price)
        }

        async fn get_pair_balance(&self, _pair: &Pair) -> Result<HashMap<String, Decimal>> {
            Ok(self.balances.clone())
        }

        fn savings(&self) -> Option<&dyn SavingsApi> {
            self.savings_capability.then_some(self as &dyn SavingsApi)
        }

        fn portfolios(&self) -> Option<&dyn PortfolioApi> {
            self.portfolio_capability.then_some(self as &dyn PortfolioApi)
        }

        fn emit_next_candles(&self) {
            self.next_chunk_signals.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SavingsApi for StubApi {
        async fn buy_saving(&self, _pair: &Pair, amount: Decimal) -> Result<()> {
            self.savings_buys.lock().unwrap().push(amount);
            Ok(())
        }

        async fn redeem_saving(&self, _pair: &Pair, amount: Decimal) -> Result<()> {
            self.savings_redeems.lock().unwrap().push(amount);
            Ok(())
        }
    }

    #[async_trait]
    impl PortfolioApi for StubApi {
        async fn get_portfolio(&self, id: &str) -> Result<Option<Portfolio>> {
            Ok(self.portfolios_by_id.get(id).cloned())
        }

        async fn buy_instrument(&self, _pair: &Pair, lots: Decimal, figi: &str) -> Result<Order> {
            if self.fail_orders {
                bail!("stub broker rejected the order");
            }
            self.instrument_orders
                .lock()
                .unwrap()
                .push((TradeSide::Buy, figi.to_string(), lots));
            Ok(Order::new(TradeSide::Buy, Utc::now(), Decimal::ZERO, lots))
        }

        async fn sell_instrument(&self, _pair: &Pair, lots: Decimal, figi: &str) -> Result<Order> {
            if self.fail_orders {
                bail!("stub broker rejected the order");
            }
            self.instrument_orders
                .lock()
                .unwrap()
                .push((TradeSide::Sell, figi.to_string(), lots));
            Ok(Order::new(TradeSide::Sell, Utc::now(), Decimal::ZERO, lots))
        }
    }

    pub fn test_pair(strategy: &str) -> Pair {
        Pair {
            api_name: "paper".to_string(),
            strategy: strategy.to_string(),
            schedule_secs: None,
            candles: CandlesConfig {
                interval: "15m".to_string(),
                limit: 20,
                from: None,
                to: None,
            },
            take: "USDT".to_string(),
            make: "BNB".to_string(),
            offset: None,
            corridor_offset_percent: None,
            min_lot_quantity: None,
            quantity_transform: None,
            source_portfolio_id: None,
            target_portfolio_id: None,
        }
    }
}
