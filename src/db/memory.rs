//! In-memory store for paper trading and tests.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::{Order, Pair, Portfolio};

use super::{OrderStore, PortfolioStore};

#[derive(Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<(String, String), Vec<Order>>>,
    last_trades: RwLock<HashMap<(String, String), DateTime<Utc>>>,
    portfolios: RwLock<HashMap<String, Portfolio>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(pair: &Pair, user: &str) -> (String, String) {
        (pair.symbol(), user.to_string())
    }

    /// Backdate the last-trade time so tests can open the freshness window
    /// without sleeping.
    #[cfg(test)]
    pub async fn set_last_order_time(&self, pair: &Pair, user: &str, time: DateTime<Utc>) {
        self.last_trades
            .write()
            .await
            .insert(Self::key(pair, user), time);
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn get_orders(&self, pair: &Pair, user: &str) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut result = orders
            .get(&Self::key(pair, user))
            .cloned()
            .unwrap_or_default();
        result.sort_by(|a, b| b.price.cmp(&a.price));
        Ok(result)
    }

    async fn get_last_order_time(
        &self,
        pair: &Pair,
        user: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self.last_trades.read().await.get(&Self::key(pair, user)).copied())
    }

    async fn save_order(&self, pair: &Pair, user: &str, order: &Order) -> Result<()> {
        let key = Self::key(pair, user);
        self.orders
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .push(order.clone());
        self.last_trades.write().await.insert(key, Utc::now());
        Ok(())
    }

    async fn delete_order(&self, id: &str) -> Result<()> {
        let mut orders = self.orders.write().await;
        let owner = orders.iter_mut().find_map(|(key, list)| {
            let index = list.iter().position(|o| o.id == id)?;
            list.remove(index);
            Some(key.clone())
        });
        drop(orders);

        if let Some(key) = owner {
            self.last_trades.write().await.insert(key, Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl PortfolioStore for MemoryStore {
    async fn get_portfolio(&self, id: &str) -> Result<Option<Portfolio>> {
        Ok(self.portfolios.read().await.get(id).cloned())
    }

    async fn save_portfolio(&self, id: &str, portfolio: &Portfolio) -> Result<()> {
        self.portfolios
            .write()
            .await
            .insert(id.to_string(), portfolio.clone());
        Ok(())
    }
}
