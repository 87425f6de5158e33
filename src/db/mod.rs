//! Order and portfolio persistence.
//!
//! Strategies see only the two store traits; the SQLite implementation backs
//! scheduled runs and the in-memory one backs paper trading and tests. Both
//! tolerate concurrent use across distinct pair/user keys — serializing runs
//! for the *same* key is the scheduler's responsibility.

mod memory;
mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Order, Pair, Portfolio};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Cached-order persistence, keyed by (pair, user).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Cached orders for the pair/user, sorted by price descending.
    async fn get_orders(&self, pair: &Pair, user: &str) -> Result<Vec<Order>>;

    /// When the pair/user last traded, if ever.
    async fn get_last_order_time(&self, pair: &Pair, user: &str)
        -> Result<Option<DateTime<Utc>>>;

    /// Persist an order and bump the last-trade time.
    async fn save_order(&self, pair: &Pair, user: &str, order: &Order) -> Result<()>;

    /// Delete a matched order and bump the last-trade time of its pair/user.
    async fn delete_order(&self, id: &str) -> Result<()>;
}

/// Portfolio snapshot persistence, one snapshot per source portfolio id.
#[async_trait]
pub trait PortfolioStore: Send + Sync {
    async fn get_portfolio(&self, id: &str) -> Result<Option<Portfolio>>;

    async fn save_portfolio(&self, id: &str, portfolio: &Portfolio) -> Result<()>;
}

/// The persistence collaborators a strategy run needs.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub portfolios: Arc<dyn PortfolioStore>,
}

impl Stores {
    /// Bundle a single backend that implements both traits.
    pub fn from_backend<T>(backend: Arc<T>) -> Self
    where
        T: OrderStore + PortfolioStore + 'static,
    {
        Self {
            orders: backend.clone(),
            portfolios: backend,
        }
    }
}
