//! SQLite-backed order and portfolio store.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{Order, Pair, Portfolio, TradeSide};

use super::{OrderStore, PortfolioStore};

/// Durable store. Decimal columns are stored as text to keep exact values;
/// ordering happens in memory after parsing.
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: String,
    side: String,
    time: DateTime<Utc>,
    price: String,
    quantity: String,
}

impl OrderRow {
    fn into_order(self) -> Result<Order> {
        let side = match self.side.as_str() {
            "BUY" => TradeSide::Buy,
            "SELL" => TradeSide::Sell,
            other => anyhow::bail!("unknown order side in store: {other}"),
        };
        Ok(Order {
            id: self.id,
            side,
            time: self.time,
            price: Decimal::from_str(&self.price).context("order price")?,
            quantity: Decimal::from_str(&self.quantity).context("order quantity")?,
        })
    }
}

impl SqliteStore {
    /// Connect and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                user_id TEXT NOT NULL,
                side TEXT NOT NULL,
                time TEXT NOT NULL,
                price TEXT NOT NULL,
                quantity TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS last_trades (
                pair TEXT NOT NULL,
                user_id TEXT NOT NULL,
                time TEXT NOT NULL,
                PRIMARY KEY (pair, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolios (
                id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_pair_user ON orders(pair, user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn touch_last_trade(&self, pair_key: &str, user: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO last_trades (pair, user_id, time)
            VALUES (?, ?, ?)
            ON CONFLICT(pair, user_id) DO UPDATE SET time = excluded.time
            "#,
        )
        .bind(pair_key)
        .bind(user)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OrderStore for SqliteStore {
    async fn get_orders(&self, pair: &Pair, user: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT id, side, time, price, quantity FROM orders WHERE pair = ? AND user_id = ?",
        )
        .bind(pair.symbol())
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        let mut orders = rows
            .into_iter()
            .map(OrderRow::into_order)
            .collect::<Result<Vec<_>>>()?;
        orders.sort_by(|a, b| b.price.cmp(&a.price));
        Ok(orders)
    }

    async fn get_last_order_time(
        &self,
        pair: &Pair,
        user: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let time: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT time FROM last_trades WHERE pair = ? AND user_id = ?")
                .bind(pair.symbol())
                .bind(user)
                .fetch_optional(&self.pool)
                .await?;

        Ok(time.map(|(t,)| t))
    }

    async fn save_order(&self, pair: &Pair, user: &str, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO orders (id, pair, user_id, side, time, price, quantity)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.id)
        .bind(pair.symbol())
        .bind(user)
        .bind(order.side.as_str())
        .bind(order.time)
        .bind(order.price.to_string())
        .bind(order.quantity.to_string())
        .execute(&self.pool)
        .await?;

        self.touch_last_trade(&pair.symbol(), user).await
    }

    async fn delete_order(&self, id: &str) -> Result<()> {
        let owner: Option<(String, String)> =
            sqlx::query_as("SELECT pair, user_id FROM orders WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((pair_key, user)) = owner else {
            return Ok(());
        };

        sqlx::query("DELETE FROM orders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.touch_last_trade(&pair_key, &user).await
    }
}

#[async_trait]
impl PortfolioStore for SqliteStore {
    async fn get_portfolio(&self, id: &str) -> Result<Option<Portfolio>> {
        let document: Option<(String,)> =
            sqlx::query_as("SELECT document FROM portfolios WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        document
            .map(|(doc,)| serde_json::from_str(&doc).context("portfolio document"))
            .transpose()
    }

    async fn save_portfolio(&self, id: &str, portfolio: &Portfolio) -> Result<()> {
        let document = serde_json::to_string(portfolio)?;
        sqlx::query(
            r#"
            INSERT INTO portfolios (id, document, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(document)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
