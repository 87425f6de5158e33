//! Order model and trade direction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A placed or cached order.
///
/// The owning pair and user are tracked by the order store, not the order
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier
    pub id: String,

    /// Trade direction
    pub side: TradeSide,

    /// When the order was placed
    pub time: DateTime<Utc>,

    /// Fill price per unit
    pub price: Decimal,

    /// Order quantity in instrument units
    pub quantity: Decimal,
}

impl Order {
    /// Create a new order with a generated id.
    pub fn new(side: TradeSide, time: DateTime<Utc>, price: Decimal, quantity: Decimal) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            side,
            time,
            price,
            quantity,
        }
    }
}
