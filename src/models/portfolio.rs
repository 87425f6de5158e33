//! Portfolio and position models for the follow-portfolio strategy.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument category of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    Share,
    Bond,
    Etf,
    Currency,
    Future,
}

/// A single position inside a portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique instrument identifier
    pub figi: String,

    pub instrument_type: InstrumentType,

    /// Held quantity in instrument units
    pub quantity: Decimal,

    /// Held quantity in lots
    pub quantity_lots: Decimal,

    pub current_price: Decimal,

    #[serde(default)]
    pub average_position_price: Decimal,
}

impl Position {
    /// The portfolio's own settlement currency: excluded from proportion and
    /// diff calculations.
    pub fn is_cash(&self) -> bool {
        self.instrument_type == InstrumentType::Currency && self.current_price == Decimal::ONE
    }

    /// Market value of the position.
    pub fn value(&self) -> Decimal {
        self.current_price * self.quantity
    }
}

/// A portfolio snapshot: the last known position set for an account, plus the
/// per-category totals some brokers report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,

    pub positions: Vec<Position>,

    #[serde(default)]
    pub total_amount_shares: Decimal,

    #[serde(default)]
    pub total_amount_bonds: Decimal,

    #[serde(default)]
    pub total_amount_etf: Decimal,

    #[serde(default)]
    pub total_amount_currencies: Decimal,

    #[serde(default)]
    pub total_amount_futures: Decimal,
}

impl Portfolio {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            positions: Vec::new(),
            total_amount_shares: Decimal::ZERO,
            total_amount_bonds: Decimal::ZERO,
            total_amount_etf: Decimal::ZERO,
            total_amount_currencies: Decimal::ZERO,
            total_amount_futures: Decimal::ZERO,
        }
    }
}
