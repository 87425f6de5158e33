//! OHLCV candle model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TradeSide;

/// One OHLCV bar. Immutable once read from a broker; the `trade_side` tag is
/// only set by the replay broker when an order fills on this candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    #[serde(default)]
    pub open_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,

    pub open: Decimal,

    pub high: Decimal,

    pub low: Decimal,

    pub close: Decimal,

    #[serde(default)]
    pub volume: Decimal,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_side: Option<TradeSide>,
}

impl Candle {
    /// Build a bar from open/close only; high/low snap to the wider of the two.
    pub fn from_open_close(open: Decimal, close: Decimal) -> Self {
        Self {
            open_time: None,
            close_time: None,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: Decimal::ZERO,
            trade_side: None,
        }
    }
}
