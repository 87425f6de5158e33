//! Trading pair configuration: instrument symbols, candle interval, and
//! per-strategy tuning knobs.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Candle request configuration for a pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandlesConfig {
    /// Candle interval, e.g. "1m", "15m", "4h", "1d"
    pub interval: String,

    /// How many candles to request
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Optional ISO date range for historical requests
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub to: Option<String>,
}

fn default_limit() -> usize {
    20
}

impl CandlesConfig {
    /// Parse the interval string into a duration.
    ///
    /// Returns `None` for malformed intervals; callers treat that as a
    /// configuration error and skip the cycle rather than panic.
    pub fn interval_duration(&self) -> Option<Duration> {
        let s = self.interval.trim();
        let split = s.find(|c: char| !c.is_ascii_digit())?;
        let value: i64 = s[..split].parse().ok()?;
        match &s[split..] {
            "m" => Some(Duration::minutes(value)),
            "h" => Some(Duration::hours(value)),
            "d" => Some(Duration::days(value)),
            _ => None,
        }
    }
}

/// Trading instrument plus strategy parameters. Loaded once per scheduling
/// cycle and read-only during a strategy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    /// Which broker adapter serves this pair
    pub api_name: String,

    /// Which strategy runs this pair
    pub strategy: String,

    /// Seconds between scheduled runs
    #[serde(default)]
    pub schedule_secs: Option<u64>,

    pub candles: CandlesConfig,

    /// Funding currency / ticker
    pub take: String,

    /// Traded currency / ticker
    pub make: String,

    /// Price-unit tolerance for the DCA ladder scan
    #[serde(default)]
    pub offset: Option<Decimal>,

    /// Corridor smoothing tolerance in percent of corridor width (default 5)
    #[serde(default)]
    pub corridor_offset_percent: Option<Decimal>,

    /// Minimum lots to trade where the broker does not report one
    #[serde(default)]
    pub min_lot_quantity: Option<Decimal>,

    /// Key selecting one of the named quantity transforms
    #[serde(default)]
    pub quantity_transform: Option<String>,

    /// Portfolio to mirror (follow-portfolio strategy)
    #[serde(default)]
    pub source_portfolio_id: Option<String>,

    /// Portfolio to rebalance (follow-portfolio strategy)
    #[serde(default)]
    pub target_portfolio_id: Option<String>,
}

impl Pair {
    /// Storage key for the order store, `{make}{take}`.
    pub fn symbol(&self) -> String {
        format!("{}{}", self.make, self.take)
    }

    /// Resolve the configured quantity transform, identity when absent or
    /// unrecognized.
    pub fn transform(&self) -> QuantityTransform {
        QuantityTransform::from_key(self.quantity_transform.as_deref())
    }
}

/// Closed set of order-quantity transforms selectable by configuration key.
///
/// Keys: `identity`, `floor`, `round:<dp>`. Anything else falls back to
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityTransform {
    Identity,
    Floor,
    Round(u32),
}

impl QuantityTransform {
    pub fn from_key(key: Option<&str>) -> Self {
        match key {
            None | Some("identity") => Self::Identity,
            Some("floor") => Self::Floor,
            Some(other) => match other.strip_prefix("round:").and_then(|dp| dp.parse().ok()) {
                Some(dp) => Self::Round(dp),
                None => Self::Identity,
            },
        }
    }

    pub fn apply(&self, quantity: Decimal) -> Decimal {
        match self {
            Self::Identity => quantity,
            Self::Floor => quantity.floor(),
            Self::Round(dp) => quantity.round_dp(*dp),
        }
    }
}
