//! Corridor/indicator math: moving average, population standard deviation,
//! candle direction, and the Bollinger-style price corridor.
//!
//! Everything here is a pure function over closing-price series; prices are
//! mapped to `f64` once at the strategy boundary.

use rust_decimal::prelude::ToPrimitive;
use statrs::statistics::Statistics;

use crate::models::{Candle, TradeSide};

const TO_FIXED_VALUE: i32 = 7;

/// Round to a fixed number of decimal places to bound floating-point error
/// growth over long accumulations.
fn round_fixed(value: f64) -> f64 {
    let factor = 10f64.powi(TO_FIXED_VALUE);
    (value * factor).round() / factor
}

/// Arithmetic mean with intermediate rounding after every accumulation step.
pub fn moving_average(closes: &[f64]) -> f64 {
    if closes.is_empty() {
        return 0.0;
    }
    let total = closes
        .iter()
        .fold(0.0, |total, current| round_fixed(total + current));
    round_fixed(total / closes.len() as f64)
}

/// Population (biased) standard deviation.
pub fn population_std_dev(closes: &[f64]) -> f64 {
    if closes.is_empty() {
        return 0.0;
    }
    closes.iter().copied().population_std_dev()
}

/// Label a candle with its contrarian trade direction: a falling candle
/// (open >= close) labels "buy", a rising one labels "sell".
pub fn candle_direction(candle: &Candle) -> TradeSide {
    if candle.open >= candle.close {
        TradeSide::Buy
    } else {
        TradeSide::Sell
    }
}

/// Inclusive containment between the lower and upper of two bounds.
pub fn is_in_range(bounds: [f64; 2], value: f64) -> bool {
    let (low, high) = if bounds[0] <= bounds[1] {
        (bounds[0], bounds[1])
    } else {
        (bounds[1], bounds[0])
    };
    value >= low && value <= high
}

/// Derived statistics over a closing-price window: a moving average plus a
/// two-sigma corridor around it. Computed fresh on every trend-detection
/// dispatch, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CorridorInfo {
    pub moving_average: f64,
    pub std_dev: f64,
    pub top_edge: f64,
    pub bottom_edge: f64,
    pub width: f64,
    pub close: f64,
}

impl CorridorInfo {
    /// Build corridor statistics from a closing-price window.
    /// Empty windows yield `None`.
    pub fn from_closes(closes: &[f64]) -> Option<Self> {
        let last = *closes.last()?;
        let moving_average = moving_average(closes);
        let std_dev = population_std_dev(closes);
        let top_edge = moving_average + 2.0 * std_dev;
        let bottom_edge = moving_average - 2.0 * std_dev;
        Some(Self {
            moving_average,
            std_dev,
            top_edge,
            bottom_edge,
            width: top_edge - bottom_edge,
            close: last,
        })
    }

    /// Whether a value sits inside the corridor, edges inclusive.
    pub fn contains(&self, value: f64) -> bool {
        is_in_range([self.bottom_edge, self.top_edge], value)
    }
}

/// Extract closing prices from a candle series as `f64`.
pub fn closing_prices(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .map(|c| c.close.to_f64().unwrap_or(0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_moving_average() {
        assert_eq!(moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0]), 3.0);
        assert_eq!(moving_average(&[]), 0.0);
    }

    #[test]
    fn test_moving_average_rounds_intermediates() {
        // raw f64 summation of thirds drifts past 7 decimal places
        let avg = moving_average(&[0.1000000004, 0.1000000004, 0.1000000004]);
        assert_eq!(avg, 0.1);
    }

    #[test]
    fn test_population_std_dev() {
        let sd = population_std_dev(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((sd - 1.4142135623730951).abs() < 1e-12);
    }

    #[test]
    fn test_candle_direction() {
        let falling = Candle::from_open_close(dec!(5), dec!(1));
        assert_eq!(candle_direction(&falling), TradeSide::Buy);

        let rising = Candle::from_open_close(dec!(1), dec!(5));
        assert_eq!(candle_direction(&rising), TradeSide::Sell);

        // a doji labels buy by convention
        let flat = Candle::from_open_close(dec!(3), dec!(3));
        assert_eq!(candle_direction(&flat), TradeSide::Buy);
    }

    #[test]
    fn test_is_in_range() {
        assert!(is_in_range([1.0, 50.0], 50.0));
        assert!(is_in_range([1.0, 50.0], 1.0));
        assert!(!is_in_range([1.0, 50.0], 51.0));
        assert!(!is_in_range([1.0, 50.0], 0.0));
        // unordered bounds behave the same
        assert!(is_in_range([50.0, 1.0], 25.0));
    }

    #[test]
    fn test_corridor_invariants() {
        let closes = [10.0, 12.0, 11.0, 13.0, 12.5, 11.8];
        let corridor = CorridorInfo::from_closes(&closes).unwrap();
        assert!(corridor.bottom_edge <= corridor.moving_average);
        assert!(corridor.moving_average <= corridor.top_edge);
        assert!(corridor.width >= 0.0);
        assert_eq!(corridor.close, 11.8);
    }

    #[test]
    fn test_flat_series_collapses_corridor() {
        let closes = [7.0; 12];
        let corridor = CorridorInfo::from_closes(&closes).unwrap();
        assert_eq!(corridor.std_dev, 0.0);
        assert_eq!(corridor.top_edge, corridor.moving_average);
        assert_eq!(corridor.bottom_edge, corridor.moving_average);
        assert_eq!(corridor.width, 0.0);
    }

    #[test]
    fn test_empty_window_yields_none() {
        assert!(CorridorInfo::from_closes(&[]).is_none());
    }
}
