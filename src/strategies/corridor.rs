//! Corridor trend strategy (Bollinger-style).
//!
//! Builds three overlapping corridors over the closing-price series and looks
//! for a candle that pierced (or nearly pierced) the oldest corridor's edge
//! and then reversed direction while price stayed inside the newer corridors.
//! A top intersection signals a sell, a bottom intersection a buy.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::future::BoxFuture;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::api::TradeApi;
use crate::engine::{Machine, Transitions};
use crate::indicators::{candle_direction, closing_prices, CorridorInfo};
use crate::models::{Candle, Pair, TradeSide};

const DEFAULT_OFFSET_PERCENT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Init,
    Analyze,
    Trade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Exec,
    GetCandleStick,
    DetectTrend,
    MakeDecision,
    Buy,
    Sell,
}

pub enum Payload {
    Start,
    Candles(Vec<Candle>),
    Trend { trend: TradeSide, price: Decimal },
    Order { price: Decimal },
}

/// Collaborators for one corridor-trend invocation.
pub struct Ctx {
    pub pair: Pair,
    pub api: Arc<dyn TradeApi>,
}

type CorridorMachine = Machine<State, Event, Payload, Ctx>;

pub fn machine() -> CorridorMachine {
    let mut table: Transitions<State, Event, Payload, Ctx> = HashMap::new();
    table.insert((State::Init, Event::Exec), exec);
    table.insert((State::Init, Event::GetCandleStick), get_candle_stick);
    table.insert((State::Analyze, Event::DetectTrend), detect_trend);
    table.insert((State::Analyze, Event::MakeDecision), make_decision);
    table.insert((State::Trade, Event::Buy), buy);
    table.insert((State::Trade, Event::Sell), sell);
    Machine::new(table, State::Init)
}

/// Run one full strategy cycle.
pub async fn run(cx: &Ctx) {
    machine().dispatch(Event::Exec, cx, Payload::Start).await;
}

fn exec<'a>(m: &'a mut CorridorMachine, cx: &'a Ctx, _payload: Payload) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        m.dispatch(Event::GetCandleStick, cx, Payload::Start).await;
    })
}

fn get_candle_stick<'a>(m: &'a mut CorridorMachine, cx: &'a Ctx, _payload: Payload) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        // two extra candles so the last three candles each get a full window
        let mut pair = cx.pair.clone();
        pair.candles.limit += 2;

        let candles = match cx.api.get_candle_stick(&pair).await {
            Ok(candles) => candles,
            Err(error) => {
                error!(pair = %cx.pair.symbol(), api = %cx.pair.api_name, %error, "failed to fetch candles");
                return;
            }
        };
        if candles.is_empty() {
            return;
        }
        m.change_state(State::Analyze);
        m.dispatch(Event::DetectTrend, cx, Payload::Candles(candles))
            .await;
    })
}

fn detect_trend<'a>(m: &'a mut CorridorMachine, cx: &'a Ctx, payload: Payload) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let Payload::Candles(candles) = payload else {
            error!(strategy = "corridor_trend", "unexpected payload for detect_trend");
            return;
        };
        if candles.len() < 3 {
            cx.api.emit_next_candles();
            return;
        }

        let closes = closing_prices(&candles);
        let n = closes.len();
        let windows = (
            CorridorInfo::from_closes(&closes[2..]),
            CorridorInfo::from_closes(&closes[1..n - 1]),
            CorridorInfo::from_closes(&closes[..n - 2]),
        );
        let (Some(current), Some(previous), Some(before_prev)) = windows else {
            cx.api.emit_next_candles();
            return;
        };

        let current_in_corridor = current.contains(current.close);
        let previous_in_corridor = previous.contains(previous.close);

        let offset_percent = cx
            .pair
            .corridor_offset_percent
            .and_then(|p| p.to_f64())
            .unwrap_or(DEFAULT_OFFSET_PERCENT);
        // smoothing tolerance reacts to candles that stop just short of a band
        let tolerance = before_prev.width / 100.0 * offset_percent;

        let signal_candle = &candles[candles.len() - 3];
        let confirm_candle = &candles[candles.len() - 2];
        let open = signal_candle.open.to_f64().unwrap_or(0.0);
        let close = signal_candle.close.to_f64().unwrap_or(0.0);
        let (lower_border, upper_border) = if open <= close { (open, close) } else { (close, open) };

        let direction_changed = candle_direction(signal_candle) != candle_direction(confirm_candle);

        let has_top_intersection = upper_border > before_prev.top_edge
            || (before_prev.top_edge - upper_border).abs() <= tolerance;
        let has_bottom_intersection = lower_border < before_prev.bottom_edge
            || (before_prev.bottom_edge - lower_border).abs() <= tolerance;

        let mut trend = None;
        if has_top_intersection && current_in_corridor && previous_in_corridor && direction_changed {
            trend = Some(TradeSide::Sell);
        }
        if has_bottom_intersection && current_in_corridor && previous_in_corridor && direction_changed {
            trend = Some(TradeSide::Buy);
        }

        match trend {
            Some(trend) => {
                let price = candles[candles.len() - 1].close;
                m.dispatch(Event::MakeDecision, cx, Payload::Trend { trend, price })
                    .await;
            }
            None => cx.api.emit_next_candles(),
        }
    })
}

fn make_decision<'a>(m: &'a mut CorridorMachine, cx: &'a Ctx, payload: Payload) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let Payload::Trend { trend, price } = payload else {
            error!(strategy = "corridor_trend", "unexpected payload for make_decision");
            return;
        };

        let orders = match cx.api.get_orders(&cx.pair).await {
            Ok(orders) => orders,
            Err(error) => {
                error!(pair = %cx.pair.symbol(), api = %cx.pair.api_name, %error, "failed to fetch orders");
                Vec::new()
            }
        };

        // a recent order on the same side means this trend was already traded
        if let Some(last_order) = orders.iter().find(|order| order.side == trend) {
            if let Some(interval) = cx.pair.candles.interval_duration() {
                let order_lifetime = Utc::now() - last_order.time;
                if order_lifetime < interval * 3 {
                    cx.api.emit_next_candles();
                    return;
                }
            }
        }

        info!(pair = %cx.pair.symbol(), api = %cx.pair.api_name, %trend, "current trend");
        m.change_state(State::Trade);
        let event = match trend {
            TradeSide::Buy => Event::Buy,
            TradeSide::Sell => Event::Sell,
        };
        m.dispatch(event, cx, Payload::Order { price }).await;
    })
}

fn buy<'a>(m: &'a mut CorridorMachine, cx: &'a Ctx, payload: Payload) -> BoxFuture<'a, ()> {
    let _ = m;
    Box::pin(async move {
        let Payload::Order { price } = payload else {
            error!(strategy = "corridor_trend", "unexpected payload for buy");
            cx.api.emit_next_candles();
            return;
        };
        if let Err(error) = place_buy(cx, price).await {
            error!(pair = %cx.pair.symbol(), api = %cx.pair.api_name, %error, "buy failed");
        }
        cx.api.emit_next_candles();
    })
}

async fn place_buy(cx: &Ctx, price: Decimal) -> Result<()> {
    let trade_limit = cx.api.get_min_lot_size(&cx.pair).await?;
    if price.is_zero() {
        return Ok(());
    }
    let quantity = cx.pair.transform().apply(trade_limit / price);
    let order = cx.api.buy(&cx.pair, quantity, price).await?;
    let balance = cx.api.get_pair_balance(&cx.pair).await?;
    info!(
        pair = %cx.pair.symbol(),
        order_id = %order.id,
        price = %order.price,
        quantity = %order.quantity,
        ?balance,
        "created buy order"
    );
    Ok(())
}

fn sell<'a>(m: &'a mut CorridorMachine, cx: &'a Ctx, payload: Payload) -> BoxFuture<'a, ()> {
    let _ = m;
    Box::pin(async move {
        let Payload::Order { price } = payload else {
            error!(strategy = "corridor_trend", "unexpected payload for sell");
            cx.api.emit_next_candles();
            return;
        };
        if let Err(error) = place_sell(cx, price).await {
            error!(pair = %cx.pair.symbol(), api = %cx.pair.api_name, %error, "sell failed");
        }
        cx.api.emit_next_candles();
    })
}

async fn place_sell(cx: &Ctx, price: Decimal) -> Result<()> {
    let trade_limit = cx.api.get_min_lot_size(&cx.pair).await?;
    let quantity = cx
        .api
        .get_order_quantity(&cx.pair.make, price, trade_limit)
        .await?;
    if quantity.is_zero() {
        info!(pair = %cx.pair.symbol(), make = %cx.pair.make, "balance too low to sell");
        return Ok(());
    }
    let quantity = cx.pair.transform().apply(quantity);
    let order = cx.api.sell(&cx.pair, quantity, price).await?;
    let balance = cx.api.get_pair_balance(&cx.pair).await?;
    info!(
        pair = %cx.pair.symbol(),
        order_id = %order.id,
        price = %order.price,
        quantity = %order.quantity,
        ?balance,
        "created sell order"
    );
    Ok(())
}
