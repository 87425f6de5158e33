//! Dollar-cost-averaging ladder strategy.
//!
//! Keeps a ladder of cached buy orders per (pair, user). Each cycle compares
//! the current price against the ladder: sells the closest order that went
//! cheap enough, or buys another rung when price drops below the cheapest one.
//! A freshness window derived from the candle interval throttles trading to
//! at most one order per interval.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::api::TradeApi;
use crate::db::OrderStore;
use crate::engine::{Machine, Transitions};
use crate::models::{Candle, Order, Pair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Init,
    Analyze,
    Trade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Exec,
    ReadCachedOrders,
    MakeDecision,
    Buy,
    Sell,
}

pub enum Payload {
    Start,
    Decision {
        orders: Vec<Order>,
        last_candle: Candle,
    },
    Buy {
        price: Decimal,
    },
    Sell {
        order: Order,
        price: Decimal,
    },
}

/// Collaborators for one DCA invocation.
pub struct Ctx {
    pub pair: Pair,
    pub api: Arc<dyn TradeApi>,
    pub store: Arc<dyn OrderStore>,
    pub user: String,
}

type DcaMachine = Machine<State, Event, Payload, Ctx>;

pub fn machine() -> DcaMachine {
    let mut table: Transitions<State, Event, Payload, Ctx> = HashMap::new();
    table.insert((State::Init, Event::Exec), exec);
    table.insert((State::Init, Event::ReadCachedOrders), read_cached_orders);
    table.insert((State::Analyze, Event::MakeDecision), make_decision);
    table.insert((State::Trade, Event::Buy), buy);
    table.insert((State::Trade, Event::Sell), sell);
    Machine::new(table, State::Init)
}

/// Run one full strategy cycle.
pub async fn run(cx: &Ctx) {
    machine().dispatch(Event::Exec, cx, Payload::Start).await;
}

fn exec<'a>(m: &'a mut DcaMachine, cx: &'a Ctx, _payload: Payload) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        m.dispatch(Event::ReadCachedOrders, cx, Payload::Start).await;
    })
}

fn read_cached_orders<'a>(m: &'a mut DcaMachine, cx: &'a Ctx, _payload: Payload) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let orders = match cx.store.get_orders(&cx.pair, &cx.user).await {
            Ok(orders) => orders,
            Err(error) => {
                error!(pair = %cx.pair.symbol(), %error, "failed to read cached orders");
                Vec::new()
            }
        };
        let candles = match cx.api.get_candle_stick(&cx.pair).await {
            Ok(candles) => candles,
            Err(error) => {
                error!(pair = %cx.pair.symbol(), api = %cx.pair.api_name, %error, "failed to fetch candles");
                return;
            }
        };
        let Some(last_candle) = candles.last().cloned() else {
            return;
        };
        m.change_state(State::Analyze);
        m.dispatch(Event::MakeDecision, cx, Payload::Decision { orders, last_candle })
            .await;
    })
}

fn make_decision<'a>(m: &'a mut DcaMachine, cx: &'a Ctx, payload: Payload) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let Payload::Decision { orders, last_candle } = payload else {
            error!(strategy = "dca", "unexpected payload for make_decision");
            return;
        };
        let current_price = last_candle.close;

        let Some(interval) = cx.pair.candles.interval_duration() else {
            error!(
                pair = %cx.pair.symbol(),
                interval = %cx.pair.candles.interval,
                "unparseable candle interval"
            );
            return;
        };
        let valid_time = Utc::now() - interval;
        let last_order_time = match cx.store.get_last_order_time(&cx.pair, &cx.user).await {
            Ok(Some(time)) => time,
            Ok(None) => valid_time - interval,
            Err(error) => {
                error!(pair = %cx.pair.symbol(), %error, "failed to read last order time");
                // fail safe: pretend we just traded and wait the window out
                Utc::now()
            }
        };
        if last_order_time > valid_time {
            return;
        }

        if orders.is_empty() {
            m.change_state(State::Trade);
            m.dispatch(Event::Buy, cx, Payload::Buy { price: current_price })
                .await;
            return;
        }

        let offset = cx.pair.offset.unwrap_or(Decimal::ZERO);
        // orders arrive sorted by price descending; the first one that went
        // cheap enough is the closest rung above the ladder bottom
        let closest_cheap_order = orders
            .iter()
            .find(|order| order.price + offset < current_price)
            .cloned();

        m.change_state(State::Trade);
        match closest_cheap_order {
            Some(order) => {
                m.dispatch(Event::Sell, cx, Payload::Sell { order, price: current_price })
                    .await;
            }
            None => {
                let cheapest = &orders[orders.len() - 1];
                if cheapest.price - offset > current_price {
                    m.dispatch(Event::Buy, cx, Payload::Buy { price: current_price })
                        .await;
                }
            }
        }
    })
}

fn buy<'a>(m: &'a mut DcaMachine, cx: &'a Ctx, payload: Payload) -> BoxFuture<'a, ()> {
    let _ = m;
    Box::pin(async move {
        let Payload::Buy { price } = payload else {
            error!(strategy = "dca", "unexpected payload for buy");
            return;
        };
        if let Err(error) = place_buy(cx, price).await {
            error!(pair = %cx.pair.symbol(), api = %cx.pair.api_name, %error, "buy failed");
        }
    })
}

async fn place_buy(cx: &Ctx, price: Decimal) -> Result<()> {
    let trade_limit = cx.api.get_min_lot_size(&cx.pair).await?;
    let balance = cx.api.get_pair_balance(&cx.pair).await?;
    let take_balance = balance.get(&cx.pair.take).copied().unwrap_or(Decimal::ZERO);
    if take_balance <= trade_limit {
        info!(
            pair = %cx.pair.symbol(),
            balance = %take_balance,
            limit = %trade_limit,
            "balance too low to buy"
        );
        return Ok(());
    }
    if price.is_zero() {
        return Ok(());
    }

    let quantity = cx.pair.transform().apply(trade_limit / price);
    let mut order = cx.api.buy(&cx.pair, quantity, price).await?;
    if order.price.is_zero() {
        // some brokers omit the fill price in the immediate response
        order.price = price;
    }
    let balance = cx.api.get_pair_balance(&cx.pair).await?;
    info!(
        pair = %cx.pair.symbol(),
        order_id = %order.id,
        price = %order.price,
        quantity = %order.quantity,
        ?balance,
        "created buy order"
    );
    cx.store.save_order(&cx.pair, &cx.user, &order).await?;

    if let Some(savings) = cx.api.savings() {
        savings.buy_saving(&cx.pair, order.quantity).await?;
    }
    Ok(())
}

fn sell<'a>(m: &'a mut DcaMachine, cx: &'a Ctx, payload: Payload) -> BoxFuture<'a, ()> {
    let _ = m;
    Box::pin(async move {
        let Payload::Sell { order, price } = payload else {
            error!(strategy = "dca", "unexpected payload for sell");
            return;
        };
        if let Err(error) = place_sell(cx, &order, price).await {
            error!(pair = %cx.pair.symbol(), api = %cx.pair.api_name, %error, "sell failed");
        }
    })
}

async fn place_sell(cx: &Ctx, matched: &Order, price: Decimal) -> Result<()> {
    let quantity = cx.pair.transform().apply(matched.quantity);
    let balance = cx.api.get_pair_balance(&cx.pair).await?;
    let make_balance = balance.get(&cx.pair.make).copied().unwrap_or(Decimal::ZERO);
    if make_balance < quantity {
        let Some(savings) = cx.api.savings() else {
            return Ok(());
        };
        savings.redeem_saving(&cx.pair, quantity).await?;
    }

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
    cx.store.delete_order(&matched.id).await?;
    Ok(())
}
