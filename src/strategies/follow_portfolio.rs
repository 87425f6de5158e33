//! Portfolio-following strategy.
//!
//! Mirrors a source portfolio into a target one: detects position changes
//! against the last saved snapshot, computes percent-of-total allocations for
//! both portfolios, and rebalances the target with lot-rounded orders. All
//! percent/price/quantity arithmetic stays in `Decimal` end to end; a
//! floating-point rendition oscillates on unchanged portfolios.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{error, info};

use crate::api::{PortfolioApi, TradeApi};
use crate::db::PortfolioStore;
use crate::engine::{Machine, Transitions};
use crate::models::{Pair, Portfolio, Position, TradeSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Init,
    AnalyzePortfolio,
    Trade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Exec,
    DetectChanges,
    CalculateProportions,
    FulfillTrades,
}

pub enum Payload {
    Start,
    Portfolio(Portfolio),
    Totals { portfolio: Portfolio, total: Decimal },
    Orders(RebalanceOrders),
}

/// One queued rebalance order.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceOrder {
    pub figi: String,
    pub quantity: Decimal,
    pub quantity_lots: Decimal,
}

/// The buy/sell batches produced by one proportion pass.
#[derive(Debug, Default, Clone)]
pub struct RebalanceOrders {
    pub buy: Vec<RebalanceOrder>,
    pub sell: Vec<RebalanceOrder>,
}

/// Collaborators for one follow-portfolio invocation.
pub struct Ctx {
    pub pair: Pair,
    pub api: Arc<dyn TradeApi>,
    pub store: Arc<dyn PortfolioStore>,
    pub user: String,
}

type FollowMachine = Machine<State, Event, Payload, Ctx>;

pub fn machine() -> FollowMachine {
    let mut table: Transitions<State, Event, Payload, Ctx> = HashMap::new();
    table.insert((State::Init, Event::Exec), exec);
    table.insert((State::AnalyzePortfolio, Event::DetectChanges), detect_changes);
    table.insert(
        (State::AnalyzePortfolio, Event::CalculateProportions),
        calculate_proportions,
    );
    table.insert((State::Trade, Event::FulfillTrades), fulfill_trades);
    Machine::new(table, State::Init)
}

/// Run one full strategy cycle.
pub async fn run(cx: &Ctx) {
    machine().dispatch(Event::Exec, cx, Payload::Start).await;
}

/// A position annotated with its share of the portfolio total.
#[derive(Debug, Clone)]
struct Proportion {
    position: Position,
    percent: Decimal,
}

/// Percent-of-total per non-cash position, keyed by figi. A `BTreeMap` keeps
/// the rebalance order deterministic.
fn portfolio_proportions(portfolio: &Portfolio, total: Decimal) -> BTreeMap<String, Proportion> {
    let mut result = BTreeMap::new();
    if total.is_zero() {
        return result;
    }
    for position in &portfolio.positions {
        if position.is_cash() {
            continue;
        }
        let percent = position.quantity * position.current_price / total;
        result.insert(
            position.figi.clone(),
            Proportion {
                position: position.clone(),
                percent,
            },
        );
    }
    result
}

/// Lot-rounded quantity for a percent slice of the portfolio total.
/// Returns `None` when the slice rounds to zero lots or the item carries no
/// usable lot data.
fn lots_from_percent(
    percent: Decimal,
    item: &Proportion,
    portfolio_total: Decimal,
) -> Option<(Decimal, Decimal)> {
    let position = &item.position;
    if position.quantity_lots.is_zero() {
        return None;
    }
    let items_per_lot = position.quantity / position.quantity_lots;
    let price_per_lot = items_per_lot * position.current_price;
    if price_per_lot.is_zero() {
        return None;
    }
    let money = percent * portfolio_total;
    let lots =
        (money / price_per_lot).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    if lots.is_zero() {
        return None;
    }
    Some((lots, lots * items_per_lot))
}

fn exec<'a>(m: &'a mut FollowMachine, cx: &'a Ctx, _payload: Payload) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let Some(portfolio_api) = cx.api.portfolios() else {
            error!(
                api = %cx.pair.api_name,
                strategy = "follow_portfolio",
                "broker does not expose portfolios"
            );
            return;
        };
        let Some(source_id) = cx.pair.source_portfolio_id.as_deref() else {
            error!(
                pair = %cx.pair.symbol(),
                strategy = "follow_portfolio",
                "source portfolio id is not configured"
            );
            return;
        };

        let portfolio = match portfolio_api.get_portfolio(source_id).await {
            Ok(Some(portfolio)) => portfolio,
            Ok(None) => return,
            Err(error) => {
                error!(
                    api = %cx.pair.api_name,
                    strategy = "follow_portfolio",
                    %error,
                    "failed to fetch source portfolio"
                );
                return;
            }
        };

        m.change_state(State::AnalyzePortfolio);
        m.dispatch(Event::DetectChanges, cx, Payload::Portfolio(portfolio))
            .await;
    })
}

fn detect_changes<'a>(m: &'a mut FollowMachine, cx: &'a Ctx, payload: Payload) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let Payload::Portfolio(portfolio) = payload else {
            error!(strategy = "follow_portfolio", "unexpected payload for detect_changes");
            return;
        };
        // some brokers transiently report an empty portfolio
        if portfolio.positions.is_empty() {
            return;
        }
        let Some(source_id) = cx.pair.source_portfolio_id.as_deref() else {
            return;
        };

        let snapshot = match cx.store.get_portfolio(source_id).await {
            Ok(snapshot) => snapshot.unwrap_or_else(|| Portfolio::empty(source_id)),
            Err(error) => {
                error!(
                    strategy = "follow_portfolio",
                    %error,
                    "failed to load portfolio snapshot"
                );
                return;
            }
        };

        let mut changed: HashMap<String, Position> = snapshot
            .positions
            .iter()
            .filter(|position| !position.is_cash())
            .map(|position| (position.figi.clone(), position.clone()))
            .collect();

        let mut total = Decimal::ZERO;
        for position in &portfolio.positions {
            total += position.current_price * position.quantity;
            if position.is_cash() {
                continue;
            }
            let unchanged = changed
                .get(&position.figi)
                .map(|cached| cached.quantity == position.quantity);
            match unchanged {
                None => {
                    changed.insert(position.figi.clone(), position.clone());
                }
                Some(true) => {
                    changed.remove(&position.figi);
                }
                Some(false) => {}
            }
        }

        if changed.is_empty() {
            return;
        }
        info!(
            strategy = "follow_portfolio",
            user = %cx.user,
            source = source_id,
            changed = changed.len(),
            "source portfolio changed"
        );

        if let Err(error) = cx.store.save_portfolio(source_id, &portfolio).await {
            error!(
                strategy = "follow_portfolio",
                %error,
                "failed to save portfolio snapshot"
            );
            return;
        }

        m.dispatch(Event::CalculateProportions, cx, Payload::Totals { portfolio, total })
            .await;
    })
}

fn calculate_proportions<'a>(
    m: &'a mut FollowMachine,
    cx: &'a Ctx,
    payload: Payload,
) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let Payload::Totals { portfolio, total } = payload else {
            error!(
                strategy = "follow_portfolio",
                "unexpected payload for calculate_proportions"
            );
            return;
        };
        let Some(portfolio_api) = cx.api.portfolios() else {
            return;
        };
        let Some(target_id) = cx.pair.target_portfolio_id.as_deref() else {
            error!(
                pair = %cx.pair.symbol(),
                strategy = "follow_portfolio",
                "target portfolio id is not configured"
            );
            return;
        };

        let source_proportions = portfolio_proportions(&portfolio, total);

        let target = match portfolio_api.get_portfolio(target_id).await {
            Ok(Some(target)) => target,
            Ok(None) => return,
            Err(error) => {
                error!(
                    api = %cx.pair.api_name,
                    strategy = "follow_portfolio",
                    %error,
                    "failed to fetch target portfolio"
                );
                return;
            }
        };

        let target_total = (target.total_amount_shares
            + target.total_amount_bonds
            + target.total_amount_currencies
            + target.total_amount_etf
            + target.total_amount_futures)
            .round_dp(2);
        let mut target_proportions = portfolio_proportions(&target, target_total);

        let mut orders = RebalanceOrders::default();
        for (figi, source_item) in &source_proportions {
            let target_percent = target_proportions
                .get(figi)
                .map(|item| item.percent)
                .unwrap_or(Decimal::ZERO);

            if source_item.percent > target_percent {
                // the target holds too little of this instrument
                let delta = source_item.percent - target_percent;
                if let Some((quantity_lots, quantity)) =
                    lots_from_percent(delta, source_item, target_total)
                {
                    orders.buy.push(RebalanceOrder {
                        figi: figi.clone(),
                        quantity,
                        quantity_lots,
                    });
                }
            } else if source_item.percent < target_percent {
                // the target holds too much of it
                let delta = target_percent - source_item.percent;
                if let Some((quantity_lots, quantity)) =
                    lots_from_percent(delta, source_item, target_total)
                {
                    orders.sell.push(RebalanceOrder {
                        figi: figi.clone(),
                        quantity,
                        quantity_lots,
                    });
                }
            }

            target_proportions.remove(figi);
        }

        // whatever the target still holds that the source does not, sell off
        for (figi, item) in target_proportions {
            orders.sell.push(RebalanceOrder {
                figi,
                quantity: item.position.quantity,
                quantity_lots: item.position.quantity_lots,
            });
        }

        if orders.buy.is_empty() && orders.sell.is_empty() {
            return;
        }
        m.change_state(State::Trade);
        m.dispatch(Event::FulfillTrades, cx, Payload::Orders(orders))
            .await;
    })
}

fn fulfill_trades<'a>(m: &'a mut FollowMachine, cx: &'a Ctx, payload: Payload) -> BoxFuture<'a, ()> {
    let _ = m;
    Box::pin(async move {
        let Payload::Orders(orders) = payload else {
            error!(strategy = "follow_portfolio", "unexpected payload for fulfill_trades");
            return;
        };
        let Some(portfolio_api) = cx.api.portfolios() else {
            return;
        };

        // sells release the cash the buys need, so the sell batch settles first
        join_all(
            orders
                .sell
                .iter()
                .map(|order| execute(portfolio_api, cx, order, TradeSide::Sell)),
        )
        .await;
        join_all(
            orders
                .buy
                .iter()
                .map(|order| execute(portfolio_api, cx, order, TradeSide::Buy)),
        )
        .await;

        info!(
            strategy = "follow_portfolio",
            portfolio_id = cx.pair.target_portfolio_id.as_deref().unwrap_or_default(),
            "target portfolio rebalanced"
        );
    })
}

async fn execute(api: &dyn PortfolioApi, cx: &Ctx, order: &RebalanceOrder, side: TradeSide) {
    let result = match side {
        TradeSide::Sell => api.sell_instrument(&cx.pair, order.quantity_lots, &order.figi).await,
        TradeSide::Buy => api.buy_instrument(&cx.pair, order.quantity_lots, &order.figi).await,
    };
    match result {
        Ok(placed) => info!(
            strategy = "follow_portfolio",
            figi = %order.figi,
            side = %side,
            lots = %order.quantity_lots,
            order_id = %placed.id,
            "rebalance order placed"
        ),
        Err(error) => error!(
            strategy = "follow_portfolio",
            figi = %order.figi,
            side = %side,
            %error,
            "rebalance order failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::InstrumentType;
    use crate::strategies::testing::{test_pair, StubApi};
    use rust_decimal_macros::dec;

    fn position(figi: &str, quantity: Decimal, lots: Decimal, price: Decimal) -> Position {
        Position {
            figi: figi.to_string(),
            instrument_type: InstrumentType::Share,
            quantity,
            quantity_lots: lots,
            current_price: price,
            average_position_price: price,
        }
    }

    fn cash(amount: Decimal) -> Position {
        Position {
            figi: "RUB000UTSTOM".to_string(),
            instrument_type: InstrumentType::Currency,
            quantity: amount,
            quantity_lots: amount,
            current_price: dec!(1),
            average_position_price: dec!(1),
        }
    }

    fn portfolio(id: &str, positions: Vec<Position>) -> Portfolio {
        Portfolio {
            id: id.to_string(),
            positions,
            ..Portfolio::empty(id)
        }
    }

    fn follow_pair() -> Pair {
        let mut pair = test_pair("follow_portfolio");
        pair.source_portfolio_id = Some("src".to_string());
        pair.target_portfolio_id = Some("tgt".to_string());
        pair
    }

    fn ctx(api: Arc<StubApi>, store: Arc<MemoryStore>) -> Ctx {
        Ctx {
            pair: follow_pair(),
            api,
            store,
            user: "u1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_portfolio_capability_halts() {
        let api = Arc::new(StubApi::default());
        let cx = ctx(api.clone(), Arc::new(MemoryStore::new()));

        run(&cx).await;

        assert!(api.instrument_orders().is_empty());
    }

    #[tokio::test]
    async fn test_empty_source_portfolio_halts() {
        let api = Arc::new(StubApi {
            portfolio_capability: true,
            portfolios_by_id: HashMap::from([("src".to_string(), portfolio("src", vec![]))]),
            ..Default::default()
        });
        let cx = ctx(api.clone(), Arc::new(MemoryStore::new()));

        run(&cx).await;

        assert!(api.instrument_orders().is_empty());
        // the empty portfolio is never saved as a snapshot
        assert!(cx.store.get_portfolio("src").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unchanged_portfolio_is_idempotent() {
        let source = portfolio(
            "src",
            vec![position("A", dec!(10), dec!(10), dec!(10)), cash(dec!(50))],
        );
        let store = Arc::new(MemoryStore::new());
        store.save_portfolio("src", &source).await.unwrap();

        let api = Arc::new(StubApi {
            portfolio_capability: true,
            portfolios_by_id: HashMap::from([("src".to_string(), source)]),
            ..Default::default()
        });
        let cx = ctx(api.clone(), store);

        run(&cx).await;

        // nothing changed against the snapshot: no orders queued at all
        assert!(api.instrument_orders().is_empty());
    }

    #[tokio::test]
    async fn test_source_position_mirrored_into_empty_target() {
        // source: one share position worth 100, total 100
        let source = portfolio("src", vec![position("A", dec!(10), dec!(10), dec!(10))]);
        // target: no positions, but 100 of cash value to allocate
        let mut target = portfolio("tgt", vec![]);
        target.total_amount_currencies = dec!(100);

        let api = Arc::new(StubApi {
            portfolio_capability: true,
            portfolios_by_id: HashMap::from([
                ("src".to_string(), source),
                ("tgt".to_string(), target),
            ]),
            ..Default::default()
        });
        let cx = ctx(api.clone(), Arc::new(MemoryStore::new()));

        run(&cx).await;

        // A is 100% of the source; the buy fills 100% of the target total:
        // 10 lots of 1 item at price 10
        let orders = api.instrument_orders();
        assert_eq!(orders, vec![(TradeSide::Buy, "A".to_string(), dec!(10))]);

        // the snapshot was persisted for the next diff
        let snapshot = cx.store.get_portfolio("src").await.unwrap().unwrap();
        assert_eq!(snapshot.positions.len(), 1);
    }

    #[tokio::test]
    async fn test_target_only_instrument_is_fully_sold() {
        let source = portfolio("src", vec![position("A", dec!(10), dec!(10), dec!(10))]);
        let mut target = portfolio(
            "tgt",
            vec![
                position("A", dec!(10), dec!(10), dec!(10)),
                position("B", dec!(4), dec!(2), dec!(25)),
            ],
        );
        target.total_amount_shares = dec!(200);

        let api = Arc::new(StubApi {
            portfolio_capability: true,
            portfolios_by_id: HashMap::from([
                ("src".to_string(), source),
                ("tgt".to_string(), target),
            ]),
            ..Default::default()
        });
        let cx = ctx(api.clone(), Arc::new(MemoryStore::new()));

        run(&cx).await;

        let orders = api.instrument_orders();
        // B is held only by the target: always a full-quantity sell, never a buy
        assert!(orders.contains(&(TradeSide::Sell, "B".to_string(), dec!(2))));
        assert!(!orders.iter().any(|(side, figi, _)| figi == "B" && *side == TradeSide::Buy));
    }

    #[tokio::test]
    async fn test_identical_proportions_queue_nothing() {
        // both portfolios hold A at 100% of their own totals
        let source = portfolio("src", vec![position("A", dec!(10), dec!(10), dec!(10))]);
        let mut target = portfolio("tgt", vec![position("A", dec!(20), dec!(20), dec!(10))]);
        target.total_amount_shares = dec!(200);

        let api = Arc::new(StubApi {
            portfolio_capability: true,
            portfolios_by_id: HashMap::from([
                ("src".to_string(), source),
                ("tgt".to_string(), target),
            ]),
            ..Default::default()
        });
        let cx = ctx(api.clone(), Arc::new(MemoryStore::new()));

        run(&cx).await;

        assert!(api.instrument_orders().is_empty());
    }

    #[tokio::test]
    async fn test_small_deltas_trade_in_whole_lots() {
        // source 50/50 between A and B, target 52/48: each 2% delta converts
        // to whole lots through the lot formula
        let source = portfolio(
            "src",
            vec![
                position("A", dec!(50), dec!(5), dec!(10)),
                position("B", dec!(50), dec!(5), dec!(10)),
            ],
        );
        let mut target = portfolio(
            "tgt",
            vec![
                position("A", dec!(520), dec!(52), dec!(10)),
                position("B", dec!(480), dec!(48), dec!(10)),
            ],
        );
        target.total_amount_shares = dec!(10000);

        let api = Arc::new(StubApi {
            portfolio_capability: true,
            portfolios_by_id: HashMap::from([
                ("src".to_string(), source),
                ("tgt".to_string(), target),
            ]),
            ..Default::default()
        });
        let cx = ctx(api.clone(), Arc::new(MemoryStore::new()));

        run(&cx).await;

        // 2% of 10000 = 200 money, a lot costs 100: 2 lots each way
        let orders = api.instrument_orders();
        assert!(orders.contains(&(TradeSide::Sell, "A".to_string(), dec!(2))));
        assert!(orders.contains(&(TradeSide::Buy, "B".to_string(), dec!(2))));
    }

    #[tokio::test]
    async fn test_sells_settle_before_buys() {
        let source = portfolio("src", vec![position("A", dec!(10), dec!(10), dec!(10))]);
        let mut target = portfolio("tgt", vec![position("B", dec!(4), dec!(2), dec!(25))]);
        target.total_amount_shares = dec!(100);

        let api = Arc::new(StubApi {
            portfolio_capability: true,
            portfolios_by_id: HashMap::from([
                ("src".to_string(), source),
                ("tgt".to_string(), target),
            ]),
            ..Default::default()
        });
        let cx = ctx(api.clone(), Arc::new(MemoryStore::new()));

        run(&cx).await;

        let orders = api.instrument_orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].0, TradeSide::Sell);
        assert_eq!(orders[1].0, TradeSide::Buy);
    }

    #[tokio::test]
    async fn test_failed_orders_do_not_stop_siblings() {
        let source = portfolio(
            "src",
            vec![
                position("A", dec!(10), dec!(10), dec!(10)),
                position("B", dec!(10), dec!(10), dec!(10)),
            ],
        );
        let mut target = portfolio("tgt", vec![]);
        target.total_amount_currencies = dec!(100);

        let api = Arc::new(StubApi {
            portfolio_capability: true,
            fail_orders: true,
            portfolios_by_id: HashMap::from([
                ("src".to_string(), source),
                ("tgt".to_string(), target),
            ]),
            ..Default::default()
        });
        let cx = ctx(api.clone(), Arc::new(MemoryStore::new()));

        // both buys fail; the run must neither panic nor abort early
        run(&cx).await;
        assert!(api.instrument_orders().is_empty());
    }

    #[test]
    fn test_lot_formula() {
        let item = Proportion {
            position: position("A", dec!(10), dec!(10), dec!(10)),
            percent: Decimal::ONE,
        };
        // 100% of a 100-total: 100 money / 10 per lot = 10 lots of 1 item
        assert_eq!(
            lots_from_percent(Decimal::ONE, &item, dec!(100)),
            Some((dec!(10), dec!(10)))
        );
        // half a lot rounds away from zero
        assert_eq!(
            lots_from_percent(dec!(0.05), &item, dec!(100)),
            Some((dec!(1), dec!(1)))
        );
        // under half a lot rounds to zero and is skipped
        assert_eq!(lots_from_percent(dec!(0.04), &item, dec!(100)), None);
    }

    #[test]
    fn test_proportions_exclude_cash() {
        let portfolio = portfolio(
            "src",
            vec![position("A", dec!(10), dec!(10), dec!(10)), cash(dec!(100))],
        );
        let proportions = portfolio_proportions(&portfolio, dec!(200));
        assert_eq!(proportions.len(), 1);
        assert_eq!(proportions["A"].percent, dec!(0.5));
    }
}
