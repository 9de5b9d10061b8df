//! Multi-asset backtest engine.
//!
//! A builder assembles weighted assets, one global buy rule, one global sell
//! rule, the allocation policy and the cost model; `run` replays the sorted
//! union of all asset timestamps into an append-only transaction ledger.
//! Each asset gets its own evaluation context, so indicator state never
//! leaks across assets, and the replay itself is strictly sequential: the
//! same configuration always produces the same ledger.

use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::domain::context::EvalContext;
use crate::domain::error::TickreplayError;
use crate::domain::registry::{builtin_registry, Registry};
use crate::domain::rule::Rule;
use crate::domain::series::Series;

/// How buy notional is sized from available cash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationPolicy {
    /// Spend all cash not already committed at this step; weights are ignored.
    #[default]
    UseAllAvailableCash,
    /// Spend free cash × the asset's weight.
    FixedWeight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub timestamp: NaiveDateTime,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub fee: f64,
}

/// Per-asset held state while the replay runs.
#[derive(Debug, Clone, PartialEq)]
struct Position {
    quantity: f64,
    entry_price: f64,
    entry_timestamp: NaiveDateTime,
}

/// A position still open when the axis ends, valued at the last known close.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPositionReport {
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_timestamp: NaiveDateTime,
    pub last_close: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub transactions: Vec<Transaction>,
    pub principal: f64,
    pub final_balance: f64,
    /// Equal to `final_balance`: fees and premium were deducted as they
    /// occurred, so no further correction applies.
    pub corrected_balance: f64,
    pub corrected_profit_loss: f64,
    pub open_positions: Vec<OpenPositionReport>,
}

struct Asset {
    series: Rc<Series>,
    weight: f64,
}

#[derive(Default)]
pub struct BacktestBuilder {
    assets: Vec<(Rc<Series>, f64)>,
    buy_rule: Option<Rule>,
    sell_rule: Option<Rule>,
    allocation: AllocationPolicy,
    fee_rate: f64,
    premium: f64,
    registry: Option<Rc<Registry>>,
}

impl BacktestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset; registration order breaks same-timestamp ties.
    pub fn asset(mut self, series: Rc<Series>, weight: f64) -> Self {
        self.assets.push((series, weight));
        self
    }

    pub fn buy_rule(mut self, rule: Rule) -> Self {
        self.buy_rule = Some(rule);
        self
    }

    pub fn sell_rule(mut self, rule: Rule) -> Self {
        self.sell_rule = Some(rule);
        self
    }

    pub fn allocation(mut self, policy: AllocationPolicy) -> Self {
        self.allocation = policy;
        self
    }

    /// Flat fee as a fraction of notional, charged on both sides.
    pub fn fee_rate(mut self, rate: f64) -> Self {
        self.fee_rate = rate;
        self
    }

    /// Absolute slippage: added to buy prices, subtracted from sell prices.
    pub fn premium(mut self, premium: f64) -> Self {
        self.premium = premium;
        self
    }

    pub fn registry(mut self, registry: Rc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Backtest, TickreplayError> {
        if self.assets.is_empty() {
            return Err(TickreplayError::configuration("at least one asset required"));
        }
        for (series, weight) in &self.assets {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(TickreplayError::configuration(format!(
                    "{}: weight must be non-negative, got {weight}",
                    series.symbol()
                )));
            }
        }
        if !self.fee_rate.is_finite() || !(0.0..1.0).contains(&self.fee_rate) {
            return Err(TickreplayError::configuration(format!(
                "fee rate must be in [0, 1), got {}",
                self.fee_rate
            )));
        }
        if !self.premium.is_finite() || self.premium < 0.0 {
            return Err(TickreplayError::configuration(format!(
                "premium must be non-negative, got {}",
                self.premium
            )));
        }
        let buy_rule = self
            .buy_rule
            .ok_or_else(|| TickreplayError::configuration("buy rule required"))?;
        let sell_rule = self
            .sell_rule
            .ok_or_else(|| TickreplayError::configuration("sell rule required"))?;

        Ok(Backtest {
            assets: self
                .assets
                .into_iter()
                .map(|(series, weight)| Asset { series, weight })
                .collect(),
            buy_rule,
            sell_rule,
            allocation: self.allocation,
            fee_rate: self.fee_rate,
            premium: self.premium,
            registry: self.registry.unwrap_or_else(|| Rc::new(builtin_registry())),
        })
    }
}

pub struct Backtest {
    assets: Vec<Asset>,
    buy_rule: Rule,
    sell_rule: Rule,
    allocation: AllocationPolicy,
    fee_rate: f64,
    premium: f64,
    registry: Rc<Registry>,
}

impl Backtest {
    pub fn builder() -> BacktestBuilder {
        BacktestBuilder::new()
    }

    /// Replay the unified time axis and produce the ledger and final figures.
    pub fn run(&self, initial_cash: f64) -> BacktestResult {
        let axis: BTreeSet<NaiveDateTime> = self
            .assets
            .iter()
            .flat_map(|asset| asset.series.candles().iter().map(|c| c.timestamp))
            .collect();

        let contexts: Vec<EvalContext> = self
            .assets
            .iter()
            .map(|asset| EvalContext::new(asset.series.clone(), self.registry.clone()))
            .collect();

        let mut cash = initial_cash;
        let mut positions: Vec<Option<Position>> = vec![None; self.assets.len()];
        let mut transactions = Vec::new();

        for &timestamp in &axis {
            for (ai, asset) in self.assets.iter().enumerate() {
                let Some(index) = asset.series.index_at(timestamp) else {
                    continue;
                };
                let candle = asset.series.candle(index);
                let ctx = &contexts[ai];

                if positions[ai].is_none() {
                    // Flat: only the buy rule applies.
                    if !self.buy_rule.eval(&asset.series, index, ctx) {
                        continue;
                    }
                    let budget = match self.allocation {
                        AllocationPolicy::UseAllAvailableCash => cash,
                        AllocationPolicy::FixedWeight => cash * asset.weight,
                    };
                    let price = candle.close + self.premium;
                    if budget <= 0.0 || price <= 0.0 {
                        continue;
                    }
                    // Size the quantity so notional + fee spends the budget.
                    let quantity = budget / (price * (1.0 + self.fee_rate));
                    if quantity <= 0.0 {
                        continue;
                    }
                    let notional = quantity * price;
                    let fee = notional * self.fee_rate;
                    cash -= notional + fee;
                    positions[ai] = Some(Position {
                        quantity,
                        entry_price: price,
                        entry_timestamp: timestamp,
                    });
                    transactions.push(Transaction {
                        timestamp,
                        symbol: asset.series.symbol().to_string(),
                        side: Side::Buy,
                        quantity,
                        price,
                        fee,
                    });
                } else if self.sell_rule.eval(&asset.series, index, ctx) {
                    // Held: only the sell rule applies.
                    let Some(position) = positions[ai].take() else {
                        continue;
                    };
                    let price = candle.close - self.premium;
                    let notional = position.quantity * price;
                    let fee = notional * self.fee_rate;
                    cash += notional - fee;
                    transactions.push(Transaction {
                        timestamp,
                        symbol: asset.series.symbol().to_string(),
                        side: Side::Sell,
                        quantity: position.quantity,
                        price,
                        fee,
                    });
                }
            }
        }

        let mut open_positions = Vec::new();
        let mut open_value = 0.0;
        for (ai, position) in positions.iter().enumerate() {
            let Some(position) = position else { continue };
            let series = &self.assets[ai].series;
            let Some(last) = series.last() else { continue };
            open_value += position.quantity * last.close;
            open_positions.push(OpenPositionReport {
                symbol: series.symbol().to_string(),
                quantity: position.quantity,
                entry_price: position.entry_price,
                entry_timestamp: position.entry_timestamp,
                last_close: last.close,
            });
        }

        let final_balance = cash + open_value;
        let corrected_balance = final_balance;
        let corrected_profit_loss = if initial_cash != 0.0 {
            (corrected_balance - initial_cash) / initial_cash
        } else {
            0.0
        };

        BacktestResult {
            transactions,
            principal: initial_cash,
            final_balance,
            corrected_balance,
            corrected_profit_loss,
            open_positions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_series;
    use crate::domain::indicator::Indicator;
    use crate::domain::ohlcv::Candle;
    use chrono::NaiveDate;

    fn at_index(target: usize) -> Rule {
        Rule::when(move |_, index, _| index == target)
    }

    fn never() -> Rule {
        Rule::when(|_, _, _| false)
    }

    fn always() -> Rule {
        Rule::when(|_, _, _| true)
    }

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn series_on_days(symbol: &str, days_and_closes: &[(u32, f64)]) -> Rc<Series> {
        let candles = days_and_closes
            .iter()
            .map(|&(d, close)| Candle {
                timestamp: day(d),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1000,
            })
            .collect();
        Rc::new(Series::new(symbol, candles).unwrap())
    }

    #[test]
    fn build_requires_assets() {
        let result = Backtest::builder()
            .buy_rule(never())
            .sell_rule(never())
            .build();
        assert!(matches!(
            result,
            Err(TickreplayError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn build_rejects_negative_weight() {
        let result = Backtest::builder()
            .asset(make_series(&[1.0]), -0.5)
            .buy_rule(never())
            .sell_rule(never())
            .build();
        assert!(matches!(
            result,
            Err(TickreplayError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn build_rejects_fee_out_of_range() {
        for fee in [1.0, 1.5, -0.1] {
            let result = Backtest::builder()
                .asset(make_series(&[1.0]), 1.0)
                .buy_rule(never())
                .sell_rule(never())
                .fee_rate(fee)
                .build();
            assert!(result.is_err(), "fee {fee} should be rejected");
        }
    }

    #[test]
    fn build_requires_both_rules() {
        let result = Backtest::builder()
            .asset(make_series(&[1.0]), 1.0)
            .buy_rule(never())
            .build();
        assert!(matches!(
            result,
            Err(TickreplayError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn single_round_trip_no_costs() {
        let series = make_series(&[100.0, 100.0, 110.0, 110.0]);
        let backtest = Backtest::builder()
            .asset(series, 1.0)
            .buy_rule(at_index(1))
            .sell_rule(at_index(2))
            .build()
            .unwrap();

        let result = backtest.run(1000.0);
        assert_eq!(result.transactions.len(), 2);

        let buy = &result.transactions[0];
        assert_eq!(buy.side, Side::Buy);
        assert!((buy.quantity - 10.0).abs() < 1e-9);
        assert!((buy.price - 100.0).abs() < f64::EPSILON);
        assert!((buy.fee - 0.0).abs() < f64::EPSILON);

        let sell = &result.transactions[1];
        assert_eq!(sell.side, Side::Sell);
        assert!((sell.price - 110.0).abs() < f64::EPSILON);

        // 10 units × +10 move.
        assert!((result.final_balance - 1100.0).abs() < 1e-9);
        assert!((result.corrected_profit_loss - 0.1).abs() < 1e-9);
        assert!(result.open_positions.is_empty());
    }

    #[test]
    fn round_trip_cost_identity() {
        // Constant price: net loss is exactly q*(2*premium + 2*price*fee).
        let price = 50.0;
        let fee_rate = 0.01;
        let premium = 0.25;
        let series = make_series(&[price, price, price, price]);

        let backtest = Backtest::builder()
            .asset(series, 1.0)
            .buy_rule(at_index(1))
            .sell_rule(at_index(2))
            .fee_rate(fee_rate)
            .premium(premium)
            .build()
            .unwrap();

        let initial = 10_000.0;
        let result = backtest.run(initial);
        assert_eq!(result.transactions.len(), 2);

        let quantity = result.transactions[0].quantity;
        let expected_loss = quantity * (2.0 * premium + 2.0 * price * fee_rate);
        let actual_loss = initial - result.corrected_balance;
        assert!(
            (actual_loss - expected_loss).abs() < 1e-9,
            "expected loss {expected_loss}, got {actual_loss}"
        );
    }

    #[test]
    fn buy_spends_budget_inclusive_of_fee() {
        let series = make_series(&[100.0, 100.0]);
        let backtest = Backtest::builder()
            .asset(series, 1.0)
            .buy_rule(at_index(0))
            .sell_rule(never())
            .fee_rate(0.1)
            .build()
            .unwrap();

        let result = backtest.run(1100.0);
        let buy = &result.transactions[0];

        // quantity * price * 1.1 == 1100 → quantity == 10.
        assert!((buy.quantity - 10.0).abs() < 1e-9);
        assert!((buy.fee - 100.0).abs() < 1e-9);
    }

    #[test]
    fn state_gates_buy_and_sell() {
        // Both rules always true: the position state alone decides which fires.
        let series = make_series(&[10.0, 10.0, 10.0, 10.0]);
        let backtest = Backtest::builder()
            .asset(series, 1.0)
            .buy_rule(always())
            .sell_rule(always())
            .build()
            .unwrap();

        let result = backtest.run(100.0);
        let sides: Vec<Side> = result.transactions.iter().map(|t| t.side).collect();
        assert_eq!(sides, vec![Side::Buy, Side::Sell, Side::Buy, Side::Sell]);
    }

    #[test]
    fn open_position_valued_at_last_close() {
        let series = make_series(&[100.0, 100.0, 120.0]);
        let backtest = Backtest::builder()
            .asset(series, 1.0)
            .buy_rule(at_index(0))
            .sell_rule(never())
            .build()
            .unwrap();

        let result = backtest.run(1000.0);
        assert_eq!(result.transactions.len(), 1);
        assert_eq!(result.open_positions.len(), 1);

        let open = &result.open_positions[0];
        assert!((open.quantity - 10.0).abs() < 1e-9);
        assert!((open.last_close - 120.0).abs() < f64::EPSILON);
        // 10 units now worth 120 each, no exit fee.
        assert!((result.final_balance - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn unified_axis_merges_asset_timestamps() {
        let a = series_on_days("A", &[(1, 10.0), (3, 10.0)]);
        let b = series_on_days("B", &[(2, 20.0), (4, 20.0)]);

        let backtest = Backtest::builder()
            .asset(a, 0.5)
            .asset(b, 0.5)
            .allocation(AllocationPolicy::FixedWeight)
            .buy_rule(always())
            .sell_rule(never())
            .build()
            .unwrap();

        let result = backtest.run(1000.0);
        // Each asset buys at its first candle, in timestamp order.
        assert_eq!(result.transactions.len(), 2);
        assert_eq!(result.transactions[0].symbol, "A");
        assert_eq!(result.transactions[0].timestamp, day(1));
        assert_eq!(result.transactions[1].symbol, "B");
        assert_eq!(result.transactions[1].timestamp, day(2));
    }

    #[test]
    fn all_cash_policy_starves_later_assets_in_same_step() {
        let a = series_on_days("A", &[(1, 10.0)]);
        let b = series_on_days("B", &[(1, 10.0)]);

        let backtest = Backtest::builder()
            .asset(a, 1.0)
            .asset(b, 1.0)
            .allocation(AllocationPolicy::UseAllAvailableCash)
            .buy_rule(always())
            .sell_rule(never())
            .build()
            .unwrap();

        let result = backtest.run(1000.0);
        // Registration order: A consumes all free cash, B has nothing left.
        assert_eq!(result.transactions.len(), 1);
        assert_eq!(result.transactions[0].symbol, "A");
    }

    #[test]
    fn fixed_weight_splits_cash_across_assets() {
        let a = series_on_days("A", &[(1, 10.0)]);
        let b = series_on_days("B", &[(1, 10.0)]);

        let backtest = Backtest::builder()
            .asset(a, 0.5)
            .asset(b, 0.5)
            .allocation(AllocationPolicy::FixedWeight)
            .buy_rule(always())
            .sell_rule(never())
            .build()
            .unwrap();

        let result = backtest.run(1000.0);
        assert_eq!(result.transactions.len(), 2);
        // A gets 1000*0.5, B gets the remaining 500*0.5.
        assert!((result.transactions[0].quantity - 50.0).abs() < 1e-9);
        assert!((result.transactions[1].quantity - 25.0).abs() < 1e-9);
    }

    #[test]
    fn same_configuration_is_deterministic() {
        let a = series_on_days("A", &[(1, 10.0), (2, 12.0), (3, 9.0), (4, 14.0)]);
        let b = series_on_days("B", &[(1, 30.0), (3, 33.0), (5, 27.0)]);

        let build = || {
            Backtest::builder()
                .asset(a.clone(), 0.6)
                .asset(b.clone(), 0.4)
                .allocation(AllocationPolicy::FixedWeight)
                .buy_rule(Rule::when(|series, i, _| {
                    i > 0 && series.candle(i).close > series.candle(i - 1).close
                }))
                .sell_rule(Rule::when(|series, i, _| {
                    i > 0 && series.candle(i).close < series.candle(i - 1).close
                }))
                .fee_rate(0.002)
                .premium(0.01)
                .build()
                .unwrap()
        };

        let first = build().run(5000.0);
        let second = build().run(5000.0);
        assert_eq!(first, second);
        assert!(!first.transactions.is_empty());
    }

    #[test]
    fn rule_driven_by_indicator_warmup_buys_late() {
        let series = make_series(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
        let backtest = Backtest::builder()
            .asset(series, 1.0)
            .buy_rule(Rule::when(|_, i, ctx: &EvalContext| {
                ctx.sma(4)
                    .ok()
                    .and_then(|sma| sma.value_at(i).value)
                    .is_some()
            }))
            .sell_rule(never())
            .build()
            .unwrap();

        let result = backtest.run(100.0);
        // sma(4) first resolves at index 3 (2024-01-04).
        assert_eq!(result.transactions.len(), 1);
        assert_eq!(result.transactions[0].timestamp, day(4));
    }
}
