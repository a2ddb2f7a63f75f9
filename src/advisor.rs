use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::connector::{AccountSnapshot, PositionSide, PositionSnapshot};
use crate::extremes;
use crate::finance::{self, FinanceError};
use crate::policy::{StrategyParams, ThresholdPolicy};
use crate::rebalance::Rebalancer;
use crate::registry::{AssetConfig, AssetRegistry};

/// Every pair is walked through this fixed sequence exactly once per cycle.
/// `Pause` is not an order; it hosts the special-moves pass.
pub const ACTION_SEQUENCE: [Action; 5] = [
    Action::Pause,
    Action::Buy,
    Action::Sell,
    Action::ReduceLong,
    Action::ReduceShort,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    Pause,
    Buy,
    Sell,
    ReduceLong,
    ReduceShort,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pause => "PAUSE",
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::ReduceLong => "REDUCELONG",
            Action::ReduceShort => "REDUCESHORT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestmentAdvice {
    pub action: Action,
    pub amount: Decimal,
    pub pair: String,
    pub reason: String,
}

/// The only state carried across cycles besides the registry histories.
#[derive(Debug, Clone)]
struct EngineState {
    last_advice_at: DateTime<Utc>,
}

pub struct AdviceEngine {
    policy: ThresholdPolicy,
    rebalancer: Rebalancer,
    registry: AssetRegistry,
    state: EngineState,
}

/// Available balance scaled to the 0..20 working range. An account with
/// everything free sits at 20, a fully margined one at 0.
pub fn liquidity_level(account: &AccountSnapshot) -> f64 {
    if account.equity <= Decimal::ZERO {
        return 0.0;
    }
    (account.available_balance / account.equity * Decimal::from(20))
        .to_f64()
        .unwrap_or(0.0)
}

impl AdviceEngine {
    pub fn new(strategy: StrategyParams, registry: AssetRegistry) -> Self {
        Self {
            policy: ThresholdPolicy::new(strategy.policy),
            rebalancer: Rebalancer::new(strategy.rebalance),
            registry,
            state: EngineState {
                last_advice_at: Utc::now(),
            },
        }
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    /// Read-only derivation: identical snapshots yield identical advices.
    /// History and cooldown mutations happen in [`record_cycle`] only.
    ///
    /// [`record_cycle`]: AdviceEngine::record_cycle
    pub fn derive_advices(
        &self,
        account: &AccountSnapshot,
        positions: &[PositionSnapshot],
    ) -> Vec<InvestmentAdvice> {
        let ll = liquidity_level(account);
        let age_mins = self.advice_age_mins();

        let mut advices = self.rebalancer.hedge_advices(&self.registry, positions, ll);

        for asset in self.registry.assets() {
            match self.advise_pair(asset, positions, ll, age_mins) {
                Ok(mut pair_advices) => advices.append(&mut pair_advices),
                Err(e) => {
                    log::warn!("[ADVISOR] skipping {} this cycle: {}", asset.pair, e);
                }
            }
        }

        let extremes = self.rebalancer.scan_basket(&self.registry, positions);
        advices.extend(
            self.rebalancer
                .reallocation_advices(&self.registry, &extremes, ll),
        );

        advices
    }

    /// Post-cycle bookkeeping: push one PnL sample per present leg and, if
    /// any advice was emitted, reset the cooldown that relaxes adding points.
    pub fn record_cycle(&mut self, positions: &[PositionSnapshot], advised: bool) {
        let samples: Vec<(String, PositionSide, f64)> = self
            .registry
            .assets()
            .iter()
            .flat_map(|asset| {
                [PositionSide::Long, PositionSide::Short]
                    .into_iter()
                    .filter_map(|side| {
                        let leg = finance::leg(positions, &asset.pair, side)?;
                        let pnl = finance::pnl_percent(Some(leg)).ok()?;
                        Some((asset.pair.clone(), side, pnl))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        for (pair, side, pnl) in samples {
            self.registry.record_sample(&pair, side, pnl);
        }
        if advised {
            self.state.last_advice_at = Utc::now();
        }
    }

    fn advice_age_mins(&self) -> f64 {
        let elapsed = Utc::now() - self.state.last_advice_at;
        elapsed.num_seconds().max(0) as f64 / 60.0
    }

    fn advise_pair(
        &self,
        asset: &AssetConfig,
        positions: &[PositionSnapshot],
        ll: f64,
        age_mins: f64,
    ) -> Result<Vec<InvestmentAdvice>, FinanceError> {
        let long = finance::leg(positions, &asset.pair, PositionSide::Long);
        let short = finance::leg(positions, &asset.pair, PositionSide::Short);

        if let Some(advices) = self.special_moves(asset, positions, long, short, ll)? {
            return Ok(advices);
        }

        let mut advices = Vec::new();
        let lsd = finance::long_short_delta_percent(positions, &asset.pair);
        let long_pnl = finance::pnl_percent(long)?;
        let short_pnl = finance::pnl_percent(short)?;

        if long_pnl < self.policy.adding_point_long(asset, lsd, ll, age_mins) {
            let amount = scaled_amount(asset, lsd);
            advices.push(InvestmentAdvice {
                action: Action::Buy,
                amount,
                pair: asset.pair.clone(),
                reason: format!(
                    "we enhance our {} long position (at a pnl of {:.2}%) by {}",
                    asset.pair, long_pnl, amount
                ),
            });
        }
        if short_pnl < self.policy.adding_point_short(asset, lsd, ll, age_mins) {
            let amount = scaled_amount(asset, lsd);
            advices.push(InvestmentAdvice {
                action: Action::Sell,
                amount,
                pair: asset.pair.clone(),
                reason: format!(
                    "we enhance our {} short position (at a pnl of {:.2}%) by {}",
                    asset.pair, short_pnl, amount
                ),
            });
        }
        if let Some(long) = long {
            if long_pnl > self.policy.closing_point_long(asset, lsd, ll)
                && long.size > asset.min_trading_amount
            {
                advices.push(InvestmentAdvice {
                    action: Action::ReduceLong,
                    amount: asset.min_trading_amount,
                    pair: asset.pair.clone(),
                    reason: format!(
                        "we realize profit on our {} long position (at a pnl of {:.2}%) by {}",
                        asset.pair, long_pnl, asset.min_trading_amount
                    ),
                });
            }
        }
        if let Some(short) = short {
            if short_pnl > self.policy.closing_point_short(asset, lsd, ll)
                && short.size > asset.min_trading_amount
            {
                advices.push(InvestmentAdvice {
                    action: Action::ReduceShort,
                    amount: asset.min_trading_amount,
                    pair: asset.pair.clone(),
                    reason: format!(
                        "we realize profit on our {} short position (at a pnl of {:.2}%) by {}",
                        asset.pair, short_pnl, asset.min_trading_amount
                    ),
                });
            }
        }

        self.extreme_moves(asset, long, short, long_pnl, short_pnl, ll, &mut advices);

        Ok(advices)
    }

    /// The PAUSE slot. Returns `Some` when a special move decided the pair
    /// this cycle; standard moves are then skipped entirely.
    fn special_moves(
        &self,
        asset: &AssetConfig,
        positions: &[PositionSnapshot],
        long: Option<&PositionSnapshot>,
        short: Option<&PositionSnapshot>,
        ll: f64,
    ) -> Result<Option<Vec<InvestmentAdvice>>, FinanceError> {
        if long.is_none() || short.is_none() {
            let mut advices = Vec::new();
            if long.is_none() {
                advices.push(open_advice(asset, PositionSide::Long));
            }
            if short.is_none() {
                advices.push(open_advice(asset, PositionSide::Short));
            }
            return Ok(Some(advices));
        }

        let overall = finance::overall_pnl_percent(long, short)?;
        if overall > self.policy.overall_closing_limit(ll) {
            let long = long.ok_or(FinanceError::MissingLeg(PositionSide::Long))?;
            let short = short.ok_or(FinanceError::MissingLeg(PositionSide::Short))?;
            let reason = format!(
                "we close out our {} pair (overall pnl {:.2}%)",
                asset.pair, overall
            );
            return Ok(Some(vec![
                InvestmentAdvice {
                    action: Action::ReduceLong,
                    amount: long.size,
                    pair: asset.pair.clone(),
                    reason: reason.clone(),
                },
                InvestmentAdvice {
                    action: Action::ReduceShort,
                    amount: short.size,
                    pair: asset.pair.clone(),
                    reason,
                },
            ]));
        }

        if ll > self.policy.params().narrow_min_ll {
            let long_pnl = finance::pnl_percent(long)?;
            let short_pnl = finance::pnl_percent(short)?;
            if long_pnl < 0.0 && short_pnl < 0.0 {
                let reason = format!("we narrow our {} spread by adding both legs", asset.pair);
                return Ok(Some(vec![
                    InvestmentAdvice {
                        action: Action::Buy,
                        amount: asset.min_trading_amount,
                        pair: asset.pair.clone(),
                        reason: reason.clone(),
                    },
                    InvestmentAdvice {
                        action: Action::Sell,
                        amount: asset.min_trading_amount,
                        pair: asset.pair.clone(),
                        reason,
                    },
                ]));
            }

            if self.policy.params().balance_check {
                if let Some(advice) = self.balance_move(asset, positions, long, short)? {
                    return Ok(Some(vec![advice]));
                }
            }
        }

        Ok(None)
    }

    /// One-sided top-up sized to erase an extreme delta, priced off the
    /// under-represented leg's own mark.
    fn balance_move(
        &self,
        asset: &AssetConfig,
        positions: &[PositionSnapshot],
        long: Option<&PositionSnapshot>,
        short: Option<&PositionSnapshot>,
    ) -> Result<Option<InvestmentAdvice>, FinanceError> {
        let lsd = finance::long_short_delta_percent(positions, &asset.pair);
        let (action, leg) = if lsd > asset.max_lsd {
            (
                Action::Sell,
                short.ok_or(FinanceError::MissingLeg(PositionSide::Short))?,
            )
        } else if lsd < asset.min_lsd {
            (
                Action::Buy,
                long.ok_or(FinanceError::MissingLeg(PositionSide::Long))?,
            )
        } else {
            return Ok(None);
        };

        if leg.size <= Decimal::ZERO {
            return Ok(None);
        }
        let price = leg.notional / leg.size;
        if price <= Decimal::ZERO {
            return Ok(None);
        }
        let gap = finance::long_short_delta_value(positions, &asset.pair);
        let amount = quantize(gap / price, asset.decimal_places).max(asset.min_trading_amount);
        Ok(Some(InvestmentAdvice {
            action,
            amount,
            pair: asset.pair.clone(),
            reason: format!(
                "we top up our {} {} leg to correct a delta of {:.2}%",
                asset.pair,
                leg.side.label(),
                lsd
            ),
        }))
    }

    /// Contrarian pass on rolling PnL streaks. Only consulted when no
    /// special move decided the pair.
    fn extreme_moves(
        &self,
        asset: &AssetConfig,
        long: Option<&PositionSnapshot>,
        short: Option<&PositionSnapshot>,
        long_pnl: f64,
        short_pnl: f64,
        ll: f64,
        advices: &mut Vec<InvestmentAdvice>,
    ) {
        let params = self.policy.params();
        if ll <= params.extreme_min_ll {
            return;
        }

        for (side, leg, pnl, add_action, reduce_action) in [
            (
                PositionSide::Long,
                long,
                long_pnl,
                Action::Buy,
                Action::ReduceLong,
            ),
            (
                PositionSide::Short,
                short,
                short_pnl,
                Action::Sell,
                Action::ReduceShort,
            ),
        ] {
            let leg = match leg {
                Some(leg) => leg,
                None => continue,
            };
            let history = self.registry.history(&asset.pair, side);
            let low_streak = extremes::streak_below(history, pnl);
            if low_streak >= params.low_streak_len {
                advices.push(InvestmentAdvice {
                    action: add_action,
                    amount: asset.min_trading_amount,
                    pair: asset.pair.clone(),
                    reason: format!(
                        "we counter a {}-period low streak on {} {}",
                        low_streak,
                        asset.pair,
                        side.label()
                    ),
                });
                continue;
            }
            let high_streak = extremes::streak_above(history, pnl);
            if high_streak >= params.high_streak_len && leg.size > asset.min_trading_amount {
                advices.push(InvestmentAdvice {
                    action: reduce_action,
                    amount: asset.min_trading_amount.min(leg.size),
                    pair: asset.pair.clone(),
                    reason: format!(
                        "we lock in a {}-period high streak gain on {} {}",
                        high_streak,
                        asset.pair,
                        side.label()
                    ),
                });
            }
        }
    }
}

fn open_advice(asset: &AssetConfig, side: PositionSide) -> InvestmentAdvice {
    let action = match side {
        PositionSide::Long => Action::Buy,
        PositionSide::Short => Action::Sell,
    };
    InvestmentAdvice {
        action,
        amount: asset.min_trading_amount,
        pair: asset.pair.clone(),
        reason: format!(
            "we open our {} {} position by {}",
            asset.pair,
            side.label(),
            asset.min_trading_amount
        ),
    }
}

/// Adds grow with the imbalance: one minimum lot per 10 percent of delta.
fn scaled_amount(asset: &AssetConfig, lsd: f64) -> Decimal {
    let multiplier = ((lsd.abs() / 10.0).floor() as i64).max(1);
    quantize(
        asset.min_trading_amount * Decimal::from(multiplier),
        asset.decimal_places,
    )
}

fn quantize(amount: Decimal, decimal_places: u32) -> Decimal {
    amount.round_dp_with_strategy(decimal_places, RoundingStrategy::ToZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::strategy_params;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn dec_s(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn eth_asset() -> AssetConfig {
        AssetConfig {
            pair: "ETHUSDT".to_string(),
            min_trading_amount: dec!(0.01),
            decimal_places: 2,
            target_lsd: 0.0,
            min_lsd: -60.0,
            max_lsd: 60.0,
        }
    }

    fn engine(strategy: &str) -> AdviceEngine {
        AdviceEngine::new(
            strategy_params(strategy).unwrap(),
            AssetRegistry::new(vec![eth_asset()], 100),
        )
    }

    fn account(equity: &str, available: &str) -> AccountSnapshot {
        AccountSnapshot {
            equity: dec_s(equity),
            available_balance: dec_s(available),
        }
    }

    fn position(
        pair: &str,
        side: PositionSide,
        size: &str,
        notional: &str,
        pnl: &str,
    ) -> PositionSnapshot {
        PositionSnapshot {
            pair: pair.to_string(),
            side,
            size: dec_s(size),
            notional: dec_s(notional),
            leverage: 25,
            unrealized_pnl: dec_s(pnl),
        }
    }

    #[test]
    fn empty_book_opens_both_legs_in_order() {
        let advices = engine("base").derive_advices(&account("100", "100"), &[]);
        assert_eq!(advices.len(), 2);
        assert_eq!(advices[0].action, Action::Buy);
        assert_eq!(advices[0].amount, dec!(0.01));
        assert_eq!(advices[0].pair, "ETHUSDT");
        assert_eq!(advices[1].action, Action::Sell);
        assert_eq!(advices[1].amount, dec!(0.01));
    }

    #[test]
    fn long_only_book_opens_exactly_one_short() {
        let positions = vec![position("ETHUSDT", PositionSide::Long, "0.2", "500", "-20")];
        let advices = engine("base").derive_advices(&account("100", "100"), &positions);
        assert_eq!(advices.len(), 1);
        assert_eq!(advices[0].action, Action::Sell);
        assert_eq!(advices[0].amount, dec!(0.01));
        assert!(advices[0].reason.contains("open"));
    }

    #[test]
    fn deep_long_drawdown_enhances_the_long() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "0.2", "500", "-20"),
            position("ETHUSDT", PositionSide::Short, "0.2", "500", "1"),
        ];
        let advices = engine("base").derive_advices(&account("100", "100"), &positions);
        assert_eq!(advices.len(), 1);
        assert_eq!(advices[0].action, Action::Buy);
        assert_eq!(advices[0].amount, dec!(0.01));
        assert_eq!(
            advices[0].reason,
            "we enhance our ETHUSDT long position (at a pnl of -4.00%) by 0.01"
        );
    }

    #[test]
    fn deep_short_drawdown_enhances_the_short() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "0.2", "500", "1"),
            position("ETHUSDT", PositionSide::Short, "0.2", "500", "-15"),
        ];
        let advices = engine("base").derive_advices(&account("100", "100"), &positions);
        assert_eq!(advices.len(), 1);
        assert_eq!(advices[0].action, Action::Sell);
    }

    #[test]
    fn dead_zone_yields_no_advice() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "0.2", "500", "1"),
            position("ETHUSDT", PositionSide::Short, "0.2", "500", "1"),
        ];
        let advices = engine("base").derive_advices(&account("100", "100"), &positions);
        assert!(advices.is_empty());
    }

    #[test]
    fn derivation_is_idempotent() {
        let eng = engine("base");
        let acct = account("100", "100");
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "0.2", "500", "-20"),
            position("ETHUSDT", PositionSide::Short, "0.2", "500", "1"),
        ];
        let first = eng.derive_advices(&acct, &positions);
        let second = eng.derive_advices(&acct, &positions);
        assert_eq!(first, second);
    }

    #[test]
    fn overall_profit_above_limit_closes_both_legs_fully() {
        // overall pnl 12% against a limit of 5.4 + 2.0
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "0.2", "500", "40"),
            position("ETHUSDT", PositionSide::Short, "0.3", "500", "20"),
        ];
        let advices = engine("base").derive_advices(&account("100", "10"), &positions);
        assert_eq!(advices.len(), 2);
        assert_eq!(advices[0].action, Action::ReduceLong);
        assert_eq!(advices[0].amount, dec!(0.2));
        assert_eq!(advices[1].action, Action::ReduceShort);
        assert_eq!(advices[1].amount, dec!(0.3));
        assert!(advices[0].reason.contains("close out"));
    }

    #[test]
    fn both_legs_underwater_narrows_the_spread() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "0.2", "500", "-1"),
            position("ETHUSDT", PositionSide::Short, "0.2", "500", "-1"),
        ];
        let advices = engine("base").derive_advices(&account("100", "100"), &positions);
        assert_eq!(advices.len(), 2);
        assert_eq!(advices[0].action, Action::Buy);
        assert_eq!(advices[1].action, Action::Sell);
        assert!(advices[0].reason.contains("narrow"));
    }

    #[test]
    fn add_amount_scales_with_the_imbalance() {
        // lsd = 25 percent, multiplier 2, and a drawdown past the deepened bar
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "0.4", "1000", "-800"),
            position("ETHUSDT", PositionSide::Short, "0.3", "750", "0"),
        ];
        let advices = engine("base").derive_advices(&account("100", "5"), &positions);
        assert_eq!(advices.len(), 1);
        assert_eq!(advices[0].action, Action::Buy);
        assert_eq!(advices[0].amount, dec!(0.02));
    }

    #[test]
    fn extreme_delta_triggers_one_sided_balance_topup() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "1.0", "2000", "10"),
            position("ETHUSDT", PositionSide::Short, "0.2", "400", "2"),
        ];
        let advices = engine("classics").derive_advices(&account("100", "5"), &positions);
        assert_eq!(advices.len(), 1);
        assert_eq!(advices[0].action, Action::Sell);
        // gap of 1600 at a short mark of 2000
        assert_eq!(advices[0].amount, dec!(0.8));
        assert!(advices[0].reason.contains("delta"));
    }

    #[test]
    fn persistent_new_low_triggers_contrarian_add() {
        let mut eng = engine("base");
        let steady = vec![
            position("ETHUSDT", PositionSide::Long, "0.2", "500", "25"),
            position("ETHUSDT", PositionSide::Short, "0.2", "500", "5"),
        ];
        for _ in 0..12 {
            eng.record_cycle(&steady, false);
        }
        // long slips to -1%, inside the dead zone but below twelve samples
        let slipped = vec![
            position("ETHUSDT", PositionSide::Long, "0.2", "500", "-5"),
            position("ETHUSDT", PositionSide::Short, "0.2", "500", "5"),
        ];
        let advices = eng.derive_advices(&account("100", "100"), &slipped);
        assert_eq!(advices.len(), 1);
        assert_eq!(advices[0].action, Action::Buy);
        assert!(advices[0].reason.contains("low streak"));
    }

    #[test]
    fn record_cycle_feeds_histories_per_leg() {
        let mut eng = engine("base");
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "0.2", "500", "-20"),
            position("ETHUSDT", PositionSide::Short, "0.2", "500", "1"),
        ];
        eng.record_cycle(&positions, false);
        let long = eng.registry().history("ETHUSDT", PositionSide::Long);
        let short = eng.registry().history("ETHUSDT", PositionSide::Short);
        assert_eq!(long.front().copied(), Some(-4.0));
        assert_eq!(short.front().copied(), Some(0.2));
    }

    #[test]
    fn action_sequence_starts_with_pause() {
        assert_eq!(ACTION_SEQUENCE[0], Action::Pause);
        assert_eq!(ACTION_SEQUENCE[0].as_str(), "PAUSE");
        assert_eq!(ACTION_SEQUENCE[4].as_str(), "REDUCESHORT");
    }

    #[test]
    fn quantize_truncates_toward_zero() {
        assert_eq!(quantize(dec!(0.0199), 2), dec!(0.01));
        assert_eq!(quantize(dec!(0.8), 2), dec!(0.80));
    }
}
