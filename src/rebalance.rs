use rust_decimal::Decimal;

use crate::advisor::{Action, InvestmentAdvice};
use crate::connector::{PositionSide, PositionSnapshot};
use crate::finance;
use crate::registry::AssetRegistry;

/// Basket-wide constants of one strategy.
#[derive(Debug, Clone)]
pub struct RebalanceParams {
    /// Absolute basket delta (notional) above which hedging kicks in.
    pub hedge_threshold: Decimal,
    /// Hedging only runs while liquidity is constrained below this level.
    pub hedge_max_ll: f64,
    /// Pair used for the emergency hedge when no candidate qualifies.
    pub stability_pair: String,
    pub emergency_amount: Decimal,
    /// Below this liquidity level the best performer is reduced to free
    /// capital.
    pub reallocate_ll: f64,
    /// Above this liquidity level the under-represented side's worst
    /// performer gets an opportunistic top-up.
    pub topup_min_ll: f64,
}

/// One end of the basket-wide best/worst scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub pair: String,
    pub side: PositionSide,
    pub pnl_percent: f64,
    pub size: Decimal,
}

/// Transient per-cycle selections, recomputed from scratch every cycle.
#[derive(Debug, Clone, Default)]
pub struct BasketExtremes {
    /// Most profitable closeable position (profit-taking candidate).
    pub best: Option<Candidate>,
    /// Least profitable position on the under-represented side.
    pub worst: Option<Candidate>,
}

/// Aggregate long-minus-short notional across every reported position.
pub fn basket_delta(positions: &[PositionSnapshot]) -> Decimal {
    let mut delta = Decimal::ZERO;
    for position in positions {
        match position.side {
            PositionSide::Long => delta += position.notional,
            PositionSide::Short => delta -= position.notional,
        }
    }
    delta
}

pub struct Rebalancer {
    params: RebalanceParams,
}

impl Rebalancer {
    pub fn new(params: RebalanceParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RebalanceParams {
        &self.params
    }

    /// Basket-wide hedge pass. Runs when the aggregate imbalance breaches
    /// the threshold while liquidity is constrained; picks the first pair
    /// with a losing leg on the side that offsets the imbalance, or falls
    /// back to a fixed-size emergency trade on the stability pair.
    pub fn hedge_advices(
        &self,
        registry: &AssetRegistry,
        positions: &[PositionSnapshot],
        ll: f64,
    ) -> Vec<InvestmentAdvice> {
        let delta = basket_delta(positions);
        if delta.abs() <= self.params.hedge_threshold || ll >= self.params.hedge_max_ll {
            return Vec::new();
        }

        let (offset_side, action) = if delta > Decimal::ZERO {
            (PositionSide::Short, Action::Sell)
        } else {
            (PositionSide::Long, Action::Buy)
        };

        for asset in registry.assets() {
            let leg = finance::leg(positions, &asset.pair, offset_side);
            if let Some(leg) = leg {
                if leg.unrealized_pnl < Decimal::ZERO {
                    log::info!(
                        "[HEDGE] basket delta {} offset via {} {}",
                        delta,
                        action.as_str(),
                        asset.pair
                    );
                    return vec![InvestmentAdvice {
                        action,
                        amount: asset.min_trading_amount,
                        pair: asset.pair.clone(),
                        reason: format!(
                            "we adjust the hedge by {} {}",
                            hedge_verb(action),
                            asset.pair
                        ),
                    }];
                }
            }
        }

        log::warn!(
            "[HEDGE] no qualifying candidate for basket delta {}; emergency hedge on {}",
            delta,
            self.params.stability_pair
        );
        vec![InvestmentAdvice {
            action,
            amount: self.params.emergency_amount,
            pair: self.params.stability_pair.clone(),
            reason: format!(
                "we emergency adjust the hedge by {} {}",
                hedge_verb(action),
                self.params.stability_pair
            ),
        }]
    }

    /// Single linear scan keeping a running best and worst; no sort.
    pub fn scan_basket(
        &self,
        registry: &AssetRegistry,
        positions: &[PositionSnapshot],
    ) -> BasketExtremes {
        let delta = basket_delta(positions);
        let under_represented = if delta > self.params.hedge_threshold {
            Some(PositionSide::Short)
        } else if delta < -self.params.hedge_threshold {
            Some(PositionSide::Long)
        } else {
            None
        };

        let mut extremes = BasketExtremes::default();
        for position in positions {
            let asset = match registry.get(&position.pair) {
                Some(a) => a,
                None => continue,
            };
            let pnl = match finance::pnl_percent(Some(position)) {
                Ok(p) => p,
                Err(_) => continue,
            };

            // profit-taking candidate: in profit and big enough to reduce
            if pnl > 0.0 && position.size > asset.min_trading_amount {
                let better = extremes
                    .best
                    .as_ref()
                    .map_or(true, |best| pnl > best.pnl_percent);
                if better {
                    extremes.best = Some(Candidate {
                        pair: position.pair.clone(),
                        side: position.side,
                        pnl_percent: pnl,
                        size: position.size,
                    });
                }
            }

            if under_represented == Some(position.side) {
                let worse = extremes
                    .worst
                    .as_ref()
                    .map_or(true, |worst| pnl < worst.pnl_percent);
                if worse {
                    extremes.worst = Some(Candidate {
                        pair: position.pair.clone(),
                        side: position.side,
                        pnl_percent: pnl,
                        size: position.size,
                    });
                }
            }
        }
        extremes
    }

    /// Turns the scan results into advices, gated by liquidity pressure.
    pub fn reallocation_advices(
        &self,
        registry: &AssetRegistry,
        extremes: &BasketExtremes,
        ll: f64,
    ) -> Vec<InvestmentAdvice> {
        let mut advices = Vec::new();

        if ll < self.params.reallocate_ll {
            if let Some(best) = &extremes.best {
                if let Some(asset) = registry.get(&best.pair) {
                    let action = match best.side {
                        PositionSide::Long => Action::ReduceLong,
                        PositionSide::Short => Action::ReduceShort,
                    };
                    advices.push(InvestmentAdvice {
                        action,
                        amount: asset.min_trading_amount.min(best.size),
                        pair: best.pair.clone(),
                        reason: format!(
                            "we free liquidity by reducing our best {} {} position at {:.2}%",
                            best.pair,
                            best.side.label(),
                            best.pnl_percent
                        ),
                    });
                }
            }
        }

        if ll > self.params.topup_min_ll {
            if let Some(worst) = &extremes.worst {
                if let Some(asset) = registry.get(&worst.pair) {
                    let action = match worst.side {
                        PositionSide::Long => Action::Buy,
                        PositionSide::Short => Action::Sell,
                    };
                    advices.push(InvestmentAdvice {
                        action,
                        amount: asset.min_trading_amount,
                        pair: worst.pair.clone(),
                        reason: format!(
                            "we top up the under-represented {} {} position at {:.2}%",
                            worst.pair,
                            worst.side.label(),
                            worst.pnl_percent
                        ),
                    });
                }
            }
        }

        advices
    }
}

fn hedge_verb(action: Action) -> &'static str {
    match action {
        Action::Buy => "buying",
        _ => "short selling",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AssetConfig;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn dec_s(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn registry() -> AssetRegistry {
        let assets = vec![
            AssetConfig {
                pair: "ETHUSDT".to_string(),
                min_trading_amount: dec!(0.01),
                decimal_places: 2,
                target_lsd: 0.0,
                min_lsd: -60.0,
                max_lsd: 60.0,
            },
            AssetConfig {
                pair: "BTCUSDT".to_string(),
                min_trading_amount: dec!(0.001),
                decimal_places: 3,
                target_lsd: 0.0,
                min_lsd: -60.0,
                max_lsd: 60.0,
            },
        ];
        AssetRegistry::new(assets, 100)
    }

    fn rebalancer() -> Rebalancer {
        Rebalancer::new(crate::policy::strategy_params("classics").unwrap().rebalance)
    }

    fn position(pair: &str, side: PositionSide, notional: &str, pnl: &str) -> PositionSnapshot {
        PositionSnapshot {
            pair: pair.to_string(),
            side,
            size: dec!(1),
            notional: dec_s(notional),
            leverage: 25,
            unrealized_pnl: dec_s(pnl),
        }
    }

    #[test]
    fn basket_delta_sums_across_pairs() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "3000", "0"),
            position("ETHUSDT", PositionSide::Short, "500", "0"),
            position("BTCUSDT", PositionSide::Short, "400", "0"),
        ];
        assert_eq!(basket_delta(&positions), dec!(2100));
    }

    #[test]
    fn long_heavy_basket_sells_on_losing_short() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "3000", "10"),
            position("ETHUSDT", PositionSide::Short, "500", "-5"),
        ];
        let advices = rebalancer().hedge_advices(&registry(), &positions, 0.4);
        assert_eq!(advices.len(), 1);
        assert_eq!(advices[0].action, Action::Sell);
        assert_eq!(advices[0].pair, "ETHUSDT");
        assert_eq!(advices[0].amount, dec!(0.01));
    }

    #[test]
    fn hedge_falls_back_to_stability_pair() {
        // long-heavy, but every short is in profit
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "3000", "10"),
            position("ETHUSDT", PositionSide::Short, "500", "5"),
        ];
        let advices = rebalancer().hedge_advices(&registry(), &positions, 0.4);
        assert_eq!(advices.len(), 1);
        assert_eq!(advices[0].action, Action::Sell);
        assert_eq!(advices[0].pair, "BTCUSDT");
        assert_eq!(advices[0].amount, dec!(0.01));
    }

    #[test]
    fn short_heavy_basket_buys_on_losing_long() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Short, "3000", "2"),
            position("ETHUSDT", PositionSide::Long, "400", "-3"),
        ];
        let advices = rebalancer().hedge_advices(&registry(), &positions, 0.4);
        assert_eq!(advices.len(), 1);
        assert_eq!(advices[0].action, Action::Buy);
        assert_eq!(advices[0].pair, "ETHUSDT");
    }

    #[test]
    fn ample_liquidity_suppresses_hedging() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "3000", "10"),
            position("ETHUSDT", PositionSide::Short, "500", "-5"),
        ];
        assert!(rebalancer()
            .hedge_advices(&registry(), &positions, 5.0)
            .is_empty());
    }

    #[test]
    fn balanced_basket_never_hedges() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "1000", "-5"),
            position("ETHUSDT", PositionSide::Short, "1000", "-5"),
        ];
        assert!(rebalancer()
            .hedge_advices(&registry(), &positions, 0.4)
            .is_empty());
    }

    #[test]
    fn scan_picks_running_best_and_worst() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "3000", "90"),
            position("BTCUSDT", PositionSide::Long, "2000", "10"),
            position("ETHUSDT", PositionSide::Short, "500", "-5"),
            position("BTCUSDT", PositionSide::Short, "100", "-9"),
        ];
        let extremes = rebalancer().scan_basket(&registry(), &positions);
        let best = extremes.best.unwrap();
        assert_eq!(best.pair, "ETHUSDT");
        assert_eq!(best.side, PositionSide::Long);
        // basket is long-heavy, so the worst is searched among shorts
        let worst = extremes.worst.unwrap();
        assert_eq!(worst.pair, "BTCUSDT");
        assert_eq!(worst.side, PositionSide::Short);
    }

    #[test]
    fn losing_book_has_no_profit_taking_candidate() {
        let positions = vec![
            position("ETHUSDT", PositionSide::Long, "1000", "-5"),
            position("ETHUSDT", PositionSide::Short, "900", "-5"),
        ];
        let extremes = rebalancer().scan_basket(&registry(), &positions);
        assert!(extremes.best.is_none());
        assert!(extremes.worst.is_none());
    }

    #[test]
    fn reallocation_respects_liquidity_gates() {
        let reb = rebalancer();
        let reg = registry();
        let extremes = BasketExtremes {
            best: Some(Candidate {
                pair: "ETHUSDT".to_string(),
                side: PositionSide::Long,
                pnl_percent: 3.0,
                size: dec!(1),
            }),
            worst: Some(Candidate {
                pair: "BTCUSDT".to_string(),
                side: PositionSide::Short,
                pnl_percent: -9.0,
                size: dec!(1),
            }),
        };
        // constrained: only the profit-taking reduce fires
        let tight = reb.reallocation_advices(&reg, &extremes, 0.1);
        assert_eq!(tight.len(), 1);
        assert_eq!(tight[0].action, Action::ReduceLong);
        // ample: only the top-up fires
        let ample = reb.reallocation_advices(&reg, &extremes, 10.0);
        assert_eq!(ample.len(), 1);
        assert_eq!(ample[0].action, Action::Sell);
        // mid-range: neither
        assert!(reb.reallocation_advices(&reg, &extremes, 2.0).is_empty());
    }
}
