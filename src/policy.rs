use crate::rebalance::RebalanceParams;
use crate::registry::AssetConfig;
use rust_decimal_macros::dec;

/// Sentinel returned when adding to a side is off the table this cycle.
/// No realistic PnL percentage ever drops below it.
pub const NEVER_ADD: f64 = -200_000.0;
/// Sentinel returned when a side must not be closed (structurally needed).
pub const NEVER_CLOSE: f64 = 200_000.0;

/// Tunable constants behind the four trigger points. The historical
/// strategy variants differ only in these numbers, so variants are data
/// selected by name, not subclasses.
#[derive(Debug, Clone)]
pub struct PolicyParams {
    /// Adding point at a balanced book, percent of notional. Negative.
    pub add_base: f64,
    /// How much deeper the drawdown must be per percent of delta already
    /// leaning against the side being added to.
    pub add_slope: f64,
    /// Below this liquidity level no side is ever added to.
    pub add_min_ll: f64,
    /// Liquidity level above which adding points relax toward zero.
    pub relax_ll: f64,
    /// Advice age (minutes) unlocking the full relaxation divisor.
    pub relax_full_mins: f64,
    /// Advice age unlocking the half relaxation divisor.
    pub relax_half_mins: f64,
    pub close_base_long: f64,
    pub close_base_short: f64,
    /// A computed closing bar below this value means the pair is being
    /// squeezed; closing is suppressed instead of fire-saled.
    pub close_floor: f64,
    /// Base of the liquidity-sensitive overall closing limit.
    pub overall_close_base: f64,
    /// Liquidity level required before narrowing / balance moves run.
    pub narrow_min_ll: f64,
    /// Whether the one-sided balance top-up runs in the special pass.
    pub balance_check: bool,
    /// Liquidity level required before extreme-streak moves run.
    pub extreme_min_ll: f64,
    /// New-low streak length that triggers a contrarian add.
    pub low_streak_len: usize,
    /// New-high streak length that triggers an outlier-gain reduce.
    pub high_streak_len: usize,
}

/// A strategy bundles threshold constants with basket-wide rebalancing
/// constants. Presets form a closed set; unknown names are a startup error.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub policy: PolicyParams,
    pub rebalance: RebalanceParams,
}

pub fn strategy_params(name: &str) -> Option<StrategyParams> {
    match name {
        "base" => Some(StrategyParams {
            policy: PolicyParams {
                add_base: -2.0,
                add_slope: 3.0,
                add_min_ll: 0.0,
                relax_ll: 4.0,
                relax_full_mins: 3.0,
                relax_half_mins: 1.0,
                close_base_long: 14.2,
                close_base_short: 5.6,
                close_floor: 0.0,
                overall_close_base: 5.4,
                narrow_min_ll: 0.5,
                balance_check: false,
                extreme_min_ll: 2.0,
                low_streak_len: 12,
                high_streak_len: 24,
            },
            rebalance: RebalanceParams {
                hedge_threshold: dec!(2000),
                hedge_max_ll: 2.0,
                stability_pair: "ETHUSDT".to_string(),
                emergency_amount: dec!(0.01),
                reallocate_ll: 0.5,
                topup_min_ll: 8.0,
            },
        }),
        "classics" => Some(StrategyParams {
            policy: PolicyParams {
                add_base: -1.1,
                add_slope: 0.3,
                add_min_ll: 0.5,
                relax_ll: 4.0,
                relax_full_mins: 10.0,
                relax_half_mins: 5.0,
                close_base_long: 10.0,
                close_base_short: 10.0,
                close_floor: 2.4,
                overall_close_base: 5.4,
                narrow_min_ll: 0.5,
                balance_check: true,
                extreme_min_ll: 2.0,
                low_streak_len: 12,
                high_streak_len: 24,
            },
            rebalance: RebalanceParams {
                hedge_threshold: dec!(2000),
                hedge_max_ll: 2.0,
                stability_pair: "BTCUSDT".to_string(),
                emergency_amount: dec!(0.01),
                reallocate_ll: 0.5,
                topup_min_ll: 8.0,
            },
        }),
        _ => None,
    }
}

/// Computes the four trigger points for one pair and one cycle. Nothing is
/// memoized; delta and liquidity level change every cycle, so every call
/// recomputes from its arguments.
pub struct ThresholdPolicy {
    params: PolicyParams,
}

impl ThresholdPolicy {
    pub fn new(params: PolicyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PolicyParams {
        &self.params
    }

    /// PnL percent below which the long side should be added to.
    pub fn adding_point_long(
        &self,
        asset: &AssetConfig,
        lsd: f64,
        ll: f64,
        advice_age_mins: f64,
    ) -> f64 {
        if ll <= self.params.add_min_ll || lsd > asset.max_lsd {
            return NEVER_ADD;
        }
        // a long-heavy book demands a deeper drawdown before averaging down
        let point = if lsd < 0.0 {
            self.params.add_base
        } else {
            self.params.add_base - self.params.add_slope * lsd.abs()
        };
        self.relaxed(point, ll, advice_age_mins)
    }

    /// PnL percent below which the short side should be added to.
    pub fn adding_point_short(
        &self,
        asset: &AssetConfig,
        lsd: f64,
        ll: f64,
        advice_age_mins: f64,
    ) -> f64 {
        if ll <= self.params.add_min_ll || lsd < asset.min_lsd {
            return NEVER_ADD;
        }
        let point = if lsd > 0.0 {
            self.params.add_base
        } else {
            self.params.add_base - self.params.add_slope * lsd.abs()
        };
        self.relaxed(point, ll, advice_age_mins)
    }

    /// PnL percent above which long profits are realized.
    pub fn closing_point_long(&self, asset: &AssetConfig, lsd: f64, ll: f64) -> f64 {
        if lsd < asset.min_lsd {
            // the long leg is all that keeps the book from tipping further
            return NEVER_CLOSE;
        }
        let point = if lsd > asset.target_lsd {
            self.params.close_base_long - (lsd - asset.target_lsd) + ll
        } else {
            self.params.close_base_long + (asset.target_lsd - lsd) + ll
        };
        if point < self.params.close_floor {
            NEVER_CLOSE
        } else {
            point
        }
    }

    /// PnL percent above which short profits are realized.
    pub fn closing_point_short(&self, asset: &AssetConfig, lsd: f64, ll: f64) -> f64 {
        if lsd > asset.max_lsd {
            return NEVER_CLOSE;
        }
        let point = if lsd < asset.target_lsd {
            self.params.close_base_short - (asset.target_lsd - lsd) + ll
        } else {
            self.params.close_base_short + (lsd - asset.target_lsd) + ll
        };
        if point < self.params.close_floor {
            NEVER_CLOSE
        } else {
            point
        }
    }

    /// Overall-PnL percent above which a pair is closed out entirely.
    /// Scarce liquidity lowers the bar; idle capital raises it.
    pub fn overall_closing_limit(&self, ll: f64) -> f64 {
        self.params.overall_close_base + ll
    }

    fn relaxed(&self, point: f64, ll: f64, advice_age_mins: f64) -> f64 {
        if ll > self.params.relax_ll {
            if advice_age_mins >= self.params.relax_full_mins {
                return point / ll;
            }
            if advice_age_mins >= self.params.relax_half_mins {
                return point / (ll / 2.0);
            }
        }
        point
    }
}
